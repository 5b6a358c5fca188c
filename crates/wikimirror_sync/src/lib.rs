//! # wikimirror Sync
//!
//! Keeps a local SQLite mirror of a wiki's page tables in line with the
//! remote site.
//!
//! This crate provides:
//! - Change discovery (full or incremental, from the recent-changes and
//!   log-event feeds)
//! - The page differ (snapshot to mirror operations)
//! - The sync engine state machine driving both into one transaction
//! - The collaborator traits the engine fetches through
//!
//! ## Architecture
//!
//! A pass runs **discover, fetch, diff, flush, commit**:
//! 1. Read the watermark and decide the mode from feed retention
//! 2. Fetch candidate snapshots in batches the API accepts
//! 3. Diff each snapshot into operations and queue them
//! 4. Flush the queue and advance the watermark in the same transaction
//!
//! ## Key Invariants
//!
//! - The remote wiki is authoritative
//! - The watermark only moves when a pass commits
//! - A page row is always written before the rows that reference it
//! - Revisions are archived before their page is deleted
//!
//! ## Example
//!
//! ```rust,ignore
//! use wikimirror_store::MirrorStore;
//! use wikimirror_sync::{MirrorConfig, SyncEngine};
//!
//! let mut store = MirrorStore::open("mirror.sqlite")?;
//! let engine = SyncEngine::new(MirrorConfig::new("wiki.example.org"), api, feed);
//! let report = engine.sync(&mut store)?;
//! println!("{} pages refreshed", report.pages_fetched);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod differ;
mod discovery;
mod engine;
mod error;
mod transport;

pub use config::{MirrorConfig, UnresolvedMovePolicy, DEFAULT_CHUNK_SIZE};
pub use differ::{DiffMode, Differ};
pub use discovery::{
    Discovery, DiscoveryOutcome, DiscoveryReport, FullSyncReason, SyncMode,
};
pub use engine::{SyncEngine, SyncReport, SyncState, SyncStats};
pub use error::{DiscoveryError, SyncError, SyncResult};
pub use transport::{ChangeFeed, PageListing, WikiApi};
