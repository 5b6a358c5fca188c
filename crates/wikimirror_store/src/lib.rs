//! # wikimirror Store
//!
//! The local SQLite mirror and the deferred execution queue that writes to
//! it.
//!
//! This crate provides:
//! - [`Operation`], one typed write against the mirror schema, grouped by
//!   [`StatementKey`] into statement shapes
//! - [`ExecutionQueue`], which batches operations per shape and flushes
//!   them in first-seen order
//! - [`MirrorStore`] / [`MirrorTransaction`], the SQLite store a sync pass
//!   writes through
//!
//! ## Design Principles
//!
//! - The queue knows nothing about SQL; it talks to a [`BatchExecutor`]
//! - One sync pass is one transaction
//! - Child rows (properties, restrictions) cascade with their page, history
//!   rows do not and must be archived first
//!
//! ## Example
//!
//! ```rust
//! use wikimirror_store::{ExecutionQueue, MirrorStore, Operation};
//!
//! let mut store = MirrorStore::open_in_memory().unwrap();
//! let mut tx = store.transaction().unwrap();
//! let mut queue = ExecutionQueue::new(&mut tx, 5000).unwrap();
//! queue.submit(Operation::DeletePage { page_id: 1 }).unwrap();
//! queue.finish().unwrap();
//! tx.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod executor;
mod operation;
mod queue;
mod rows;
mod schema;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use executor::{BatchExecutor, RecordingExecutor};
pub use operation::{KeepSet, Operation, PagePropRow, PageRow, RestrictionRow, StatementKey};
pub use queue::{ExecutionQueue, QueueStats};
pub use rows::{ArchiveRow, RevisionRow};
pub use sqlite::{MirrorStore, MirrorTransaction};
