//! # wikimirror Protocol
//!
//! Types exchanged with the remote wiki for mirroring.
//!
//! This crate provides:
//! - [`RawPage`] as returned by `prop=info|pageprops&inprop=protection`
//! - [`PageState`] / [`PageSnapshot`], the validated form of a raw page
//! - [`ChangeRecord`] for the recent-changes and log-events feeds
//! - Timestamp and title helpers shared by the store and the engine
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod error;
mod page;
mod timestamp;
mod title;

pub use change::{ChangeKind, ChangeRecord, FeedKind};
pub use error::{ProtocolResult, ShapeError, TimestampError};
pub use page::{PageId, PageSnapshot, PageState, RawPage, RawRestriction, Restriction};
pub use timestamp::{format_timestamp, parse_timestamp, Timestamp};
pub use title::db_title;
