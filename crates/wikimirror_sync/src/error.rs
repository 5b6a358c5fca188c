//! Error types for the sync engine.

use thiserror::Error;
use wikimirror_protocol::{FeedKind, ShapeError, Timestamp};
use wikimirror_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync pass.
///
/// Every error aborts the pass: the transaction is rolled back and the
/// watermark stays where it was.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error reported by a remote collaborator.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A page snapshot lacked a mandatory field.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// The mirror store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The remote side answered in a way the engine cannot follow.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried by the caller.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport { retryable: true, .. })
    }
}

/// Reasons change discovery cannot answer "what changed since X".
///
/// These never escape the engine: each one is recovered by falling back to
/// a full sync, and is only logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The feed no longer holds records as old as the watermark.
    #[error("{feed} retention exceeded: oldest record {oldest:?} is newer than watermark {since}")]
    RetentionExceeded {
        /// Feed that was consulted.
        feed: FeedKind,
        /// Oldest record still present, `None` if the feed is empty.
        oldest: Option<Timestamp>,
        /// Watermark that was asked about.
        since: Timestamp,
    },

    /// Neither feed covers the watermark.
    #[error("no change feed covers changes since {since}")]
    DiscoveryImpossible {
        /// Watermark that was asked about.
        since: Timestamp,
    },
}
