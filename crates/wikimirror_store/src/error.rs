//! Error types for store operations.

use crate::operation::StatementKey;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing the mirror.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The SQLite driver reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A batched statement violated a table constraint.
    ///
    /// Inside a sync pass this means operations reached the store in an
    /// order that breaks referential integrity, so it is never retried.
    #[error("constraint violation while executing `{statement}`: {message}")]
    ConstraintViolation {
        /// Shape of the statement that failed.
        statement: StatementKey,
        /// Driver message.
        message: String,
    },

    /// The execution queue was created with a chunk size of zero.
    #[error("chunk size must be positive")]
    InvalidChunkSize,

    /// The persisted watermark could not be parsed.
    #[error("invalid watermark for site {site:?}: {value:?}")]
    InvalidWatermark {
        /// Site the watermark belongs to.
        site: String,
        /// Stored text.
        value: String,
    },
}

impl StoreError {
    /// Maps a driver error raised while flushing `statement`.
    pub(crate) fn from_flush(statement: StatementKey, err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation {
                    statement,
                    message: message.clone().unwrap_or_else(|| code.to_string()),
                }
            }
            _ => StoreError::Sqlite(err),
        }
    }

    /// Returns true if the error is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }
}
