//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ShapeError>;

/// A snapshot returned by the remote API is missing a mandatory field.
///
/// This is a contract violation on the remote side and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed page snapshot{}: missing field `{field}`", page_suffix(.page_id))]
pub struct ShapeError {
    /// Page the snapshot claimed to describe, if it carried an id at all.
    pub page_id: Option<i64>,
    /// Name of the missing field as it appears in the API response.
    pub field: &'static str,
}

impl ShapeError {
    /// Creates a shape error for a missing field.
    pub fn missing(page_id: Option<i64>, field: &'static str) -> Self {
        Self { page_id, field }
    }
}

fn page_suffix(page_id: &Option<i64>) -> String {
    match page_id {
        Some(id) => format!(" for page {id}"),
        None => String::new(),
    }
}

/// A timestamp string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp {value:?}: {reason}")]
pub struct TimestampError {
    /// The offending input.
    pub value: String,
    /// Parser message.
    pub reason: String,
}
