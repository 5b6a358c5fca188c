//! MediaWiki timestamps.
//!
//! The API reports ISO 8601 timestamps with second precision in UTC
//! (`2024-01-31T12:00:00Z`). The store keeps them in the same textual form
//! so that lexicographic order matches chronological order.

use crate::error::TimestampError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// A point in time as reported by the remote wiki.
pub type Timestamp = DateTime<Utc>;

/// Parses an API timestamp.
///
/// Accepts full RFC 3339 as well as the bare `YYYY-MM-DDTHH:MM:SS` form some
/// older endpoints emit without the trailing `Z`.
pub fn parse_timestamp(value: &str) -> Result<Timestamp, TimestampError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|err| TimestampError {
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Formats a timestamp the way the API does.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
