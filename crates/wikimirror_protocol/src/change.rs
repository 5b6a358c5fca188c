//! Change feed records.

use crate::page::PageId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which remote change log a query is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// `list=recentchanges`: every edit, creation and log event, purged
    /// after a few weeks.
    RecentChanges,
    /// `list=logevents`: log events only, kept much longer.
    LogEvents,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::RecentChanges => f.write_str("recentchanges"),
            FeedKind::LogEvents => f.write_str("logevents"),
        }
    }
}

/// Type of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// An edit of an existing page.
    Edit,
    /// Creation of a page.
    New,
    /// A log event (move, delete, protect, ...).
    Log,
}

/// A single record of a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// When the change happened.
    pub timestamp: Timestamp,
    /// Type of the record.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Affected page. Zero for log events on pages that never existed.
    #[serde(rename = "pageid")]
    pub page_id: PageId,
    /// Title the record refers to. For moves this is the source title,
    /// which now holds the redirect left behind by the move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Log type (`move`, `delete`, `protect`, ...) for log events.
    #[serde(rename = "logtype", default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
    /// Log action (`move`, `move_redir`, `delete`, ...) for log events.
    #[serde(rename = "logaction", default, skip_serializing_if = "Option::is_none")]
    pub log_action: Option<String>,
}

impl ChangeRecord {
    /// Creates an edit record.
    pub fn edit(timestamp: Timestamp, page_id: PageId, title: impl Into<String>) -> Self {
        Self::plain(timestamp, ChangeKind::Edit, page_id, title.into())
    }

    /// Creates a page creation record.
    pub fn new_page(timestamp: Timestamp, page_id: PageId, title: impl Into<String>) -> Self {
        Self::plain(timestamp, ChangeKind::New, page_id, title.into())
    }

    /// Creates a log event record.
    pub fn log(
        timestamp: Timestamp,
        page_id: PageId,
        title: impl Into<String>,
        log_type: impl Into<String>,
        log_action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind: ChangeKind::Log,
            page_id,
            title: Some(title.into()),
            log_type: Some(log_type.into()),
            log_action: Some(log_action.into()),
        }
    }

    fn plain(timestamp: Timestamp, kind: ChangeKind, page_id: PageId, title: String) -> Self {
        Self {
            timestamp,
            kind,
            page_id,
            title: Some(title),
            log_type: None,
            log_action: None,
        }
    }

    /// Returns true for page move log events.
    ///
    /// A move leaves a redirect at the source title without emitting a
    /// creation record for it, so the title has to be resolved separately.
    pub fn is_move(&self) -> bool {
        self.kind == ChangeKind::Log && self.log_type.as_deref() == Some("move")
    }

    /// Returns true for log events that change what the mirror stores
    /// about a page: deletions, protection changes and moves.
    pub fn affects_page_state(&self) -> bool {
        self.kind == ChangeKind::Log
            && matches!(self.log_type.as_deref(), Some("delete" | "protect" | "move"))
    }
}
