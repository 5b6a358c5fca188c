//! Revision history rows.
//!
//! The sync engine never writes revisions itself; they are loaded by a
//! separate import. It only moves them to the archive when their page is
//! deleted, so these types exist for seeding and inspecting the mirror.

use wikimirror_protocol::{PageId, Timestamp};

/// A row of the `revision` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRow {
    /// Revision id.
    pub rev_id: i64,
    /// Owning page.
    pub page_id: PageId,
    /// Id of the stored text blob.
    pub text_id: Option<i64>,
    /// Edit summary.
    pub comment: String,
    /// Author user id (0 for anonymous edits).
    pub user: i64,
    /// Author name or address.
    pub user_text: String,
    /// Save timestamp.
    pub timestamp: Timestamp,
    /// Minor edit flag.
    pub minor_edit: bool,
    /// Visibility bitfield.
    pub deleted: i64,
    /// Length in bytes.
    pub len: Option<i64>,
    /// Previous revision of the page.
    pub parent_id: Option<i64>,
    /// Base-36 SHA-1 of the text.
    pub sha1: String,
    /// Content model.
    pub content_model: Option<String>,
    /// Content format.
    pub content_format: Option<String>,
}

impl RevisionRow {
    /// A minimal revision of `page_id`, for seeding.
    pub fn new(rev_id: i64, page_id: PageId, timestamp: Timestamp) -> Self {
        Self {
            rev_id,
            page_id,
            text_id: None,
            comment: String::new(),
            user: 0,
            user_text: String::new(),
            timestamp,
            minor_edit: false,
            deleted: 0,
            len: None,
            parent_id: None,
            sha1: String::new(),
            content_model: None,
            content_format: None,
        }
    }

    /// Sets the edit summary.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_user(mut self, user: i64, user_text: impl Into<String>) -> Self {
        self.user = user;
        self.user_text = user_text.into();
        self
    }

    /// Sets the parent revision.
    #[must_use]
    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// A row of the `archive` table.
///
/// An archived revision keeps the namespace and title its page had at
/// deletion time, since the page row itself is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRow {
    /// Archive row id, assigned in insertion order.
    pub ar_id: i64,
    /// Namespace of the deleted page.
    pub namespace: i32,
    /// Title of the deleted page.
    pub title: String,
    /// The archived revision, `rev_id` and `page_id` included.
    pub revision: RevisionRow,
}
