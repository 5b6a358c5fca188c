//! Remote collaborators of the sync engine.
//!
//! The engine never talks HTTP itself. Everything it needs from the remote
//! wiki goes through the two traits below, so sessions, authentication and
//! retry policy stay with the caller.

use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use wikimirror_protocol::{ChangeRecord, FeedKind, PageId, RawPage, Timestamp};

/// Page snapshot queries against the remote wiki.
///
/// Snapshots are the `info|pageprops` properties with `inprop=protection`.
pub trait WikiApi: Send + Sync {
    /// Maximum number of ids or titles accepted by one query.
    fn max_ids_per_query(&self) -> usize;

    /// Namespace numbers and their canonical local names.
    fn namespaces(&self) -> SyncResult<BTreeMap<i32, String>>;

    /// Snapshots of the given page ids. Ids that no longer exist come back
    /// as `missing` entries.
    fn pages_by_ids(&self, ids: &[PageId]) -> SyncResult<Vec<RawPage>>;

    /// Snapshots of the given full titles. Titles without a page come back
    /// as `missing` entries without a `pageid`.
    fn pages_by_titles(&self, titles: &[String]) -> SyncResult<Vec<RawPage>>;

    /// One page of the listing of every page in `namespace`.
    ///
    /// Pass the returned continuation back to get the next page; `None`
    /// starts from the beginning.
    fn list_namespace(&self, namespace: i32, continuation: Option<&str>)
        -> SyncResult<PageListing>;
}

/// A page of a namespace listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageListing {
    /// Snapshots in this page of results.
    pub pages: Vec<RawPage>,
    /// Token for the next page, `None` on the last one.
    pub continuation: Option<String>,
}

/// Read access to the remote change logs.
pub trait ChangeFeed: Send + Sync {
    /// Timestamp of the oldest record still held by `feed`, `None` if the
    /// feed is empty.
    fn oldest_timestamp(&self, feed: FeedKind) -> SyncResult<Option<Timestamp>>;

    /// Every record of `feed` with a timestamp at or after `since`, oldest
    /// first. The recent-changes feed returns edits, creations and log
    /// events; the log feed returns log events only.
    fn changes_since(&self, feed: FeedKind, since: Timestamp) -> SyncResult<Vec<ChangeRecord>>;
}

impl<T: WikiApi + ?Sized> WikiApi for Arc<T> {
    fn max_ids_per_query(&self) -> usize {
        (**self).max_ids_per_query()
    }

    fn namespaces(&self) -> SyncResult<BTreeMap<i32, String>> {
        (**self).namespaces()
    }

    fn pages_by_ids(&self, ids: &[PageId]) -> SyncResult<Vec<RawPage>> {
        (**self).pages_by_ids(ids)
    }

    fn pages_by_titles(&self, titles: &[String]) -> SyncResult<Vec<RawPage>> {
        (**self).pages_by_titles(titles)
    }

    fn list_namespace(&self, namespace: i32, continuation: Option<&str>)
        -> SyncResult<PageListing> {
        (**self).list_namespace(namespace, continuation)
    }
}

impl<T: ChangeFeed + ?Sized> ChangeFeed for Arc<T> {
    fn oldest_timestamp(&self, feed: FeedKind) -> SyncResult<Option<Timestamp>> {
        (**self).oldest_timestamp(feed)
    }

    fn changes_since(&self, feed: FeedKind, since: Timestamp) -> SyncResult<Vec<ChangeRecord>> {
        (**self).changes_since(feed, since)
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use parking_lot::Mutex;

    /// Canned answers for unit tests.
    #[derive(Default)]
    pub(crate) struct Stub {
        pub recent: Vec<ChangeRecord>,
        pub logs: Vec<ChangeRecord>,
        pub titles: BTreeMap<String, PageId>,
        pub pages: BTreeMap<PageId, RawPage>,
        pub title_queries: Mutex<Vec<Vec<String>>>,
    }

    impl WikiApi for Stub {
        fn max_ids_per_query(&self) -> usize {
            2
        }

        fn namespaces(&self) -> SyncResult<BTreeMap<i32, String>> {
            Ok(BTreeMap::from([(-1, "Special".to_string()), (0, String::new())]))
        }

        fn pages_by_ids(&self, ids: &[PageId]) -> SyncResult<Vec<RawPage>> {
            Ok(ids
                .iter()
                .map(|id| {
                    self.pages.get(id).cloned().unwrap_or_else(|| RawPage {
                        pageid: Some(*id),
                        missing: true,
                        ..RawPage::default()
                    })
                })
                .collect())
        }

        fn pages_by_titles(&self, titles: &[String]) -> SyncResult<Vec<RawPage>> {
            self.title_queries.lock().push(titles.to_vec());
            Ok(titles
                .iter()
                .map(|title| RawPage {
                    pageid: self.titles.get(title).copied(),
                    title: Some(title.clone()),
                    missing: !self.titles.contains_key(title),
                    ..RawPage::default()
                })
                .collect())
        }

        fn list_namespace(&self, namespace: i32, _continuation: Option<&str>) -> SyncResult<PageListing> {
            Ok(PageListing {
                pages: self
                    .pages
                    .values()
                    .filter(|page| page.ns == Some(namespace))
                    .cloned()
                    .collect(),
                continuation: None,
            })
        }
    }

    impl ChangeFeed for Stub {
        fn oldest_timestamp(&self, feed: FeedKind) -> SyncResult<Option<Timestamp>> {
            Ok(self.records(feed).first().map(|change| change.timestamp))
        }

        fn changes_since(&self, feed: FeedKind, since: Timestamp) -> SyncResult<Vec<ChangeRecord>> {
            Ok(self
                .records(feed)
                .iter()
                .filter(|change| change.timestamp >= since)
                .cloned()
                .collect())
        }
    }

    impl Stub {
        fn records(&self, feed: FeedKind) -> &[ChangeRecord] {
            match feed {
                FeedKind::RecentChanges => &self.recent,
                FeedKind::LogEvents => &self.logs,
            }
        }
    }
}
