//! An in-memory wiki.
//!
//! [`FakeWiki`] implements both [`WikiApi`] and [`ChangeFeed`] over a
//! small page model, and records changes the way MediaWiki does:
//!
//! - creating a page writes a `new` record, editing one an `edit` record
//! - deletions, protections and moves write a log event to both feeds
//! - a move logs the *source* title and does not write a `new` record for
//!   the redirect it leaves behind
//!
//! Every mutation advances a one-second clock, so records have distinct,
//! increasing timestamps.

use chrono::{Duration, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use wikimirror_protocol::{ChangeRecord, FeedKind, PageId, RawPage, RawRestriction, Timestamp};
use wikimirror_sync::{ChangeFeed, PageListing, SyncError, SyncResult, WikiApi};

/// Default number of ids the fake accepts per query.
pub const DEFAULT_MAX_IDS: usize = 50;

/// Default number of pages per listing page.
pub const DEFAULT_LISTING_LIMIT: usize = 3;

#[derive(Debug, Clone)]
struct FakePage {
    namespace: i32,
    /// Title without namespace prefix.
    name: String,
    redirect: bool,
    revisions: u32,
    latest: i64,
    length: i64,
    touched: Timestamp,
    props: BTreeMap<String, String>,
    restrictions: BTreeMap<String, RawRestriction>,
    cascaded: Vec<RawRestriction>,
}

#[derive(Debug)]
struct WikiState {
    clock: Timestamp,
    next_page_id: PageId,
    next_rev_id: i64,
    namespaces: BTreeMap<i32, String>,
    pages: BTreeMap<PageId, FakePage>,
    recent: Vec<ChangeRecord>,
    logs: Vec<ChangeRecord>,
    max_ids: usize,
    listing_limit: usize,
    failure: Option<String>,
    corrupt: BTreeSet<PageId>,
    id_queries: Vec<Vec<PageId>>,
}

impl WikiState {
    fn tick(&mut self) -> Timestamp {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn full_title(&self, namespace: i32, name: &str) -> String {
        match self.namespaces.get(&namespace) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{name}"),
            _ => name.to_string(),
        }
    }

    fn find(&self, namespace: i32, name: &str) -> Option<PageId> {
        self.pages
            .iter()
            .find(|(_, page)| page.namespace == namespace && page.name == name)
            .map(|(id, _)| *id)
    }

    fn find_full_title(&self, full_title: &str) -> Option<PageId> {
        self.pages
            .iter()
            .find(|(_, page)| self.full_title(page.namespace, &page.name) == full_title)
            .map(|(id, _)| *id)
    }

    fn new_revision(&mut self, page_id: PageId) -> Timestamp {
        let now = self.tick();
        let rev_id = self.next_rev_id;
        self.next_rev_id += 1;
        if let Some(page) = self.pages.get_mut(&page_id) {
            page.revisions += 1;
            page.latest = rev_id;
            page.length += 7;
            page.touched = now;
        }
        now
    }

    fn edit(&mut self, page_id: PageId, change: impl FnOnce(&mut FakePage)) -> bool {
        let Some(page) = self.pages.get_mut(&page_id) else {
            return false;
        };
        change(page);
        let (namespace, name) = (page.namespace, page.name.clone());
        let now = self.new_revision(page_id);
        let title = self.full_title(namespace, &name);
        self.recent.push(ChangeRecord::edit(now, page_id, title));
        true
    }

    fn log(&mut self, page_id: PageId, title: String, log_type: &str, log_action: &str) {
        let now = self.tick();
        let record = ChangeRecord::log(now, page_id, title, log_type, log_action);
        self.recent.push(record.clone());
        self.logs.push(record);
    }

    fn snapshot(&self, page_id: PageId, page: &FakePage) -> RawPage {
        let protection = page
            .restrictions
            .values()
            .chain(page.cascaded.iter())
            .cloned()
            .collect();
        RawPage {
            pageid: Some(page_id),
            ns: Some(page.namespace),
            title: Some(self.full_title(page.namespace, &page.name)),
            missing: false,
            redirect: page.redirect,
            new: page.revisions == 1,
            touched: (!self.corrupt.contains(&page_id)).then_some(page.touched),
            lastrevid: Some(page.latest),
            length: Some(page.length),
            contentmodel: Some("wikitext".into()),
            pagelanguage: Some("en".into()),
            pageprops: page.props.clone(),
            protection: Some(protection),
        }
    }

    fn check_failure(&self) -> SyncResult<()> {
        match &self.failure {
            Some(message) => Err(SyncError::transport_retryable(message.clone())),
            None => Ok(()),
        }
    }

    fn check_batch(&self, len: usize) -> SyncResult<()> {
        if len > self.max_ids {
            return Err(SyncError::transport_fatal(format!(
                "too many values: {len} > {}",
                self.max_ids
            )));
        }
        Ok(())
    }
}

/// A scriptable wiki shared between a test and the engine under test.
///
/// Clones share state, so the same wiki can be handed to the engine as
/// both collaborators and still be mutated by the test.
#[derive(Debug, Clone)]
pub struct FakeWiki {
    state: Arc<RwLock<WikiState>>,
}

impl Default for FakeWiki {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWiki {
    /// Creates an empty wiki whose clock starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let namespaces = BTreeMap::from([
            (-2, "Media".to_string()),
            (-1, "Special".to_string()),
            (0, String::new()),
            (1, "Talk".to_string()),
            (2, "User".to_string()),
            (4, "Project".to_string()),
            (10, "Template".to_string()),
        ]);
        let clock = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
        Self {
            state: Arc::new(RwLock::new(WikiState {
                clock,
                next_page_id: 1,
                next_rev_id: 1,
                namespaces,
                pages: BTreeMap::new(),
                recent: Vec::new(),
                logs: Vec::new(),
                max_ids: DEFAULT_MAX_IDS,
                listing_limit: DEFAULT_LISTING_LIMIT,
                failure: None,
                corrupt: BTreeSet::new(),
                id_queries: Vec::new(),
            })),
        }
    }

    /// Sets the number of ids or titles accepted per query.
    #[must_use]
    pub fn with_max_ids(self, max_ids: usize) -> Self {
        self.state.write().max_ids = max_ids.max(1);
        self
    }

    /// Sets the number of pages per namespace listing page.
    #[must_use]
    pub fn with_listing_limit(self, limit: usize) -> Self {
        self.state.write().listing_limit = limit.max(1);
        self
    }

    /// Current time of the wiki clock.
    pub fn now(&self) -> Timestamp {
        self.state.read().clock
    }

    /// Advances the clock by one second and returns the new time.
    ///
    /// Use the result as the start time of a sync pass: every change made
    /// before the call is older, every change made after it is newer.
    pub fn tick(&self) -> Timestamp {
        self.state.write().tick()
    }

    /// Advances the clock by `seconds`.
    pub fn advance(&self, seconds: i64) -> Timestamp {
        let mut state = self.state.write();
        state.clock += Duration::seconds(seconds);
        state.clock
    }

    /// Creates a page with one revision. Returns `None` if the title is
    /// taken.
    pub fn create_page(&self, namespace: i32, name: &str) -> Option<PageId> {
        let mut state = self.state.write();
        if state.find(namespace, name).is_some() {
            return None;
        }
        let page_id = state.next_page_id;
        state.next_page_id += 1;
        let touched = state.clock;
        state.pages.insert(
            page_id,
            FakePage {
                namespace,
                name: name.to_string(),
                redirect: false,
                revisions: 0,
                latest: 0,
                length: 0,
                touched,
                props: BTreeMap::new(),
                restrictions: BTreeMap::new(),
                cascaded: Vec::new(),
            },
        );
        let now = state.new_revision(page_id);
        let title = state.full_title(namespace, name);
        state.recent.push(ChangeRecord::new_page(now, page_id, title));
        Some(page_id)
    }

    /// Saves a new revision of a page.
    pub fn edit_page(&self, page_id: PageId) -> bool {
        self.state.write().edit(page_id, |_| ())
    }

    /// Sets a page property through an edit.
    pub fn set_prop(&self, page_id: PageId, name: &str, value: &str) -> bool {
        self.state.write().edit(page_id, |page| {
            page.props.insert(name.to_string(), value.to_string());
        })
    }

    /// Removes a page property through an edit.
    pub fn remove_prop(&self, page_id: PageId, name: &str) -> bool {
        self.state.write().edit(page_id, |page| {
            page.props.remove(name);
        })
    }

    /// Protects one action of a page.
    pub fn protect(&self, page_id: PageId, kind: &str, level: &str) -> bool {
        self.set_protection(page_id, kind, Some((level, false)))
    }

    /// Protects one action of a page and cascades it to `targets`.
    pub fn protect_cascading(&self, page_id: PageId, kind: &str, level: &str, targets: &[PageId]) -> bool {
        if !self.set_protection(page_id, kind, Some((level, true))) {
            return false;
        }
        let mut state = self.state.write();
        let Some(source) = state
            .pages
            .get(&page_id)
            .map(|page| state.full_title(page.namespace, &page.name))
        else {
            return false;
        };
        for target in targets {
            if let Some(page) = state.pages.get_mut(target) {
                page.cascaded.push(RawRestriction {
                    kind: Some(kind.to_string()),
                    level: Some(level.to_string()),
                    expiry: Some("infinity".into()),
                    cascade: false,
                    source: Some(source.clone()),
                });
            }
        }
        true
    }

    /// Lifts the protection of one action.
    pub fn unprotect(&self, page_id: PageId, kind: &str) -> bool {
        self.set_protection(page_id, kind, None)
    }

    fn set_protection(&self, page_id: PageId, kind: &str, level: Option<(&str, bool)>) -> bool {
        let mut state = self.state.write();
        let Some(page) = state.pages.get_mut(&page_id) else {
            return false;
        };
        let action = match level {
            Some((level, cascade)) => {
                page.restrictions.insert(
                    kind.to_string(),
                    RawRestriction {
                        kind: Some(kind.to_string()),
                        level: Some(level.to_string()),
                        expiry: Some("infinity".into()),
                        cascade,
                        source: None,
                    },
                );
                "protect"
            }
            None => {
                if page.restrictions.remove(kind).is_none() {
                    return false;
                }
                "unprotect"
            }
        };
        let (namespace, name) = (page.namespace, page.name.clone());
        let title = state.full_title(namespace, &name);
        state.log(page_id, title, "protect", action);
        true
    }

    /// Moves a page to a new name in the same namespace.
    ///
    /// Returns `None` if the page does not exist or the target is taken,
    /// otherwise the id of the redirect left behind, if any.
    pub fn move_page(&self, page_id: PageId, new_name: &str, leave_redirect: bool) -> Option<Option<PageId>> {
        let mut state = self.state.write();
        let page = state.pages.get(&page_id)?;
        let (namespace, old_name) = (page.namespace, page.name.clone());
        if state.find(namespace, new_name).is_some() {
            return None;
        }

        state.new_revision(page_id);
        if let Some(page) = state.pages.get_mut(&page_id) {
            page.name = new_name.to_string();
        }
        let old_title = state.full_title(namespace, &old_name);
        state.log(page_id, old_title, "move", "move");

        if !leave_redirect {
            return Some(None);
        }
        let redirect_id = state.next_page_id;
        state.next_page_id += 1;
        let touched = state.clock;
        state.pages.insert(
            redirect_id,
            FakePage {
                namespace,
                name: old_name,
                redirect: true,
                revisions: 0,
                latest: 0,
                length: 0,
                touched,
                props: BTreeMap::new(),
                restrictions: BTreeMap::new(),
                cascaded: Vec::new(),
            },
        );
        state.new_revision(redirect_id);
        Some(Some(redirect_id))
    }

    /// Deletes a page.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.write();
        let Some(page) = state.pages.remove(&page_id) else {
            return false;
        };
        let title = state.full_title(page.namespace, &page.name);
        for other in state.pages.values_mut() {
            other.cascaded.retain(|r| r.source.as_deref() != Some(title.as_str()));
        }
        state.log(page_id, title, "delete", "delete");
        true
    }

    /// Drops recent-changes records older than `cutoff`.
    pub fn purge_recent_changes_before(&self, cutoff: Timestamp) {
        self.state.write().recent.retain(|r| r.timestamp >= cutoff);
    }

    /// Drops log records older than `cutoff`.
    pub fn purge_logs_before(&self, cutoff: Timestamp) {
        self.state.write().logs.retain(|r| r.timestamp >= cutoff);
    }

    /// Makes every API call fail with a retryable transport error, or
    /// clears the failure with `None`.
    pub fn fail_transport(&self, message: Option<&str>) {
        self.state.write().failure = message.map(str::to_string);
    }

    /// Makes the snapshot of `page_id` omit its `touched` field.
    pub fn corrupt_page(&self, page_id: PageId) {
        self.state.write().corrupt.insert(page_id);
    }

    /// Ids of every existing page.
    pub fn page_ids(&self) -> Vec<PageId> {
        self.state.read().pages.keys().copied().collect()
    }

    /// Id of the page at `namespace` / `name`.
    pub fn find(&self, namespace: i32, name: &str) -> Option<PageId> {
        self.state.read().find(namespace, name)
    }

    /// Current snapshot of a page.
    pub fn snapshot(&self, page_id: PageId) -> Option<RawPage> {
        let state = self.state.read();
        state.pages.get(&page_id).map(|page| state.snapshot(page_id, page))
    }

    /// Number of revisions of a page.
    pub fn revision_count(&self, page_id: PageId) -> u32 {
        self.state.read().pages.get(&page_id).map_or(0, |page| page.revisions)
    }

    /// Every `pages_by_ids` query received so far.
    pub fn id_queries(&self) -> Vec<Vec<PageId>> {
        self.state.read().id_queries.clone()
    }

    /// Records currently held by `feed`.
    pub fn records(&self, feed: FeedKind) -> Vec<ChangeRecord> {
        let state = self.state.read();
        match feed {
            FeedKind::RecentChanges => state.recent.clone(),
            FeedKind::LogEvents => state.logs.clone(),
        }
    }
}

impl WikiApi for FakeWiki {
    fn max_ids_per_query(&self) -> usize {
        self.state.read().max_ids
    }

    fn namespaces(&self) -> SyncResult<BTreeMap<i32, String>> {
        let state = self.state.read();
        state.check_failure()?;
        Ok(state.namespaces.clone())
    }

    fn pages_by_ids(&self, ids: &[PageId]) -> SyncResult<Vec<RawPage>> {
        let mut state = self.state.write();
        state.check_failure()?;
        state.check_batch(ids.len())?;
        state.id_queries.push(ids.to_vec());
        Ok(ids
            .iter()
            .map(|id| match state.pages.get(id) {
                Some(page) => state.snapshot(*id, page),
                None => RawPage {
                    pageid: Some(*id),
                    missing: true,
                    ..RawPage::default()
                },
            })
            .collect())
    }

    fn pages_by_titles(&self, titles: &[String]) -> SyncResult<Vec<RawPage>> {
        let state = self.state.read();
        state.check_failure()?;
        state.check_batch(titles.len())?;
        Ok(titles
            .iter()
            .map(|title| match state.find_full_title(title) {
                Some(id) => state.snapshot(id, &state.pages[&id]),
                None => RawPage {
                    title: Some(title.clone()),
                    missing: true,
                    ..RawPage::default()
                },
            })
            .collect())
    }

    fn list_namespace(&self, namespace: i32, continuation: Option<&str>) -> SyncResult<PageListing> {
        let state = self.state.read();
        state.check_failure()?;
        let from: PageId = match continuation {
            Some(token) => token
                .parse()
                .map_err(|_| SyncError::transport_fatal(format!("bad continuation {token:?}")))?,
            None => 0,
        };

        let mut matching = state
            .pages
            .range(from..)
            .filter(|(_, page)| page.namespace == namespace);
        let pages: Vec<RawPage> = matching
            .by_ref()
            .take(state.listing_limit)
            .map(|(id, page)| state.snapshot(*id, page))
            .collect();
        let continuation = matching.next().map(|(id, _)| id.to_string());
        Ok(PageListing {
            pages,
            continuation,
        })
    }
}

impl ChangeFeed for FakeWiki {
    fn oldest_timestamp(&self, feed: FeedKind) -> SyncResult<Option<Timestamp>> {
        let state = self.state.read();
        state.check_failure()?;
        let records = match feed {
            FeedKind::RecentChanges => &state.recent,
            FeedKind::LogEvents => &state.logs,
        };
        Ok(records.first().map(|r| r.timestamp))
    }

    fn changes_since(&self, feed: FeedKind, since: Timestamp) -> SyncResult<Vec<ChangeRecord>> {
        let state = self.state.read();
        state.check_failure()?;
        let records = match feed {
            FeedKind::RecentChanges => &state.recent,
            FeedKind::LogEvents => &state.logs,
        };
        Ok(records.iter().filter(|r| r.timestamp >= since).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikimirror_protocol::{ChangeKind, PageState};

    #[test]
    fn creation_and_edit_records() {
        let wiki = FakeWiki::new();
        let id = wiki.create_page(1, "Sandbox").unwrap();
        assert!(wiki.create_page(1, "Sandbox").is_none());
        assert!(wiki.edit_page(id));

        let recent = wiki.records(FeedKind::RecentChanges);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, ChangeKind::New);
        assert_eq!(recent[0].title.as_deref(), Some("Talk:Sandbox"));
        assert_eq!(recent[1].kind, ChangeKind::Edit);
        assert!(recent[0].timestamp < recent[1].timestamp);
        assert!(wiki.records(FeedKind::LogEvents).is_empty());
    }

    #[test]
    fn move_logs_source_title_without_creation_record() {
        let wiki = FakeWiki::new();
        let id = wiki.create_page(0, "Foo").unwrap();
        let redirect = wiki.move_page(id, "Bar", true).unwrap().unwrap();

        let recent = wiki.records(FeedKind::RecentChanges);
        assert_eq!(recent.len(), 2);
        assert!(recent[1].is_move());
        assert_eq!(recent[1].page_id, id);
        assert_eq!(recent[1].title.as_deref(), Some("Foo"));

        assert_eq!(wiki.find(0, "Foo"), Some(redirect));
        assert_eq!(wiki.find(0, "Bar"), Some(id));
        assert!(wiki.snapshot(redirect).unwrap().redirect);
    }

    #[test]
    fn snapshots_validate() {
        let wiki = FakeWiki::new();
        let id = wiki.create_page(0, "A").unwrap();
        wiki.set_prop(id, "noindex", "");
        wiki.protect(id, "edit", "sysop");

        let state = wiki.pages_by_ids(&[id, 99]).unwrap();
        assert!(matches!(state[0].clone().validate().unwrap(), PageState::Present(_)));
        assert!(matches!(
            state[1].clone().validate().unwrap(),
            PageState::Missing { page_id: 99 }
        ));

        wiki.corrupt_page(id);
        assert!(wiki.snapshot(id).unwrap().validate().is_err());
    }

    #[test]
    fn listing_is_paginated() {
        let wiki = FakeWiki::new().with_listing_limit(2);
        for name in ["A", "B", "C", "D", "E"] {
            wiki.create_page(0, name);
        }
        wiki.create_page(1, "Other");

        let mut seen = 0;
        let mut continuation = None;
        loop {
            let listing = wiki.list_namespace(0, continuation.as_deref()).unwrap();
            assert!(listing.pages.len() <= 2);
            seen += listing.pages.len();
            match listing.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn transport_failure_is_retryable() {
        let wiki = FakeWiki::new();
        wiki.fail_transport(Some("connection reset"));
        assert!(wiki.namespaces().unwrap_err().is_retryable());
        wiki.fail_transport(None);
        assert!(wiki.namespaces().is_ok());
    }
}
