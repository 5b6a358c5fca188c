//! Change discovery.
//!
//! Decides whether a pass can be incremental and, if so, which pages it
//! has to refresh.
//!
//! ## Mode decision
//!
//! | watermark | recent changes | log events | outcome                                  |
//! |-----------|----------------|------------|------------------------------------------|
//! | none      | -              | -          | full, no candidates                      |
//! | set       | covers         | -          | incremental                              |
//! | set       | purged         | covers     | full, log pages reconciled first         |
//! | set       | purged         | purged     | full, no candidates (warning)            |
//!
//! A feed "covers" the watermark when its oldest record is not newer than
//! it. An empty feed covers nothing.

use crate::config::UnresolvedMovePolicy;
use crate::error::{DiscoveryError, SyncResult};
use crate::transport::{ChangeFeed, WikiApi};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};
use wikimirror_protocol::{ChangeRecord, FeedKind, PageId, Timestamp};

/// How a pass reconciles the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Enumerate every page of the site.
    Full,
    /// Refresh only the pages the change feeds name.
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Why a pass runs in full mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullSyncReason {
    /// The site has never been synced.
    InitialSync,
    /// Recent changes were purged past the watermark; the log feed still
    /// covers it.
    RetentionExceeded,
    /// No feed covers the watermark.
    DiscoveryImpossible,
    /// An operator asked for it.
    Requested,
}

/// Counters gathered while discovering changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Recent-changes records read.
    pub recent_changes: usize,
    /// Log records read.
    pub log_events: usize,
    /// Move sources looked up by title.
    pub move_titles: usize,
    /// Move sources that resolved to a page.
    pub moves_resolved: usize,
    /// Move sources with no page behind them.
    pub moves_unresolved: usize,
}

/// The decision of change discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Pass mode.
    pub mode: SyncMode,
    /// Set when `mode` is [`SyncMode::Full`].
    pub full_reason: Option<FullSyncReason>,
    /// Pages to reconcile, deletions included. In full mode these are
    /// reconciled before the enumeration.
    pub candidates: BTreeSet<PageId>,
    /// Counters.
    pub report: DiscoveryReport,
}

impl DiscoveryOutcome {
    /// A full pass with nothing to reconcile first.
    pub fn full(reason: FullSyncReason) -> Self {
        Self {
            mode: SyncMode::Full,
            full_reason: Some(reason),
            candidates: BTreeSet::new(),
            report: DiscoveryReport::default(),
        }
    }
}

/// Change discovery against one pair of collaborators.
pub struct Discovery<'a, A: WikiApi + ?Sized, F: ChangeFeed + ?Sized> {
    api: &'a A,
    feed: &'a F,
    policy: UnresolvedMovePolicy,
    batch_size: usize,
}

impl<'a, A: WikiApi + ?Sized, F: ChangeFeed + ?Sized> Discovery<'a, A, F> {
    /// Creates a discovery that resolves move titles in batches of at most
    /// `batch_size`.
    pub fn new(api: &'a A, feed: &'a F, policy: UnresolvedMovePolicy, batch_size: usize) -> Self {
        Self {
            api,
            feed,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// Decides the mode of a pass starting from watermark `since`.
    ///
    /// Retention gaps are not errors here: they select full mode.
    ///
    /// # Errors
    ///
    /// Returns transport errors of the collaborators unchanged.
    pub fn discover(&self, since: Option<Timestamp>) -> SyncResult<DiscoveryOutcome> {
        let Some(since) = since else {
            info!("no watermark, running initial full sync");
            return Ok(DiscoveryOutcome::full(FullSyncReason::InitialSync));
        };

        let Some(exceeded) = self.retention_gap(FeedKind::RecentChanges, since)? else {
            return self.incremental(since);
        };
        info!(reason = %exceeded, "recent changes do not cover the watermark");

        if let Some(gap) = self.retention_gap(FeedKind::LogEvents, since)? {
            let impossible = DiscoveryError::DiscoveryImpossible { since };
            warn!(error = %impossible, reason = %gap, "falling back to full sync");
            return Ok(DiscoveryOutcome::full(FullSyncReason::DiscoveryImpossible));
        }

        let mut outcome = DiscoveryOutcome::full(FullSyncReason::RetentionExceeded);
        let mut moves = BTreeSet::new();
        self.scan_log_events(since, &mut outcome, &mut moves)?;
        self.resolve_moves(moves, &mut outcome)?;
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    fn incremental(&self, since: Timestamp) -> SyncResult<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome {
            mode: SyncMode::Incremental,
            full_reason: None,
            candidates: BTreeSet::new(),
            report: DiscoveryReport::default(),
        };
        let mut moves = BTreeSet::new();

        for change in self.feed.changes_since(FeedKind::RecentChanges, since)? {
            outcome.report.recent_changes += 1;
            add_candidate(&mut outcome.candidates, &change);
            if let Some(title) = move_source(&change) {
                moves.insert(title.to_string());
            }
        }

        // Deletions and protections are also in recent changes, but the log
        // feed can still name pages whose rc rows were hidden or lost.
        if self.retention_gap(FeedKind::LogEvents, since)?.is_none() {
            self.scan_log_events(since, &mut outcome, &mut moves)?;
        } else {
            debug!("log events do not cover the watermark, using recent changes only");
        }

        self.resolve_moves(moves, &mut outcome)?;
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    /// Returns the retention error if `feed` does not reach back to `since`.
    fn retention_gap(&self, feed: FeedKind, since: Timestamp) -> SyncResult<Option<DiscoveryError>> {
        let oldest = self.feed.oldest_timestamp(feed)?;
        if oldest.is_none() {
            warn!(
                %feed,
                %since,
                watermark_age_secs = watermark_age(since, Utc::now()).num_seconds(),
                "feed is empty, a quiet wiki cannot be told from a purged feed"
            );
        }
        let covered = oldest.is_some_and(|oldest| oldest <= since);
        Ok((!covered).then_some(DiscoveryError::RetentionExceeded {
            feed,
            oldest,
            since,
        }))
    }

    fn scan_log_events(
        &self,
        since: Timestamp,
        outcome: &mut DiscoveryOutcome,
        moves: &mut BTreeSet<String>,
    ) -> SyncResult<()> {
        for change in self.feed.changes_since(FeedKind::LogEvents, since)? {
            outcome.report.log_events += 1;
            if !change.affects_page_state() {
                continue;
            }
            add_candidate(&mut outcome.candidates, &change);
            if let Some(title) = move_source(&change) {
                moves.insert(title.to_string());
            }
        }
        Ok(())
    }

    /// Looks up the pages now sitting at the source titles of moves.
    ///
    /// A move does not produce a creation record for the redirect it leaves
    /// behind, so this lookup is the only way to learn the redirect's id.
    fn resolve_moves(&self, titles: BTreeSet<String>, outcome: &mut DiscoveryOutcome) -> SyncResult<()> {
        if titles.is_empty() {
            return Ok(());
        }
        outcome.report.move_titles = titles.len();

        let titles: Vec<String> = titles.into_iter().collect();
        for chunk in titles.chunks(self.batch_size) {
            for page in self.api.pages_by_titles(chunk)? {
                match page.pageid.filter(|_| !page.missing) {
                    Some(page_id) => {
                        outcome.report.moves_resolved += 1;
                        outcome.candidates.insert(page_id);
                    }
                    None => {
                        outcome.report.moves_unresolved += 1;
                        if self.policy == UnresolvedMovePolicy::Warn {
                            warn!(
                                title = page.title.as_deref().unwrap_or("<unknown>"),
                                "moved page left no redirect behind, skipping"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn log_outcome(&self, outcome: &DiscoveryOutcome) {
        info!(
            mode = %outcome.mode,
            candidates = outcome.candidates.len(),
            recent_changes = outcome.report.recent_changes,
            log_events = outcome.report.log_events,
            moves_resolved = outcome.report.moves_resolved,
            moves_unresolved = outcome.report.moves_unresolved,
            "discovered changed pages"
        );
    }
}

/// Time elapsed since the watermark, zero for a watermark in the future.
fn watermark_age(since: Timestamp, now: Timestamp) -> Duration {
    (now - since).max(Duration::zero())
}

fn add_candidate(candidates: &mut BTreeSet<PageId>, change: &ChangeRecord) {
    if change.page_id != 0 {
        candidates.insert(change.page_id);
    }
}

fn move_source(change: &ChangeRecord) -> Option<&str> {
    if change.is_move() {
        change.title.as_deref()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::Stub;
    use std::collections::BTreeMap;
    use wikimirror_protocol::parse_timestamp;

    fn ts(value: &str) -> Timestamp {
        parse_timestamp(value).unwrap()
    }

    fn discover(stub: &Stub, since: Option<Timestamp>) -> DiscoveryOutcome {
        Discovery::new(stub, stub, UnresolvedMovePolicy::Warn, stub.max_ids_per_query())
            .discover(since)
            .unwrap()
    }

    #[test]
    fn no_watermark_is_initial_full_sync() {
        let outcome = discover(&Stub::default(), None);
        assert_eq!(outcome.mode, SyncMode::Full);
        assert_eq!(outcome.full_reason, Some(FullSyncReason::InitialSync));
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn incremental_collects_deduplicated_ids() {
        let stub = Stub {
            recent: vec![
                ChangeRecord::edit(ts("2024-01-01T00:00:00Z"), 1, "Old"),
                ChangeRecord::edit(ts("2024-01-05T00:00:00Z"), 2, "A"),
                ChangeRecord::new_page(ts("2024-01-06T00:00:00Z"), 3, "B"),
                ChangeRecord::edit(ts("2024-01-07T00:00:00Z"), 2, "A"),
                ChangeRecord::log(ts("2024-01-08T00:00:00Z"), 0, "Nowhere", "delete", "delete"),
            ],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-02T00:00:00Z")));
        assert_eq!(outcome.mode, SyncMode::Incremental);
        assert_eq!(outcome.full_reason, None);
        assert_eq!(outcome.candidates, BTreeSet::from([2, 3]));
        assert_eq!(outcome.report.recent_changes, 4);
    }

    #[test]
    fn move_source_title_is_resolved() {
        let stub = Stub {
            recent: vec![
                ChangeRecord::edit(ts("2024-01-01T00:00:00Z"), 1, "Old"),
                ChangeRecord::log(ts("2024-01-05T00:00:00Z"), 10, "Foo", "move", "move"),
            ],
            titles: BTreeMap::from([("Foo".to_string(), 11)]),
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-02T00:00:00Z")));
        assert_eq!(outcome.candidates, BTreeSet::from([10, 11]));
        assert_eq!(outcome.report.moves_resolved, 1);
    }

    #[test]
    fn unresolved_move_is_dropped() {
        let stub = Stub {
            recent: vec![
                ChangeRecord::edit(ts("2024-01-01T00:00:00Z"), 1, "Old"),
                ChangeRecord::log(ts("2024-01-05T00:00:00Z"), 10, "Gone", "move", "move"),
            ],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-02T00:00:00Z")));
        assert_eq!(outcome.candidates, BTreeSet::from([10]));
        assert_eq!(outcome.report.moves_unresolved, 1);
    }

    #[test]
    fn move_titles_are_batched() {
        let recent = std::iter::once(ChangeRecord::edit(ts("2024-01-01T00:00:00Z"), 1, "Old"))
            .chain((0..5).map(|i| {
                ChangeRecord::log(ts("2024-01-05T00:00:00Z"), 100 + i, format!("T{i}"), "move", "move")
            }))
            .collect();
        let stub = Stub {
            recent,
            ..Stub::default()
        };

        discover(&stub, Some(ts("2024-01-02T00:00:00Z")));
        let sizes: Vec<usize> = stub.title_queries.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn purged_recent_changes_fall_back_to_log_feed() {
        let stub = Stub {
            recent: vec![ChangeRecord::edit(ts("2024-03-01T00:00:00Z"), 1, "A")],
            logs: vec![
                ChangeRecord::log(ts("2023-01-01T00:00:00Z"), 5, "Ancient", "delete", "delete"),
                ChangeRecord::log(ts("2024-02-01T00:00:00Z"), 6, "Deleted", "delete", "delete"),
                ChangeRecord::log(ts("2024-02-02T00:00:00Z"), 7, "Locked", "protect", "protect"),
                ChangeRecord::log(ts("2024-02-03T00:00:00Z"), 8, "Someone", "newusers", "create"),
            ],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-15T00:00:00Z")));
        assert_eq!(outcome.mode, SyncMode::Full);
        assert_eq!(outcome.full_reason, Some(FullSyncReason::RetentionExceeded));
        assert_eq!(outcome.candidates, BTreeSet::from([6, 7]));
        assert_eq!(outcome.report.log_events, 3);
    }

    #[test]
    fn no_feed_covering_is_discovery_impossible() {
        let stub = Stub {
            recent: vec![ChangeRecord::edit(ts("2024-03-01T00:00:00Z"), 1, "A")],
            logs: vec![ChangeRecord::log(ts("2024-03-01T00:00:00Z"), 2, "B", "delete", "delete")],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-15T00:00:00Z")));
        assert_eq!(outcome.mode, SyncMode::Full);
        assert_eq!(outcome.full_reason, Some(FullSyncReason::DiscoveryImpossible));
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn empty_recent_changes_do_not_cover() {
        let stub = Stub {
            logs: vec![ChangeRecord::log(ts("2024-01-01T00:00:00Z"), 2, "B", "delete", "delete")],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-15T00:00:00Z")));
        assert_eq!(outcome.full_reason, Some(FullSyncReason::RetentionExceeded));
    }

    #[test]
    fn both_feeds_empty_is_discovery_impossible() {
        let outcome = discover(&Stub::default(), Some(ts("2024-01-15T00:00:00Z")));
        assert_eq!(outcome.mode, SyncMode::Full);
        assert_eq!(outcome.full_reason, Some(FullSyncReason::DiscoveryImpossible));
        assert!(outcome.candidates.is_empty());
    }

    #[test]
    fn watermark_age_is_clamped_at_zero() {
        let since = ts("2024-01-15T00:00:00Z");
        assert_eq!(
            watermark_age(since, ts("2024-01-15T06:00:00Z")),
            Duration::hours(6)
        );
        assert_eq!(watermark_age(since, ts("2024-01-14T00:00:00Z")), Duration::zero());
    }

    #[test]
    fn incremental_merges_log_feed() {
        let stub = Stub {
            recent: vec![
                ChangeRecord::edit(ts("2024-01-01T00:00:00Z"), 1, "Old"),
                ChangeRecord::edit(ts("2024-01-05T00:00:00Z"), 2, "A"),
            ],
            logs: vec![
                ChangeRecord::log(ts("2023-06-01T00:00:00Z"), 3, "Before", "delete", "delete"),
                ChangeRecord::log(ts("2024-01-06T00:00:00Z"), 2, "A", "protect", "protect"),
                ChangeRecord::log(ts("2024-01-06T00:00:00Z"), 4, "B", "delete", "delete"),
            ],
            ..Stub::default()
        };

        let outcome = discover(&stub, Some(ts("2024-01-02T00:00:00Z")));
        assert_eq!(outcome.mode, SyncMode::Incremental);
        assert_eq!(outcome.candidates, BTreeSet::from([2, 4]));
    }
}
