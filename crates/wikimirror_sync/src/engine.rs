//! Sync engine state machine.

use crate::config::MirrorConfig;
use crate::differ::{detach_children, DiffMode, Differ};
use crate::discovery::{
    Discovery, DiscoveryOutcome, DiscoveryReport, FullSyncReason, SyncMode,
};
use crate::error::{SyncError, SyncResult};
use crate::transport::{ChangeFeed, WikiApi};
use chrono::Utc;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wikimirror_protocol::{PageId, PageState, Timestamp};
use wikimirror_store::{BatchExecutor, ExecutionQueue, MirrorStore, MirrorTransaction, QueueStats};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, no pass has run yet.
    Idle,
    /// Engine is reading the watermark and the change feeds.
    Discovering,
    /// Engine is enumerating every page.
    FullSync,
    /// Engine is refreshing changed pages.
    IncrementalSync,
    /// Engine is flushing the queue and committing.
    Committing,
    /// The last pass committed.
    Synced,
    /// The last pass failed and was rolled back.
    Error,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Discovering
                | SyncState::FullSync
                | SyncState::IncrementalSync
                | SyncState::Committing
        )
    }

    /// Returns true if the engine can start a new pass.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Cumulative statistics over every pass of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that committed.
    pub passes_completed: u64,
    /// Committed passes that ran in full mode.
    pub full_passes: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Page snapshots fetched by committed passes.
    pub pages_fetched: u64,
    /// Operations executed by committed passes.
    pub operations_executed: u64,
    /// Watermark written by the last committed pass.
    pub last_sync: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one committed pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Mode the pass ran in.
    pub mode: SyncMode,
    /// Why the pass was full, if it was.
    pub full_reason: Option<FullSyncReason>,
    /// Pages named by change discovery.
    pub candidates: usize,
    /// Snapshots fetched from the remote wiki.
    pub pages_fetched: u64,
    /// Execution queue counters.
    pub queue: QueueStats,
    /// Change discovery counters.
    pub discovery: DiscoveryReport,
    /// Watermark written by this pass.
    pub started_at: Timestamp,
    /// Wall-clock duration of the pass.
    pub duration: Duration,
}

/// The sync engine keeps a [`MirrorStore`] in line with a remote wiki.
///
/// One call to [`SyncEngine::sync`] is one pass: discover what changed,
/// fetch it, diff it, and write everything in a single transaction that also
/// advances the watermark. A failed pass leaves the store untouched.
///
/// Only one pass may run at a time; a second call while one is active fails
/// with [`SyncError::InvalidStateTransition`].
pub struct SyncEngine<A: WikiApi, F: ChangeFeed> {
    config: MirrorConfig,
    api: Arc<A>,
    feed: Arc<F>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    force_full: AtomicBool,
}

impl<A: WikiApi, F: ChangeFeed> SyncEngine<A, F> {
    /// Creates a new sync engine.
    pub fn new(config: MirrorConfig, api: A, feed: F) -> Self {
        Self {
            config,
            api: Arc::new(api),
            feed: Arc::new(feed),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            force_full: AtomicBool::new(false),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the running pass, or the next one if none is running.
    ///
    /// The flag is checked between fetch batches and cleared once a pass
    /// has been cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Makes the next pass run in full mode regardless of the change feeds.
    ///
    /// The request stays pending until a pass commits.
    pub fn force_full(&self) {
        self.force_full.store(true, Ordering::SeqCst);
    }

    /// Runs one pass, using the current time as the new watermark.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::sync_at`].
    pub fn sync(&self, store: &mut MirrorStore) -> SyncResult<SyncReport> {
        self.sync_at(store, Utc::now())
    }

    /// Runs one pass that records `started_at` as the new watermark.
    ///
    /// `started_at` must not be later than the moment discovery reads the
    /// change feeds, or changes made in between are missed by the next pass.
    ///
    /// # Errors
    ///
    /// Returns the first error of the pass; nothing is written in that case.
    pub fn sync_at(&self, store: &mut MirrorStore, started_at: Timestamp) -> SyncResult<SyncReport> {
        self.begin()?;
        let clock = Instant::now();

        match self.run_pass(store, started_at, clock) {
            Ok(report) => {
                self.force_full.store(false, Ordering::SeqCst);
                {
                    let mut stats = self.stats.write();
                    stats.passes_completed += 1;
                    if report.mode == SyncMode::Full {
                        stats.full_passes += 1;
                    }
                    stats.pages_fetched += report.pages_fetched;
                    stats.operations_executed += report.queue.executed;
                    stats.last_sync = Some(started_at);
                    stats.last_error = None;
                }
                self.set_state(SyncState::Synced);
                info!(
                    site = %self.config.site,
                    mode = %report.mode,
                    candidates = report.candidates,
                    pages = report.pages_fetched,
                    operations = report.queue.executed,
                    flushes = report.queue.flushes,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync pass committed"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_pass(
        &self,
        store: &mut MirrorStore,
        started_at: Timestamp,
        clock: Instant,
    ) -> SyncResult<SyncReport> {
        let since = store.watermark(&self.config.site)?;
        let batch_size = self.config.batch_size(self.api.max_ids_per_query());

        let outcome = if self.force_full.load(Ordering::SeqCst) {
            info!("full sync requested");
            DiscoveryOutcome::full(FullSyncReason::Requested)
        } else {
            Discovery::new(
                &*self.api,
                &*self.feed,
                self.config.unresolved_move_policy,
                batch_size,
            )
            .discover(since)?
        };
        self.check_cancelled()?;

        let namespaces = self.api.namespaces()?;
        let mut differ = Differ::new(namespaces.clone(), self.rng());
        let mut pages_fetched = 0u64;

        let mut tx = store.transaction()?;
        let stored = match outcome.mode {
            SyncMode::Full => self.stored_pages(&tx, &namespaces)?,
            SyncMode::Incremental => BTreeSet::new(),
        };
        let queue_stats = {
            let mut queue = ExecutionQueue::new(&mut tx, self.config.chunk_size)?;

            self.set_state(match outcome.mode {
                SyncMode::Full => SyncState::FullSync,
                SyncMode::Incremental => SyncState::IncrementalSync,
            });
            // must be queued before any upsert so they flush first
            for &page_id in &stored {
                queue.submit_all(detach_children(page_id))?;
            }
            pages_fetched +=
                self.refresh(&outcome.candidates, batch_size, &mut differ, &mut queue)?;
            if outcome.mode == SyncMode::Full {
                let listed = self.enumerate(&namespaces, &mut differ, &mut queue)?;
                pages_fetched += listed.len() as u64;
                self.sweep(&stored, &listed, &outcome.candidates, &mut differ, &mut queue)?;
            }

            self.set_state(SyncState::Committing);
            queue.finish()?
        };
        tx.set_watermark(&self.config.site, &started_at)?;
        tx.commit()?;

        Ok(SyncReport {
            mode: outcome.mode,
            full_reason: outcome.full_reason,
            candidates: outcome.candidates.len(),
            pages_fetched,
            queue: queue_stats,
            discovery: outcome.report,
            started_at,
            duration: clock.elapsed(),
        })
    }

    /// Fetches and reconciles the candidate pages, deletions included.
    fn refresh<E, R>(
        &self,
        candidates: &BTreeSet<PageId>,
        batch_size: usize,
        differ: &mut Differ<R>,
        queue: &mut ExecutionQueue<'_, E>,
    ) -> SyncResult<u64>
    where
        E: BatchExecutor + ?Sized,
        R: Rng,
    {
        if candidates.is_empty() {
            return Ok(0);
        }
        info!(pages = candidates.len(), "fetching modified pages");

        let ids: Vec<PageId> = candidates.iter().copied().collect();
        let mut fetched = 0u64;
        for chunk in ids.chunks(batch_size) {
            self.check_cancelled()?;
            for raw in self.api.pages_by_ids(chunk)? {
                fetched += 1;
                queue.submit_all(differ.diff_raw(raw, DiffMode::Reconcile)?)?;
            }
            debug!(batch = chunk.len(), pending = queue.pending_len(), "reconciled batch");
        }
        Ok(fetched)
    }

    /// Ids already mirrored in the namespaces a full pass enumerates.
    fn stored_pages(
        &self,
        tx: &MirrorTransaction<'_>,
        namespaces: &BTreeMap<i32, String>,
    ) -> SyncResult<BTreeSet<PageId>> {
        let mut stored = BTreeSet::new();
        for &namespace in namespaces.keys() {
            if self.config.enumerates(namespace) {
                stored.extend(tx.page_ids(namespace)?);
            }
        }
        if !stored.is_empty() {
            debug!(pages = stored.len(), "clearing children of mirrored pages");
        }
        Ok(stored)
    }

    /// Archives and deletes mirrored pages the enumeration did not return.
    ///
    /// Candidates were already reconciled by [`Self::refresh`].
    fn sweep<E, R>(
        &self,
        stored: &BTreeSet<PageId>,
        listed: &BTreeSet<PageId>,
        candidates: &BTreeSet<PageId>,
        differ: &mut Differ<R>,
        queue: &mut ExecutionQueue<'_, E>,
    ) -> SyncResult<()>
    where
        E: BatchExecutor + ?Sized,
        R: Rng,
    {
        let stale: Vec<PageId> = stored
            .difference(listed)
            .filter(|page_id| !candidates.contains(page_id))
            .copied()
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        info!(pages = stale.len(), "removing pages no longer listed");
        for page_id in stale {
            queue.submit_all(differ.diff(&PageState::Missing { page_id }, DiffMode::Reconcile))?;
        }
        Ok(())
    }

    /// Lists every page of every enumerated namespace and upserts it.
    ///
    /// Returns the ids of the listed pages.
    fn enumerate<E, R>(
        &self,
        namespaces: &BTreeMap<i32, String>,
        differ: &mut Differ<R>,
        queue: &mut ExecutionQueue<'_, E>,
    ) -> SyncResult<BTreeSet<PageId>>
    where
        E: BatchExecutor + ?Sized,
        R: Rng,
    {
        let mut listed = BTreeSet::new();
        for &namespace in namespaces.keys() {
            if !self.config.enumerates(namespace) {
                continue;
            }

            let mut continuation: Option<String> = None;
            let mut in_namespace = 0u64;
            loop {
                self.check_cancelled()?;
                let listing = self.api.list_namespace(namespace, continuation.as_deref())?;
                for raw in listing.pages {
                    in_namespace += 1;
                    listed.extend(raw.pageid);
                    queue.submit_all(differ.diff_raw(raw, DiffMode::InsertOnly)?)?;
                }
                match listing.continuation {
                    None => break,
                    Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                        return Err(SyncError::Protocol(format!(
                            "listing of namespace {namespace} did not advance past {next:?}"
                        )));
                    }
                    Some(next) => continuation = Some(next),
                }
            }
            debug!(namespace, pages = in_namespace, "enumerated namespace");
        }
        Ok(listed)
    }

    fn rng(&self) -> StdRng {
        match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Moves to `Discovering` if no pass is running.
    fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", SyncState::Discovering),
            });
        }
        *state = SyncState::Discovering;
        Ok(())
    }

    /// Fails with `Cancelled` if a cancellation is pending, consuming it.
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state.
    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        warn!(site = %self.config.site, error = %error, "sync pass rolled back");
        self.set_state(SyncState::Error);
        let mut stats = self.stats.write();
        stats.passes_failed += 1;
        stats.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::Stub;
    use wikimirror_protocol::{parse_timestamp, ChangeRecord, RawPage, RawRestriction};
    use wikimirror_store::StoreError;

    fn ts(value: &str) -> Timestamp {
        parse_timestamp(value).unwrap()
    }

    fn page(page_id: PageId, title: &str) -> RawPage {
        RawPage {
            pageid: Some(page_id),
            ns: Some(0),
            title: Some(title.to_string()),
            touched: Some(ts("2024-01-01T00:00:00Z")),
            lastrevid: Some(page_id * 100),
            length: Some(10),
            contentmodel: Some("wikitext".into()),
            pagelanguage: Some("en".into()),
            pageprops: BTreeMap::from([("p".to_string(), "v".to_string())]),
            protection: Some(vec![RawRestriction {
                kind: Some("edit".into()),
                level: Some("sysop".into()),
                expiry: Some("infinity".into()),
                ..RawRestriction::default()
            }]),
            ..RawPage::default()
        }
    }

    fn engine(stub: Stub) -> SyncEngine<Arc<Stub>, Arc<Stub>> {
        let stub = Arc::new(stub);
        SyncEngine::new(
            MirrorConfig::new("test").with_rng_seed(1),
            Arc::clone(&stub),
            stub,
        )
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Discovering.can_start_sync());
        assert!(!SyncState::Committing.can_start_sync());

        assert!(SyncState::FullSync.is_active());
        assert!(SyncState::IncrementalSync.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn sync_engine_initial_state() {
        let engine = engine(Stub::default());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().passes_completed, 0);
    }

    #[test]
    fn initial_pass_is_full_and_advances_watermark() {
        let stub = Stub {
            pages: BTreeMap::from([(1, page(1, "A")), (2, page(2, "B"))]),
            ..Stub::default()
        };
        let engine = engine(stub);
        let mut store = MirrorStore::open_in_memory().unwrap();

        let report = engine.sync_at(&mut store, ts("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(report.mode, SyncMode::Full);
        assert_eq!(report.full_reason, Some(FullSyncReason::InitialSync));
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.queue.executed, 6);

        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(store.page_count().unwrap(), 2);
        assert_eq!(
            store.watermark("test").unwrap(),
            Some(ts("2024-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn incremental_pass_deletes_missing_pages() {
        let stub = Stub {
            pages: BTreeMap::from([(1, page(1, "A"))]),
            recent: vec![
                ChangeRecord::new_page(ts("2024-01-01T00:00:00Z"), 1, "A"),
                ChangeRecord::log(ts("2024-02-02T00:00:00Z"), 2, "B", "delete", "delete"),
            ],
            ..Stub::default()
        };
        let engine = engine(stub);
        let mut store = MirrorStore::open_in_memory().unwrap();
        let tx = store.transaction().unwrap();
        tx.set_watermark("test", &ts("2024-01-15T00:00:00Z")).unwrap();
        tx.commit().unwrap();

        let report = engine.sync_at(&mut store, ts("2024-03-01T00:00:00Z")).unwrap();
        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.queue.executed, 2);
        assert_eq!(store.page_count().unwrap(), 0);
    }

    #[test]
    fn cancelled_pass_rolls_back() {
        let stub = Stub {
            pages: BTreeMap::from([(1, page(1, "A"))]),
            ..Stub::default()
        };
        let engine = engine(stub);
        let mut store = MirrorStore::open_in_memory().unwrap();

        engine.cancel();
        let err = engine.sync_at(&mut store, ts("2024-02-01T00:00:00Z")).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(store.watermark("test").unwrap(), None);

        // the cancellation is consumed
        engine.sync_at(&mut store, ts("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(store.page_count().unwrap(), 1);
    }

    #[test]
    fn zero_chunk_size_fails_the_pass() {
        let engine = SyncEngine::new(
            MirrorConfig::new("test").with_chunk_size(0),
            Stub::default(),
            Stub::default(),
        );
        let mut store = MirrorStore::open_in_memory().unwrap();

        let err = engine.sync(&mut store).unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::InvalidChunkSize)));
        assert_eq!(engine.stats().passes_failed, 1);
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn full_pass_over_populated_store_drops_stale_rows() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        let populated = engine(Stub {
            pages: BTreeMap::from([(1, page(1, "A")), (2, page(2, "B"))]),
            ..Stub::default()
        });
        populated.sync_at(&mut store, ts("2024-02-01T00:00:00Z")).unwrap();

        let mut bare = page(1, "A");
        bare.pageprops.clear();
        bare.protection = Some(Vec::new());
        let engine = engine(Stub {
            pages: BTreeMap::from([(1, bare)]),
            ..Stub::default()
        });
        engine.force_full();
        let report = engine.sync_at(&mut store, ts("2024-02-02T00:00:00Z")).unwrap();

        assert_eq!(report.full_reason, Some(FullSyncReason::Requested));
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(store.page_count().unwrap(), 1);
        assert!(store.page_props(1).unwrap().is_empty());
        assert!(store.page_restrictions(1).unwrap().is_empty());
        assert!(store.page(2).unwrap().is_none());
    }

    #[test]
    fn force_full_overrides_discovery_until_success() {
        let stub = Stub {
            pages: BTreeMap::from([(1, page(1, "A"))]),
            recent: vec![ChangeRecord::new_page(ts("2024-01-01T00:00:00Z"), 1, "A")],
            ..Stub::default()
        };
        let engine = engine(stub);
        let mut store = MirrorStore::open_in_memory().unwrap();
        engine.sync_at(&mut store, ts("2024-02-01T00:00:00Z")).unwrap();

        engine.force_full();
        let report = engine.sync_at(&mut store, ts("2024-02-02T00:00:00Z")).unwrap();
        assert_eq!(report.full_reason, Some(FullSyncReason::Requested));

        let report = engine.sync_at(&mut store, ts("2024-02-03T00:00:00Z")).unwrap();
        assert_eq!(report.mode, SyncMode::Incremental);
        assert_eq!(engine.stats().full_passes, 2);
    }
}
