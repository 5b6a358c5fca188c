//! Configuration for the sync engine.

use std::collections::BTreeSet;

/// Default number of operations per statement shape before the execution
/// queue flushes.
pub const DEFAULT_CHUNK_SIZE: usize = 5000;

/// What to do with a move whose source title no longer resolves to a page.
///
/// A move that suppressed its redirect leaves nothing behind at the old
/// title, so the lookup comes back empty. The moved page itself is still a
/// candidate either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedMovePolicy {
    /// Drop the title silently.
    Ignore,
    /// Drop the title and log a warning.
    #[default]
    Warn,
}

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Key under which the watermark of this site is stored.
    pub site: String,
    /// Execution queue chunk size.
    pub chunk_size: usize,
    /// Upper bound on ids or titles per API query. The API's own maximum
    /// always applies; this can only lower it.
    pub fetch_batch_size: Option<usize>,
    /// Handling of unresolvable move sources.
    pub unresolved_move_policy: UnresolvedMovePolicy,
    /// Namespaces enumerated by a full sync. `None` means every
    /// non-negative namespace the site reports.
    pub namespaces: Option<BTreeSet<i32>>,
    /// Seed for the page random sort keys. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl MirrorConfig {
    /// Creates a configuration for `site` with default settings.
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_batch_size: None,
            unresolved_move_policy: UnresolvedMovePolicy::default(),
            namespaces: None,
            rng_seed: None,
        }
    }

    /// Sets the execution queue chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Caps the number of ids per API query.
    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = Some(size);
        self
    }

    /// Sets the unresolved move policy.
    pub fn with_unresolved_move_policy(mut self, policy: UnresolvedMovePolicy) -> Self {
        self.unresolved_move_policy = policy;
        self
    }

    /// Restricts full enumeration to the given namespaces.
    pub fn with_namespaces(mut self, namespaces: impl IntoIterator<Item = i32>) -> Self {
        self.namespaces = Some(namespaces.into_iter().collect());
        self
    }

    /// Seeds the random sort key generator.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Effective batch size for a collaborator that accepts at most
    /// `api_max` ids per query.
    pub fn batch_size(&self, api_max: usize) -> usize {
        self.fetch_batch_size
            .map_or(api_max, |size| size.min(api_max))
            .max(1)
    }

    /// Returns true if a full sync should enumerate `namespace`.
    pub fn enumerates(&self, namespace: i32) -> bool {
        namespace >= 0
            && self
                .namespaces
                .as_ref()
                .map_or(true, |selected| selected.contains(&namespace))
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
