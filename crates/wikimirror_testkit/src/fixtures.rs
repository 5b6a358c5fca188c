//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up mirror stores, engines
//! wired to a [`FakeWiki`], and common wiki scenarios.

use crate::fake::FakeWiki;
use std::path::PathBuf;
use tempfile::TempDir;
use wikimirror_protocol::{PageId, Timestamp};
use wikimirror_store::{MirrorStore, PagePropRow, PageRow, RestrictionRow, RevisionRow};
use wikimirror_sync::{MirrorConfig, SyncEngine};

/// Site key used by the fixtures.
pub const TEST_SITE: &str = "testwiki";

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: MirrorStore,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: MirrorStore::open_in_memory().expect("Failed to open in-memory store"),
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test store.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = MirrorStore::open(temp_dir.path().join("mirror.sqlite"))
            .expect("Failed to open file store");
        Self {
            store,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.store.path().map(PathBuf::from)
    }

    /// Stores `count` revisions of `page_id`, one second apart from
    /// `first`. Revision ids start at `page_id * 1000`.
    pub fn seed_revisions(&mut self, page_id: PageId, count: i64, first: Timestamp) {
        let revisions: Vec<RevisionRow> = (0..count)
            .map(|n| {
                let rev_id = page_id * 1000 + n;
                let revision = RevisionRow::new(rev_id, page_id, first + chrono::Duration::seconds(n))
                    .with_user(1, "Tester")
                    .with_comment(format!("revision {n}"));
                if n == 0 {
                    revision
                } else {
                    revision.with_parent(rev_id - 1)
                }
            })
            .collect();
        self.store
            .insert_revisions(&revisions)
            .expect("Failed to seed revisions");
    }

    /// Everything the mirror holds about pages, for comparisons.
    pub fn contents(&self) -> MirrorContents {
        mirror_contents(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = MirrorStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::ops::DerefMut for TestStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

/// The page, property and restriction tables of a mirror.
///
/// Random sort keys are zeroed: they are drawn per upsert and differ
/// between two mirrors of the same wiki.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorContents {
    /// Page rows ordered by id.
    pub pages: Vec<PageRow>,
    /// Property rows ordered by page and name.
    pub props: Vec<PagePropRow>,
    /// Restriction rows ordered by page and type.
    pub restrictions: Vec<RestrictionRow>,
}

/// Reads the comparable contents of a mirror.
pub fn mirror_contents(store: &MirrorStore) -> MirrorContents {
    let pages = store
        .pages()
        .expect("Failed to read pages")
        .into_iter()
        .map(|row| PageRow { random: 0.0, ..row })
        .collect();
    MirrorContents {
        pages,
        props: store.all_page_props().expect("Failed to read page props"),
        restrictions: store.all_restrictions().expect("Failed to read restrictions"),
    }
}

/// Configuration used by [`engine_for`]: the test site and a fixed seed.
pub fn test_config() -> MirrorConfig {
    MirrorConfig::new(TEST_SITE).with_rng_seed(7)
}

/// An engine reading from `wiki` with [`test_config`].
pub fn engine_for(wiki: &FakeWiki) -> SyncEngine<FakeWiki, FakeWiki> {
    engine_with(wiki, test_config())
}

/// An engine reading from `wiki` with a custom configuration.
pub fn engine_with(wiki: &FakeWiki, config: MirrorConfig) -> SyncEngine<FakeWiki, FakeWiki> {
    SyncEngine::new(config, wiki.clone(), wiki.clone())
}

/// Mirrors `wiki` from scratch into a new in-memory store.
pub fn fresh_mirror(wiki: &FakeWiki) -> TestStore {
    let mut store = TestStore::memory();
    engine_for(wiki)
        .sync_at(&mut store, wiki.tick())
        .expect("Fresh full sync failed");
    store
}

/// Common test scenarios.
pub mod scenarios {
    use super::*;

    /// A small wiki: three articles, a talk page and a template, with
    /// properties and protections.
    ///
    /// Returns the wiki and the ids in creation order.
    pub fn small_wiki() -> (FakeWiki, Vec<PageId>) {
        let wiki = FakeWiki::new();
        let mut ids = Vec::new();
        for (namespace, name) in [
            (0, "Main Page"),
            (0, "Alpha"),
            (0, "Beta"),
            (1, "Alpha"),
            (10, "Infobox"),
        ] {
            ids.push(wiki.create_page(namespace, name).expect("duplicate title"));
        }
        wiki.set_prop(ids[0], "displaytitle", "Welcome");
        wiki.set_prop(ids[1], "noindex", "");
        wiki.set_prop(ids[1], "defaultsort", "Alpha");
        wiki.protect(ids[0], "edit", "sysop");
        wiki.protect(ids[0], "move", "sysop");
        wiki.protect_cascading(ids[4], "edit", "sysop", &[ids[2]]);
        (wiki, ids)
    }

    /// Creates `count` pages in the main namespace named `Page 0`,
    /// `Page 1`, ...
    pub fn many_pages(wiki: &FakeWiki, count: usize) -> Vec<PageId> {
        (0..count)
            .filter_map(|n| wiki.create_page(0, &format!("Page {n}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_memory() {
        let store = TestStore::memory();
        assert!(store.path().is_none());
        assert_eq!(store.page_count().unwrap(), 0);
    }

    #[test]
    fn test_store_file() {
        let store = TestStore::file();
        assert!(store.path().is_some());
    }

    #[test]
    fn fresh_mirror_of_small_wiki() {
        let (wiki, ids) = scenarios::small_wiki();
        let store = fresh_mirror(&wiki);
        let contents = store.contents();

        assert_eq!(contents.pages.len(), ids.len());
        assert!(contents.pages.iter().all(|row| row.random == 0.0));
        assert_eq!(store.page_props(ids[1]).unwrap().len(), 2);
        // the cascaded entry on Beta stays with Template:Infobox
        assert!(store.page_restrictions(ids[2]).unwrap().is_empty());
        assert!(store.page_restrictions(ids[4]).unwrap()[0].cascade);
    }

    #[test]
    fn seeded_revisions_chain() {
        let (wiki, ids) = scenarios::small_wiki();
        let mut store = fresh_mirror(&wiki);
        store.seed_revisions(ids[0], 3, wiki.now());

        let revisions = store.revisions(ids[0]).unwrap();
        assert_eq!(revisions.len(), 3);
        assert_eq!(revisions[2].parent_id, Some(revisions[1].rev_id));
    }
}
