//! Incremental passes end up where a fresh full sync does.

use proptest::prelude::*;
use wikimirror_sync::SyncMode;
use wikimirror_testkit::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn incremental_passes_converge_with_full_sync(
        rounds in prop::collection::vec(mutation_sequence_strategy(12), 1..4)
    ) {
        let (wiki, _) = scenarios::small_wiki();
        let mut store = TestStore::memory();
        let engine = engine_for(&wiki);
        engine.sync_at(&mut store, wiki.tick()).unwrap();

        for round in &rounds {
            apply_all(&wiki, round);
            let report = engine.sync_at(&mut store, wiki.tick()).unwrap();
            prop_assert_eq!(report.mode, SyncMode::Incremental);
        }

        prop_assert_eq!(store.contents(), fresh_mirror(&wiki).contents());
    }

    #[test]
    fn passes_from_an_empty_wiki_converge(
        rounds in prop::collection::vec(mutation_sequence_strategy(12), 1..4)
    ) {
        let wiki = FakeWiki::new();
        let mut store = TestStore::memory();
        let engine = engine_with(&wiki, test_config().with_chunk_size(3));
        engine.sync_at(&mut store, wiki.tick()).unwrap();

        for round in &rounds {
            apply_all(&wiki, round);
            engine.sync_at(&mut store, wiki.tick()).unwrap();
        }

        prop_assert_eq!(store.contents(), fresh_mirror(&wiki).contents());
    }

    #[test]
    fn repeated_pass_is_a_no_op(mutations in mutation_sequence_strategy(20)) {
        let (wiki, _) = scenarios::small_wiki();
        let mut store = TestStore::memory();
        let engine = engine_for(&wiki);
        engine.sync_at(&mut store, wiki.tick()).unwrap();

        apply_all(&wiki, &mutations);
        engine.sync_at(&mut store, wiki.tick()).unwrap();
        let settled = store.contents();

        let report = engine.sync_at(&mut store, wiki.tick()).unwrap();
        prop_assert_eq!(report.mode, SyncMode::Incremental);
        prop_assert_eq!(report.queue.executed, 0);
        prop_assert_eq!(store.contents(), settled);
    }
}
