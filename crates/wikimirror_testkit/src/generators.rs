//! Property-based test generators using proptest.
//!
//! Mutations pick their target by index into the wiki's current page list
//! (modulo its length), so any generated sequence can be applied to any
//! wiki. Mutations that make no sense at apply time, such as moving onto a
//! taken title, are skipped.

use crate::fake::FakeWiki;
use proptest::prelude::*;

/// Namespaces mutations create pages in.
pub const NAMESPACES: [i32; 3] = [0, 1, 10];

/// A single change made to a [`FakeWiki`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WikiMutation {
    /// Create a page.
    Create {
        /// Index into [`NAMESPACES`].
        namespace: usize,
        /// Title without prefix.
        name: String,
    },
    /// Save a new revision.
    Edit {
        /// Target page index.
        target: usize,
    },
    /// Set a page property.
    SetProp {
        /// Target page index.
        target: usize,
        /// Property name.
        name: String,
        /// Property value.
        value: String,
    },
    /// Remove a page property.
    RemoveProp {
        /// Target page index.
        target: usize,
        /// Property name.
        name: String,
    },
    /// Protect an action.
    Protect {
        /// Target page index.
        target: usize,
        /// Restricted action.
        kind: String,
        /// Required group.
        level: String,
    },
    /// Lift a protection.
    Unprotect {
        /// Target page index.
        target: usize,
        /// Restricted action.
        kind: String,
    },
    /// Move a page within its namespace.
    Move {
        /// Target page index.
        target: usize,
        /// New title without prefix.
        name: String,
        /// Whether a redirect stays at the old title.
        leave_redirect: bool,
    },
    /// Delete a page.
    Delete {
        /// Target page index.
        target: usize,
    },
}

impl WikiMutation {
    /// Applies the mutation. Returns false if it was skipped.
    pub fn apply(&self, wiki: &FakeWiki) -> bool {
        if let WikiMutation::Create { namespace, name } = self {
            let namespace = NAMESPACES[namespace % NAMESPACES.len()];
            return wiki.create_page(namespace, name).is_some();
        }

        let ids = wiki.page_ids();
        if ids.is_empty() {
            return false;
        }
        let pick = |target: &usize| ids[target % ids.len()];

        match self {
            WikiMutation::Create { .. } => false,
            WikiMutation::Edit { target } => wiki.edit_page(pick(target)),
            WikiMutation::SetProp {
                target,
                name,
                value,
            } => wiki.set_prop(pick(target), name, value),
            WikiMutation::RemoveProp { target, name } => wiki.remove_prop(pick(target), name),
            WikiMutation::Protect {
                target,
                kind,
                level,
            } => wiki.protect(pick(target), kind, level),
            WikiMutation::Unprotect { target, kind } => wiki.unprotect(pick(target), kind),
            WikiMutation::Move {
                target,
                name,
                leave_redirect,
            } => wiki.move_page(pick(target), name, *leave_redirect).is_some(),
            WikiMutation::Delete { target } => wiki.delete_page(pick(target)),
        }
    }
}

/// Applies every mutation in order. Returns how many were applied.
pub fn apply_all(wiki: &FakeWiki, mutations: &[WikiMutation]) -> usize {
    mutations.iter().filter(|m| m.apply(wiki)).count()
}

/// Strategy for page titles drawn from a small pool, so that moves and
/// creations collide with existing titles now and then.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "Alpha", "Beta", "Gamma", "Delta", "Main Page", "Sandbox", "Help", "Foo", "Bar",
    ])
    .prop_map(str::to_string)
}

/// Strategy for page property names.
pub fn prop_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["displaytitle", "noindex", "defaultsort", "wikibase_item"])
        .prop_map(str::to_string)
}

/// Strategy for restricted actions.
pub fn restriction_kind_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["edit", "move", "upload"]).prop_map(str::to_string)
}

/// Strategy for protection levels.
pub fn restriction_level_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["autoconfirmed", "sysop"]).prop_map(str::to_string)
}

/// Strategy for a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = WikiMutation> {
    let target = 0..64usize;
    prop_oneof![
        3 => (0..NAMESPACES.len(), title_strategy())
            .prop_map(|(namespace, name)| WikiMutation::Create { namespace, name }),
        3 => target.clone().prop_map(|target| WikiMutation::Edit { target }),
        2 => (target.clone(), prop_name_strategy(), "[a-z]{0,6}")
            .prop_map(|(target, name, value)| WikiMutation::SetProp { target, name, value }),
        1 => (target.clone(), prop_name_strategy())
            .prop_map(|(target, name)| WikiMutation::RemoveProp { target, name }),
        1 => (target.clone(), restriction_kind_strategy(), restriction_level_strategy())
            .prop_map(|(target, kind, level)| WikiMutation::Protect { target, kind, level }),
        1 => (target.clone(), restriction_kind_strategy())
            .prop_map(|(target, kind)| WikiMutation::Unprotect { target, kind }),
        2 => (target.clone(), title_strategy(), any::<bool>())
            .prop_map(|(target, name, leave_redirect)| WikiMutation::Move {
                target,
                name,
                leave_redirect,
            }),
        1 => target.prop_map(|target| WikiMutation::Delete { target }),
    ]
}

/// Strategy for a sequence of up to `max_len` mutations.
pub fn mutation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<WikiMutation>> {
    prop::collection::vec(mutation_strategy(), 0..=max_len)
}
