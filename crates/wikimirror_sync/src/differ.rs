//! Page differ.
//!
//! Turns one fetched page state into the writes that make the mirror match
//! it. The differ does not read the mirror: property and restriction rows
//! that are no longer present are removed with keep-set deletes, which
//! leave exactly the rows named in the snapshot.

use rand::Rng;
use std::collections::BTreeMap;
use wikimirror_protocol::{db_title, PageId, PageSnapshot, PageState, ProtocolResult, RawPage};
use wikimirror_store::{KeepSet, Operation, PagePropRow, PageRow, RestrictionRow};

/// Whether stale rows are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Only upserts. Used while enumerating every page in a full sync,
    /// where deletions cannot be observed anyway.
    InsertOnly,
    /// Upserts followed by keep-set deletes; missing pages are archived and
    /// deleted.
    Reconcile,
}

/// Converts page states into mirror operations.
pub struct Differ<R> {
    namespaces: BTreeMap<i32, String>,
    rng: R,
}

impl<R: Rng> Differ<R> {
    /// Creates a differ for a site with the given namespace names.
    ///
    /// `rng` draws the random sort key of every upserted page.
    pub fn new(namespaces: BTreeMap<i32, String>, rng: R) -> Self {
        Self { namespaces, rng }
    }

    /// Validates a raw snapshot and diffs it.
    ///
    /// # Errors
    ///
    /// Returns the [`wikimirror_protocol::ShapeError`] of an incomplete
    /// snapshot.
    pub fn diff_raw(&mut self, raw: RawPage, mode: DiffMode) -> ProtocolResult<Vec<Operation>> {
        let state = raw.validate()?;
        Ok(self.diff(&state, mode))
    }

    /// Operations that bring the mirror in line with `state`.
    ///
    /// For a present page the order is: page upsert, property upserts,
    /// restriction upserts, property delete, restriction delete. For a
    /// missing page it is: archive revisions, delete page.
    pub fn diff(&mut self, state: &PageState, mode: DiffMode) -> Vec<Operation> {
        match (state, mode) {
            (PageState::Missing { .. }, DiffMode::InsertOnly) => Vec::new(),
            (PageState::Missing { page_id }, DiffMode::Reconcile) => vec![
                Operation::MoveRevisionsToArchive { page_id: *page_id },
                Operation::DeletePage { page_id: *page_id },
            ],
            (PageState::Present(snapshot), mode) => {
                let mut ops = self.inserts(snapshot);
                if mode == DiffMode::Reconcile {
                    ops.extend(deletes(snapshot));
                }
                ops
            }
        }
    }

    fn inserts(&mut self, snapshot: &PageSnapshot) -> Vec<Operation> {
        let page_id = snapshot.page_id;
        let mut ops = Vec::with_capacity(1 + snapshot.properties.len() + snapshot.restrictions.len());

        ops.push(Operation::UpsertPage(PageRow {
            page_id,
            namespace: snapshot.namespace,
            title: db_title(&snapshot.title, snapshot.namespace, &self.namespaces),
            is_redirect: snapshot.is_redirect,
            is_new: snapshot.is_new,
            random: self.rng.gen::<f64>(),
            touched: snapshot.touched,
            latest: snapshot.latest_revision,
            length: snapshot.length,
            content_model: snapshot.content_model.clone(),
            language: snapshot.language.clone(),
        }));

        ops.extend(snapshot.properties.iter().map(|(name, value)| {
            Operation::UpsertPageProp(PagePropRow {
                page_id,
                name: name.clone(),
                value: value.clone(),
            })
        }));

        // cascaded entries belong to the page that requested the cascade
        ops.extend(snapshot.direct_restrictions().map(|restriction| {
            Operation::UpsertPageRestriction(RestrictionRow {
                page_id,
                kind: restriction.kind.clone(),
                level: restriction.level.clone(),
                cascade: restriction.cascade,
                expiry: restriction.expiry.clone(),
            })
        }));

        ops
    }
}

fn deletes(snapshot: &PageSnapshot) -> [Operation; 2] {
    [
        Operation::DeletePageProps {
            page_id: snapshot.page_id,
            keep: KeepSet::from_keys(snapshot.property_names()),
        },
        Operation::DeletePageRestrictions {
            page_id: snapshot.page_id,
            keep: KeepSet::from_keys(snapshot.restriction_types()),
        },
    ]
}

/// Deletes every property and restriction of a stored page.
///
/// Queued at the start of a full pass, before any upsert, so the rows the
/// enumeration writes back are the only ones left.
pub(crate) fn detach_children(page_id: PageId) -> [Operation; 2] {
    [
        Operation::DeletePageProps {
            page_id,
            keep: KeepSet::Nothing,
        },
        Operation::DeletePageRestrictions {
            page_id,
            keep: KeepSet::Nothing,
        },
    ]
}
