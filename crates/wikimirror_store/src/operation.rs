//! Typed write operations against the mirror schema.
//!
//! Every write the sync engine performs is one [`Operation`]. Operations
//! that share a [`StatementKey`] execute the same SQL with different
//! parameters, which is what lets the execution queue batch them.

use rusqlite::types::Value;
use std::collections::BTreeSet;
use std::fmt;
use wikimirror_protocol::{format_timestamp, PageId, Timestamp};

/// Shape of a parameterized statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementKey {
    /// Insert or overwrite a `page` row.
    UpsertPage,
    /// Insert or overwrite a `page_props` row.
    UpsertPageProp,
    /// Insert or overwrite a `page_restrictions` row.
    UpsertPageRestriction,
    /// Move all revisions of a page into `archive`.
    MoveRevisionsToArchive,
    /// Delete a `page` row (cascades to props and restrictions).
    DeletePage,
    /// Delete every property of a page.
    DeletePagePropsAll,
    /// Delete every property of a page except one.
    DeletePagePropsAllBut,
    /// Delete the properties of a page not in a keep-set of the given size.
    DeletePagePropsNotIn(usize),
    /// Delete every restriction of a page.
    DeletePageRestrictionsAll,
    /// Delete every restriction of a page except one type.
    DeletePageRestrictionsAllBut,
    /// Delete the restrictions of a page not in a keep-set of the given size.
    DeletePageRestrictionsNotIn(usize),
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKey::UpsertPage => f.write_str("upsert page"),
            StatementKey::UpsertPageProp => f.write_str("upsert page_props"),
            StatementKey::UpsertPageRestriction => f.write_str("upsert page_restrictions"),
            StatementKey::MoveRevisionsToArchive => f.write_str("move revision -> archive"),
            StatementKey::DeletePage => f.write_str("delete page"),
            StatementKey::DeletePagePropsAll => f.write_str("delete-all page_props"),
            StatementKey::DeletePagePropsAllBut => f.write_str("delete-but-one page_props"),
            StatementKey::DeletePagePropsNotIn(n) => write!(f, "delete-not-in({n}) page_props"),
            StatementKey::DeletePageRestrictionsAll => f.write_str("delete-all page_restrictions"),
            StatementKey::DeletePageRestrictionsAllBut => {
                f.write_str("delete-but-one page_restrictions")
            }
            StatementKey::DeletePageRestrictionsNotIn(n) => {
                write!(f, "delete-not-in({n}) page_restrictions")
            }
        }
    }
}

/// The child rows of a page that must survive a keep-set delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepSet {
    /// Keep nothing: delete every row of the page.
    Nothing,
    /// Keep exactly one key. Deleted with a cheaper `<>` comparison.
    One(String),
    /// Keep two or more keys.
    Many(BTreeSet<String>),
}

impl KeepSet {
    /// Chooses the cheapest representation for a set of keys.
    pub fn from_keys(mut keys: BTreeSet<String>) -> Self {
        match keys.len() {
            0 => KeepSet::Nothing,
            1 => match keys.pop_first() {
                Some(key) => KeepSet::One(key),
                None => KeepSet::Nothing,
            },
            _ => KeepSet::Many(keys),
        }
    }

    /// Returns true if `key` survives the delete.
    pub fn keeps(&self, key: &str) -> bool {
        match self {
            KeepSet::Nothing => false,
            KeepSet::One(kept) => kept == key,
            KeepSet::Many(kept) => kept.contains(key),
        }
    }
}

/// A row of the `page` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    /// Page id.
    pub page_id: PageId,
    /// Namespace number.
    pub namespace: i32,
    /// Title without namespace prefix, spaces replaced by underscores.
    pub title: String,
    /// Redirect flag.
    pub is_redirect: bool,
    /// Single-revision flag.
    pub is_new: bool,
    /// Random sort key in `[0, 1)`.
    pub random: f64,
    /// Last touched timestamp.
    pub touched: Timestamp,
    /// Latest revision id.
    pub latest: i64,
    /// Length in bytes.
    pub length: i64,
    /// Content model.
    pub content_model: String,
    /// Language code.
    pub language: String,
}

/// A row of the `page_props` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PagePropRow {
    /// Owning page.
    pub page_id: PageId,
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// A row of the `page_restrictions` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RestrictionRow {
    /// Owning page.
    pub page_id: PageId,
    /// Restricted action.
    pub kind: String,
    /// Required user group.
    pub level: String,
    /// Cascading flag.
    pub cascade: bool,
    /// Expiry timestamp or `infinity`.
    pub expiry: String,
}

/// A single write against the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert a page or overwrite every mirrored column of it.
    UpsertPage(PageRow),
    /// Insert a property or overwrite its value.
    UpsertPageProp(PagePropRow),
    /// Insert a restriction or overwrite its level, cascade flag and expiry.
    UpsertPageRestriction(RestrictionRow),
    /// Delete the properties of a page whose names are not kept.
    DeletePageProps {
        /// Owning page.
        page_id: PageId,
        /// Property names that survive.
        keep: KeepSet,
    },
    /// Delete the restrictions of a page whose types are not kept.
    DeletePageRestrictions {
        /// Owning page.
        page_id: PageId,
        /// Restriction types that survive.
        keep: KeepSet,
    },
    /// Move every revision of a page into the archive.
    MoveRevisionsToArchive {
        /// Page whose revisions move.
        page_id: PageId,
    },
    /// Delete a page row.
    DeletePage {
        /// Page to delete.
        page_id: PageId,
    },
}

impl Operation {
    /// Returns the statement shape this operation executes.
    pub fn statement_key(&self) -> StatementKey {
        match self {
            Operation::UpsertPage(_) => StatementKey::UpsertPage,
            Operation::UpsertPageProp(_) => StatementKey::UpsertPageProp,
            Operation::UpsertPageRestriction(_) => StatementKey::UpsertPageRestriction,
            Operation::DeletePageProps { keep, .. } => match keep {
                KeepSet::Nothing => StatementKey::DeletePagePropsAll,
                KeepSet::One(_) => StatementKey::DeletePagePropsAllBut,
                KeepSet::Many(keys) => StatementKey::DeletePagePropsNotIn(keys.len()),
            },
            Operation::DeletePageRestrictions { keep, .. } => match keep {
                KeepSet::Nothing => StatementKey::DeletePageRestrictionsAll,
                KeepSet::One(_) => StatementKey::DeletePageRestrictionsAllBut,
                KeepSet::Many(keys) => StatementKey::DeletePageRestrictionsNotIn(keys.len()),
            },
            Operation::MoveRevisionsToArchive { .. } => StatementKey::MoveRevisionsToArchive,
            Operation::DeletePage { .. } => StatementKey::DeletePage,
        }
    }

    /// Page this operation writes to.
    pub fn page_id(&self) -> PageId {
        match self {
            Operation::UpsertPage(row) => row.page_id,
            Operation::UpsertPageProp(row) => row.page_id,
            Operation::UpsertPageRestriction(row) => row.page_id,
            Operation::DeletePageProps { page_id, .. }
            | Operation::DeletePageRestrictions { page_id, .. }
            | Operation::MoveRevisionsToArchive { page_id }
            | Operation::DeletePage { page_id } => *page_id,
        }
    }

    /// Positional SQL parameters, in the order the statement for
    /// [`Operation::statement_key`] expects them.
    pub(crate) fn sql_params(&self) -> Vec<Value> {
        match self {
            Operation::UpsertPage(row) => vec![
                Value::Integer(row.page_id),
                Value::Integer(i64::from(row.namespace)),
                Value::Text(row.title.clone()),
                Value::Integer(i64::from(row.is_redirect)),
                Value::Integer(i64::from(row.is_new)),
                Value::Real(row.random),
                Value::Text(format_timestamp(&row.touched)),
                Value::Integer(row.latest),
                Value::Integer(row.length),
                Value::Text(row.content_model.clone()),
                Value::Text(row.language.clone()),
            ],
            Operation::UpsertPageProp(row) => vec![
                Value::Integer(row.page_id),
                Value::Text(row.name.clone()),
                Value::Text(row.value.clone()),
            ],
            Operation::UpsertPageRestriction(row) => vec![
                Value::Integer(row.page_id),
                Value::Text(row.kind.clone()),
                Value::Text(row.level.clone()),
                Value::Integer(i64::from(row.cascade)),
                Value::Text(row.expiry.clone()),
            ],
            Operation::DeletePageProps { page_id, keep }
            | Operation::DeletePageRestrictions { page_id, keep } => {
                let mut params = vec![Value::Integer(*page_id)];
                match keep {
                    KeepSet::Nothing => {}
                    KeepSet::One(key) => params.push(Value::Text(key.clone())),
                    KeepSet::Many(keys) => {
                        params.extend(keys.iter().cloned().map(Value::Text));
                    }
                }
                params
            }
            Operation::MoveRevisionsToArchive { page_id } | Operation::DeletePage { page_id } => {
                vec![Value::Integer(*page_id)]
            }
        }
    }
}
