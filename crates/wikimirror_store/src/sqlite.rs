//! SQLite-backed mirror store.

use crate::error::{StoreError, StoreResult};
use crate::executor::BatchExecutor;
use crate::operation::{Operation, PagePropRow, PageRow, RestrictionRow, StatementKey};
use crate::rows::{ArchiveRow, RevisionRow};
use crate::schema::{init_schema, statements_for};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use wikimirror_protocol::{format_timestamp, parse_timestamp, PageId, Timestamp};

const PAGE_COLUMNS: &str = "page_id, page_namespace, page_title, page_is_redirect, page_is_new, \
page_random, page_touched, page_latest, page_len, page_content_model, page_lang";

const REVISION_COLUMNS: &str = "rev_id, rev_page, rev_text_id, rev_comment, rev_user, \
rev_user_text, rev_timestamp, rev_minor_edit, rev_deleted, rev_len, rev_parent_id, rev_sha1, \
rev_content_model, rev_content_format";

const INSERT_REVISION: &str = "\
INSERT INTO revision (rev_id, rev_page, rev_text_id, rev_comment, rev_user, rev_user_text, \
rev_timestamp, rev_minor_edit, rev_deleted, rev_len, rev_parent_id, rev_sha1, \
rev_content_model, rev_content_format) \
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

/// A local mirror of the page tables of one or more wikis.
///
/// The store owns one SQLite connection. Every sync pass writes through a
/// single [`MirrorTransaction`], so a failed pass leaves no trace.
///
/// # Example
///
/// ```rust
/// use wikimirror_store::MirrorStore;
///
/// let store = MirrorStore::open_in_memory().unwrap();
/// assert_eq!(store.page_count().unwrap(), 0);
/// assert!(store.watermark("en.wikipedia.org").unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct MirrorStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MirrorStore {
    /// Opens or creates a mirror database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        init_schema(&conn, true)?;
        debug!(path = %path.display(), "opened mirror store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an ephemeral in-memory mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn, false)?;
        Ok(Self { conn, path: None })
    }

    /// Path of the database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Starts the transaction a sync pass writes through.
    ///
    /// Dropping the returned value without calling
    /// [`MirrorTransaction::commit`] rolls everything back.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite refuses to begin a transaction.
    pub fn transaction(&mut self) -> StoreResult<MirrorTransaction<'_>> {
        Ok(MirrorTransaction {
            tx: self.conn.transaction()?,
        })
    }

    /// The start time of the last successful sync of `site`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidWatermark`] if the stored value does not
    /// parse as a timestamp.
    pub fn watermark(&self, site: &str) -> StoreResult<Option<Timestamp>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![watermark_key(site)],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|value| {
                parse_timestamp(&value).map_err(|_| StoreError::InvalidWatermark {
                    site: site.to_string(),
                    value,
                })
            })
            .transpose()
    }

    /// Loads revisions into the history tables in one transaction.
    ///
    /// # Errors
    ///
    /// Fails if a revision references a page that is not mirrored.
    pub fn insert_revisions(&mut self, revisions: &[RevisionRow]) -> StoreResult<()> {
        let tx = self.transaction()?;
        for revision in revisions {
            tx.insert_revision(revision)?;
        }
        tx.commit()
    }

    /// Number of mirrored pages.
    pub fn page_count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM page", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// A mirrored page by id.
    pub fn page(&self, page_id: PageId) -> StoreResult<Option<PageRow>> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM page WHERE page_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![page_id], page_from_row)
            .optional()?)
    }

    /// Mirrored pages with the given namespace and title, lowest id first.
    ///
    /// Titles are not unique while a move is half-applied, so this can
    /// return more than one row.
    pub fn pages_by_title(&self, namespace: i32, title: &str) -> StoreResult<Vec<PageRow>> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM page WHERE page_namespace = ?1 AND page_title = ?2 \
             ORDER BY page_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![namespace, title], page_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every mirrored page, ordered by id.
    pub fn pages(&self) -> StoreResult<Vec<PageRow>> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM page ORDER BY page_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], page_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Properties of one page by name.
    pub fn page_props(&self, page_id: PageId) -> StoreResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(
            "SELECT pp_propname, pp_value FROM page_props WHERE pp_page = ?1 ORDER BY pp_propname",
        )?;
        let rows = stmt.query_map(params![page_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every property row, ordered by page and name.
    pub fn all_page_props(&self) -> StoreResult<Vec<PagePropRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT pp_page, pp_propname, pp_value FROM page_props ORDER BY pp_page, pp_propname",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PagePropRow {
                page_id: row.get(0)?,
                name: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Restrictions of one page, ordered by type.
    pub fn page_restrictions(&self, page_id: PageId) -> StoreResult<Vec<RestrictionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT pr_page, pr_type, pr_level, pr_cascade, pr_expiry FROM page_restrictions \
             WHERE pr_page = ?1 ORDER BY pr_type",
        )?;
        let rows = stmt.query_map(params![page_id], restriction_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every restriction row, ordered by page and type.
    pub fn all_restrictions(&self) -> StoreResult<Vec<RestrictionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT pr_page, pr_type, pr_level, pr_cascade, pr_expiry FROM page_restrictions \
             ORDER BY pr_page, pr_type",
        )?;
        let rows = stmt.query_map([], restriction_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Live revisions of a page, oldest first.
    pub fn revisions(&self, page_id: PageId) -> StoreResult<Vec<RevisionRow>> {
        let sql = format!("SELECT {REVISION_COLUMNS} FROM revision WHERE rev_page = ?1 ORDER BY rev_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![page_id], |row| revision_from_row(row, 0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// The whole archive, in insertion order.
    pub fn archive(&self) -> StoreResult<Vec<ArchiveRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT ar_id, ar_namespace, ar_title, ar_rev_id, ar_page_id, ar_text_id, ar_comment, \
             ar_user, ar_user_text, ar_timestamp, ar_minor_edit, ar_deleted, ar_len, \
             ar_parent_id, ar_sha1, ar_content_model, ar_content_format \
             FROM archive ORDER BY ar_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ArchiveRow {
                ar_id: row.get(0)?,
                namespace: row.get(1)?,
                title: row.get(2)?,
                revision: revision_from_row(row, 3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

/// The single transaction of one sync pass.
///
/// Implements [`BatchExecutor`], so an [`crate::ExecutionQueue`] can flush
/// into it. Rolled back on drop unless committed.
pub struct MirrorTransaction<'c> {
    tx: Transaction<'c>,
}

impl MirrorTransaction<'_> {
    /// Records the start time of the pass being committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_watermark(&self, site: &str, started_at: &Timestamp) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![watermark_key(site), format_timestamp(started_at)],
        )?;
        Ok(())
    }

    /// Ids of the pages mirrored in `namespace`, as seen by this
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn page_ids(&self, namespace: i32) -> StoreResult<Vec<PageId>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT page_id FROM page WHERE page_namespace = ?1 ORDER BY page_id")?;
        let rows = stmt.query_map(params![namespace], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Inserts one revision row.
    ///
    /// # Errors
    ///
    /// Fails with a constraint violation if the page is not mirrored or the
    /// revision id is taken.
    pub fn insert_revision(&self, revision: &RevisionRow) -> StoreResult<()> {
        let mut stmt = self.tx.prepare_cached(INSERT_REVISION)?;
        stmt.execute(params![
            revision.rev_id,
            revision.page_id,
            revision.text_id,
            revision.comment,
            revision.user,
            revision.user_text,
            format_timestamp(&revision.timestamp),
            revision.minor_edit,
            revision.deleted,
            revision.len,
            revision.parent_id,
            revision.sha1,
            revision.content_model,
            revision.content_format,
        ])?;
        Ok(())
    }

    /// Makes every write of the pass durable.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite fails to commit.
    pub fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Discards every write of the pass.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite fails to roll back.
    pub fn rollback(self) -> StoreResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

impl BatchExecutor for MirrorTransaction<'_> {
    fn execute_batch(&mut self, key: StatementKey, batch: &[Operation]) -> StoreResult<()> {
        let mut affected = 0usize;
        for sql in statements_for(key) {
            let mut stmt = self
                .tx
                .prepare_cached(&sql)
                .map_err(|err| StoreError::from_flush(key, err))?;
            for operation in batch {
                affected += stmt
                    .execute(params_from_iter(operation.sql_params()))
                    .map_err(|err| StoreError::from_flush(key, err))?;
            }
        }
        trace!(statement = %key, operations = batch.len(), affected, "executed batch");
        Ok(())
    }
}

fn watermark_key(site: &str) -> String {
    format!("watermark/{site}")
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(index)?;
    parse_timestamp(&text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    Ok(PageRow {
        page_id: row.get(0)?,
        namespace: row.get(1)?,
        title: row.get(2)?,
        is_redirect: row.get(3)?,
        is_new: row.get(4)?,
        random: row.get(5)?,
        touched: timestamp_column(row, 6)?,
        latest: row.get(7)?,
        length: row.get(8)?,
        content_model: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        language: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

fn restriction_from_row(row: &Row<'_>) -> rusqlite::Result<RestrictionRow> {
    Ok(RestrictionRow {
        page_id: row.get(0)?,
        kind: row.get(1)?,
        level: row.get(2)?,
        cascade: row.get(3)?,
        expiry: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
    })
}

/// Reads revision columns starting at `offset`, in `REVISION_COLUMNS` order.
fn revision_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<RevisionRow> {
    Ok(RevisionRow {
        rev_id: row.get(offset)?,
        page_id: row.get(offset + 1)?,
        text_id: row.get(offset + 2)?,
        comment: row.get(offset + 3)?,
        user: row.get(offset + 4)?,
        user_text: row.get(offset + 5)?,
        timestamp: timestamp_column(row, offset + 6)?,
        minor_edit: row.get(offset + 7)?,
        deleted: row.get(offset + 8)?,
        len: row.get(offset + 9)?,
        parent_id: row.get(offset + 10)?,
        sha1: row.get(offset + 11)?,
        content_model: row.get(offset + 12)?,
        content_format: row.get(offset + 13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::KeepSet;
    use crate::queue::ExecutionQueue;
    use std::collections::BTreeSet;

    fn ts(value: &str) -> Timestamp {
        parse_timestamp(value).unwrap()
    }

    fn page(page_id: PageId, title: &str) -> PageRow {
        PageRow {
            page_id,
            namespace: 0,
            title: title.into(),
            is_redirect: false,
            is_new: true,
            random: 0.25,
            touched: ts("2024-01-01T00:00:00Z"),
            latest: page_id * 10,
            length: 42,
            content_model: "wikitext".into(),
            language: "en".into(),
        }
    }

    fn prop(page_id: PageId, name: &str, value: &str) -> Operation {
        Operation::UpsertPageProp(PagePropRow {
            page_id,
            name: name.into(),
            value: value.into(),
        })
    }

    fn restriction(page_id: PageId, kind: &str, level: &str) -> Operation {
        Operation::UpsertPageRestriction(RestrictionRow {
            page_id,
            kind: kind.into(),
            level: level.into(),
            cascade: false,
            expiry: "infinity".into(),
        })
    }

    fn apply(store: &mut MirrorStore, ops: Vec<Operation>) -> StoreResult<()> {
        let mut tx = store.transaction()?;
        {
            let mut queue = ExecutionQueue::new(&mut tx, 100)?;
            queue.submit_all(ops)?;
            queue.finish()?;
        }
        tx.commit()
    }

    #[test]
    fn transaction_lists_page_ids_per_namespace() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        let mut talk = page(3, "Foo");
        talk.namespace = 1;
        apply(
            &mut store,
            vec![
                Operation::UpsertPage(page(2, "Foo")),
                Operation::UpsertPage(talk),
                Operation::UpsertPage(page(1, "Bar")),
            ],
        )
        .unwrap();

        let tx = store.transaction().unwrap();
        assert_eq!(tx.page_ids(0).unwrap(), vec![1, 2]);
        assert_eq!(tx.page_ids(1).unwrap(), vec![3]);
        assert!(tx.page_ids(4).unwrap().is_empty());
    }

    #[test]
    fn upsert_overwrites_every_column() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        apply(&mut store, vec![Operation::UpsertPage(page(1, "Foo"))]).unwrap();

        let mut changed = page(1, "Bar");
        changed.is_redirect = true;
        changed.latest = 99;
        changed.touched = ts("2024-02-02T10:00:00Z");
        apply(&mut store, vec![Operation::UpsertPage(changed.clone())]).unwrap();

        assert_eq!(store.page(1).unwrap(), Some(changed));
        assert_eq!(store.page_count().unwrap(), 1);
    }

    #[test]
    fn keep_set_deletes() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        apply(
            &mut store,
            vec![
                Operation::UpsertPage(page(1, "A")),
                prop(1, "a", "1"),
                prop(1, "b", "2"),
                prop(1, "c", "3"),
                prop(1, "d", "4"),
            ],
        )
        .unwrap();

        let keep: BTreeSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
        apply(
            &mut store,
            vec![Operation::DeletePageProps {
                page_id: 1,
                keep: KeepSet::from_keys(keep),
            }],
        )
        .unwrap();
        assert_eq!(
            store.page_props(1).unwrap().into_keys().collect::<Vec<_>>(),
            vec!["a", "c"]
        );

        apply(
            &mut store,
            vec![Operation::DeletePageProps {
                page_id: 1,
                keep: KeepSet::One("c".into()),
            }],
        )
        .unwrap();
        assert_eq!(
            store.page_props(1).unwrap().into_keys().collect::<Vec<_>>(),
            vec!["c"]
        );

        apply(
            &mut store,
            vec![Operation::DeletePageProps {
                page_id: 1,
                keep: KeepSet::Nothing,
            }],
        )
        .unwrap();
        assert!(store.page_props(1).unwrap().is_empty());
    }

    #[test]
    fn restriction_upsert_and_delete() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        apply(
            &mut store,
            vec![
                Operation::UpsertPage(page(1, "A")),
                restriction(1, "edit", "sysop"),
                restriction(1, "move", "sysop"),
            ],
        )
        .unwrap();
        apply(
            &mut store,
            vec![
                restriction(1, "edit", "autoconfirmed"),
                Operation::DeletePageRestrictions {
                    page_id: 1,
                    keep: KeepSet::One("edit".into()),
                },
            ],
        )
        .unwrap();

        let rows = store.page_restrictions(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "edit");
        assert_eq!(rows[0].level, "autoconfirmed");
    }

    #[test]
    fn delete_moves_revisions_to_archive() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        apply(
            &mut store,
            vec![Operation::UpsertPage(page(7, "Gone")), prop(7, "p", "v")],
        )
        .unwrap();
        store
            .insert_revisions(&[
                RevisionRow::new(1, 7, ts("2024-01-01T00:00:00Z")),
                RevisionRow::new(2, 7, ts("2024-01-02T00:00:00Z")).with_parent(1),
                RevisionRow::new(3, 7, ts("2024-01-03T00:00:00Z")).with_parent(2),
            ])
            .unwrap();

        apply(
            &mut store,
            vec![
                Operation::MoveRevisionsToArchive { page_id: 7 },
                Operation::DeletePage { page_id: 7 },
            ],
        )
        .unwrap();

        assert!(store.page(7).unwrap().is_none());
        assert!(store.revisions(7).unwrap().is_empty());
        assert!(store.page_props(7).unwrap().is_empty());

        let archive = store.archive().unwrap();
        assert_eq!(archive.len(), 3);
        assert!(archive.iter().all(|row| row.title == "Gone" && row.namespace == 0));
        assert_eq!(
            archive.iter().map(|row| row.revision.rev_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(archive[2].revision.parent_id, Some(2));
    }

    #[test]
    fn deleting_page_with_revisions_violates_constraint() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        apply(&mut store, vec![Operation::UpsertPage(page(7, "Kept"))]).unwrap();
        store
            .insert_revisions(&[RevisionRow::new(1, 7, ts("2024-01-01T00:00:00Z"))])
            .unwrap();

        let err = apply(&mut store, vec![Operation::DeletePage { page_id: 7 }]).unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(store.page(7).unwrap().is_some());
    }

    #[test]
    fn prop_before_page_violates_constraint() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        let err = apply(
            &mut store,
            vec![prop(1, "a", "b"), Operation::UpsertPage(page(1, "A"))],
        )
        .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(store.page_count().unwrap(), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        {
            let mut tx = store.transaction().unwrap();
            tx.execute_batch(StatementKey::UpsertPage, &[Operation::UpsertPage(page(1, "A"))])
                .unwrap();
            tx.set_watermark("site", &ts("2024-01-01T00:00:00Z")).unwrap();
        }
        assert_eq!(store.page_count().unwrap(), 0);
        assert!(store.watermark("site").unwrap().is_none());
    }

    #[test]
    fn watermark_per_site() {
        let mut store = MirrorStore::open_in_memory().unwrap();
        let tx = store.transaction().unwrap();
        tx.set_watermark("a", &ts("2024-01-01T00:00:00Z")).unwrap();
        tx.set_watermark("b", &ts("2024-03-01T00:00:00Z")).unwrap();
        tx.set_watermark("a", &ts("2024-02-01T00:00:00Z")).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.watermark("a").unwrap(), Some(ts("2024-02-01T00:00:00Z")));
        assert_eq!(store.watermark("b").unwrap(), Some(ts("2024-03-01T00:00:00Z")));
        assert_eq!(store.watermark("c").unwrap(), None);
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.sqlite");
        {
            let mut store = MirrorStore::open(&path).unwrap();
            apply(&mut store, vec![Operation::UpsertPage(page(3, "Kept"))]).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }
        let store = MirrorStore::open(&path).unwrap();
        assert_eq!(store.pages().unwrap().len(), 1);
        assert_eq!(store.pages_by_title(0, "Kept").unwrap()[0].page_id, 3);
    }
}
