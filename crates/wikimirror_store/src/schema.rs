//! Mirror schema and the SQL text for every statement shape.

use crate::operation::StatementKey;
use rusqlite::Connection;

/// Tables of the mirror.
///
/// `page_props` and `page_restrictions` cascade on page deletion.
/// `revision` does not: deleting a page that still owns revisions is a
/// constraint violation, so revisions must be moved to `archive` first.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS page (
  page_id            INTEGER PRIMARY KEY,
  page_namespace     INTEGER NOT NULL,
  page_title         TEXT NOT NULL,
  page_is_redirect   INTEGER NOT NULL DEFAULT 0,
  page_is_new        INTEGER NOT NULL DEFAULT 0,
  page_random        REAL NOT NULL,
  page_touched       TEXT NOT NULL,
  page_links_updated TEXT,
  page_latest        INTEGER NOT NULL,
  page_len           INTEGER NOT NULL,
  page_content_model TEXT,
  page_lang          TEXT
);
CREATE INDEX IF NOT EXISTS page_name_title ON page (page_namespace, page_title);
CREATE INDEX IF NOT EXISTS page_random ON page (page_random);

CREATE TABLE IF NOT EXISTS page_props (
  pp_page     INTEGER NOT NULL REFERENCES page (page_id) ON DELETE CASCADE,
  pp_propname TEXT NOT NULL,
  pp_value    TEXT NOT NULL,
  pp_sortkey  REAL,
  PRIMARY KEY (pp_page, pp_propname)
);

CREATE TABLE IF NOT EXISTS page_restrictions (
  pr_id      INTEGER PRIMARY KEY AUTOINCREMENT,
  pr_page    INTEGER NOT NULL REFERENCES page (page_id) ON DELETE CASCADE,
  pr_type    TEXT NOT NULL,
  pr_level   TEXT NOT NULL,
  pr_cascade INTEGER NOT NULL,
  pr_user    INTEGER,
  pr_expiry  TEXT,
  UNIQUE (pr_page, pr_type)
);

CREATE TABLE IF NOT EXISTS revision (
  rev_id             INTEGER PRIMARY KEY,
  rev_page           INTEGER NOT NULL REFERENCES page (page_id),
  rev_text_id        INTEGER,
  rev_comment        TEXT NOT NULL DEFAULT '',
  rev_user           INTEGER NOT NULL DEFAULT 0,
  rev_user_text      TEXT NOT NULL DEFAULT '',
  rev_timestamp      TEXT NOT NULL,
  rev_minor_edit     INTEGER NOT NULL DEFAULT 0,
  rev_deleted        INTEGER NOT NULL DEFAULT 0,
  rev_len            INTEGER,
  rev_parent_id      INTEGER,
  rev_sha1           TEXT NOT NULL DEFAULT '',
  rev_content_model  TEXT,
  rev_content_format TEXT
);
CREATE INDEX IF NOT EXISTS rev_page_id ON revision (rev_page, rev_id);

CREATE TABLE IF NOT EXISTS archive (
  ar_id             INTEGER PRIMARY KEY AUTOINCREMENT,
  ar_namespace      INTEGER NOT NULL,
  ar_title          TEXT NOT NULL,
  ar_rev_id         INTEGER NOT NULL,
  ar_page_id        INTEGER,
  ar_text_id        INTEGER,
  ar_comment        TEXT NOT NULL DEFAULT '',
  ar_user           INTEGER NOT NULL DEFAULT 0,
  ar_user_text      TEXT NOT NULL DEFAULT '',
  ar_timestamp      TEXT NOT NULL,
  ar_minor_edit     INTEGER NOT NULL DEFAULT 0,
  ar_deleted        INTEGER NOT NULL DEFAULT 0,
  ar_len            INTEGER,
  ar_parent_id      INTEGER,
  ar_sha1           TEXT NOT NULL DEFAULT '',
  ar_content_model  TEXT,
  ar_content_format TEXT
);
CREATE INDEX IF NOT EXISTS ar_name_title_timestamp ON archive (ar_namespace, ar_title, ar_timestamp);

CREATE TABLE IF NOT EXISTS sync_state (
  key   TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#;

/// Configures the connection and creates any missing tables.
pub(crate) fn init_schema(conn: &Connection, on_disk: bool) -> rusqlite::Result<()> {
    if on_disk {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA)
}

const UPSERT_PAGE: &str = "\
INSERT INTO page (page_id, page_namespace, page_title, page_is_redirect, page_is_new, \
page_random, page_touched, page_links_updated, page_latest, page_len, page_content_model, page_lang) \
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10, ?11) \
ON CONFLICT (page_id) DO UPDATE SET \
page_namespace = excluded.page_namespace, \
page_title = excluded.page_title, \
page_is_redirect = excluded.page_is_redirect, \
page_is_new = excluded.page_is_new, \
page_random = excluded.page_random, \
page_touched = excluded.page_touched, \
page_links_updated = excluded.page_links_updated, \
page_latest = excluded.page_latest, \
page_len = excluded.page_len, \
page_content_model = excluded.page_content_model, \
page_lang = excluded.page_lang";

const UPSERT_PAGE_PROP: &str = "\
INSERT INTO page_props (pp_page, pp_propname, pp_value) VALUES (?1, ?2, ?3) \
ON CONFLICT (pp_page, pp_propname) DO UPDATE SET pp_value = excluded.pp_value";

const UPSERT_PAGE_RESTRICTION: &str = "\
INSERT INTO page_restrictions (pr_page, pr_type, pr_level, pr_cascade, pr_user, pr_expiry) \
VALUES (?1, ?2, ?3, ?4, NULL, ?5) \
ON CONFLICT (pr_page, pr_type) DO UPDATE SET \
pr_level = excluded.pr_level, \
pr_cascade = excluded.pr_cascade, \
pr_user = excluded.pr_user, \
pr_expiry = excluded.pr_expiry";

const ARCHIVE_REVISIONS: &str = "\
INSERT INTO archive (ar_namespace, ar_title, ar_rev_id, ar_page_id, ar_text_id, ar_comment, \
ar_user, ar_user_text, ar_timestamp, ar_minor_edit, ar_deleted, ar_len, ar_parent_id, ar_sha1, \
ar_content_model, ar_content_format) \
SELECT page_namespace, page_title, rev_id, rev_page, rev_text_id, rev_comment, \
rev_user, rev_user_text, rev_timestamp, rev_minor_edit, rev_deleted, rev_len, rev_parent_id, rev_sha1, \
rev_content_model, rev_content_format \
FROM revision JOIN page ON rev_page = page_id \
WHERE rev_page = ?1 \
ORDER BY rev_id";

const DELETE_REVISIONS: &str = "DELETE FROM revision WHERE rev_page = ?1";

const DELETE_PAGE: &str = "DELETE FROM page WHERE page_id = ?1";

const DELETE_PAGE_PROPS_ALL: &str = "DELETE FROM page_props WHERE pp_page = ?1";

const DELETE_PAGE_PROPS_ALL_BUT: &str =
    "DELETE FROM page_props WHERE pp_page = ?1 AND pp_propname <> ?2";

const DELETE_PAGE_RESTRICTIONS_ALL: &str = "DELETE FROM page_restrictions WHERE pr_page = ?1";

const DELETE_PAGE_RESTRICTIONS_ALL_BUT: &str =
    "DELETE FROM page_restrictions WHERE pr_page = ?1 AND pr_type <> ?2";

/// SQL executed for one operation of the given shape.
///
/// Moving revisions is two statements (copy into `archive`, then delete from
/// `revision`) run back to back for each page inside the same transaction.
pub(crate) fn statements_for(key: StatementKey) -> Vec<String> {
    match key {
        StatementKey::UpsertPage => vec![UPSERT_PAGE.to_string()],
        StatementKey::UpsertPageProp => vec![UPSERT_PAGE_PROP.to_string()],
        StatementKey::UpsertPageRestriction => vec![UPSERT_PAGE_RESTRICTION.to_string()],
        StatementKey::MoveRevisionsToArchive => {
            vec![ARCHIVE_REVISIONS.to_string(), DELETE_REVISIONS.to_string()]
        }
        StatementKey::DeletePage => vec![DELETE_PAGE.to_string()],
        StatementKey::DeletePagePropsAll => vec![DELETE_PAGE_PROPS_ALL.to_string()],
        StatementKey::DeletePagePropsAllBut => vec![DELETE_PAGE_PROPS_ALL_BUT.to_string()],
        StatementKey::DeletePagePropsNotIn(arity) => {
            vec![not_in("page_props", "pp_page", "pp_propname", arity)]
        }
        StatementKey::DeletePageRestrictionsAll => vec![DELETE_PAGE_RESTRICTIONS_ALL.to_string()],
        StatementKey::DeletePageRestrictionsAllBut => {
            vec![DELETE_PAGE_RESTRICTIONS_ALL_BUT.to_string()]
        }
        StatementKey::DeletePageRestrictionsNotIn(arity) => {
            vec![not_in("page_restrictions", "pr_page", "pr_type", arity)]
        }
    }
}

fn not_in(table: &str, page_column: &str, key_column: &str, arity: usize) -> String {
    let placeholders = (2..arity + 2)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("DELETE FROM {table} WHERE {page_column} = ?1 AND {key_column} NOT IN ({placeholders})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, false).unwrap();
        init_schema(&conn, false).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('page', 'page_props', 'page_restrictions', 'revision', 'archive', 'sync_state')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, false).unwrap();

        let result = conn.execute(
            "INSERT INTO page_props (pp_page, pp_propname, pp_value) VALUES (1, 'a', 'b')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn not_in_placeholders() {
        assert_eq!(
            not_in("page_props", "pp_page", "pp_propname", 3),
            "DELETE FROM page_props WHERE pp_page = ?1 AND pp_propname NOT IN (?2, ?3, ?4)"
        );
    }

    #[test]
    fn every_statement_prepares() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, false).unwrap();

        let keys = [
            StatementKey::UpsertPage,
            StatementKey::UpsertPageProp,
            StatementKey::UpsertPageRestriction,
            StatementKey::MoveRevisionsToArchive,
            StatementKey::DeletePage,
            StatementKey::DeletePagePropsAll,
            StatementKey::DeletePagePropsAllBut,
            StatementKey::DeletePagePropsNotIn(4),
            StatementKey::DeletePageRestrictionsAll,
            StatementKey::DeletePageRestrictionsAllBut,
            StatementKey::DeletePageRestrictionsNotIn(2),
        ];
        for key in keys {
            for sql in statements_for(key) {
                conn.prepare(&sql)
                    .unwrap_or_else(|err| panic!("{key}: {err}"));
            }
        }
    }
}
