#![forbid(unsafe_code)]

use rusqlite::{Connection, params};

use super::super::StoreError;

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          name TEXT PRIMARY KEY,
          value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entities (
          kind TEXT NOT NULL,
          id TEXT NOT NULL,
          version INTEGER NOT NULL,
          fields_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (kind, id)
        );

        CREATE TABLE IF NOT EXISTS children (
          parent_kind TEXT NOT NULL,
          parent_id TEXT NOT NULL,
          collection TEXT NOT NULL,
          id TEXT NOT NULL,
          version INTEGER NOT NULL,
          fields_json TEXT NOT NULL,
          deleted INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (parent_kind, parent_id, collection, id)
        );

        CREATE TABLE IF NOT EXISTS links (
          parent_kind TEXT NOT NULL,
          parent_id TEXT NOT NULL,
          relation TEXT NOT NULL,
          target_id TEXT NOT NULL,
          reason TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          deleted_at_ms INTEGER,
          PRIMARY KEY (parent_kind, parent_id, relation, target_id)
        );

        CREATE TABLE IF NOT EXISTS audit_records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          item_kind TEXT NOT NULL,
          item_id TEXT NOT NULL,
          reason TEXT NOT NULL,
          ts_ms INTEGER NOT NULL,
          outcome TEXT NOT NULL,
          resolution TEXT,
          conflict_details_json TEXT,
          error_text TEXT
        );

        CREATE TABLE IF NOT EXISTS version_entries (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          audit_id INTEGER NOT NULL REFERENCES audit_records(id),
          row_kind TEXT NOT NULL,
          collection TEXT,
          row_id TEXT NOT NULL,
          version_before INTEGER,
          version_after INTEGER,
          before_json TEXT,
          after_json TEXT,
          ts_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_children_parent
          ON children(parent_kind, parent_id, collection);
        CREATE INDEX IF NOT EXISTS idx_links_parent
          ON links(parent_kind, parent_id, relation);
        CREATE INDEX IF NOT EXISTS idx_audit_records_item
          ON audit_records(item_kind, item_id, id);
        CREATE INDEX IF NOT EXISTS idx_version_entries_audit
          ON version_entries(audit_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", "v1"],
    )?;

    Ok(())
}
