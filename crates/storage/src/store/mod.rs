#![forbid(unsafe_code)]

mod entities;
mod error;
mod ledger;
mod requests;
mod resolve;
mod save;
mod support;

pub use entities::{EntityHead, EntityListSlice};
pub use error::StoreError;
pub use ledger::{AuditOutcome, AuditRecord, AuditTrailSlice, ResolutionType, VersionEntry};
pub use requests::*;
pub use save::SaveOutcome;
pub use support::audit_tx::AuditContext;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

const DB_FILE: &str = "backoffice.db";

/// Embedded store for the object-graph save pipeline. All writes go
/// through short-lived transactions opened per save attempt; the
/// parent entity row's version column is the single serialization
/// point for concurrent writers.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        support::schema::install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

pub(in crate::store) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
