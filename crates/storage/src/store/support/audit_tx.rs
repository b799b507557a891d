#![forbid(unsafe_code)]

use bo_core::conflict::ConflictDetails;
use bo_core::entity::EntityRef;
use rusqlite::{Connection, params};

use super::super::ledger::{AuditOutcome, ResolutionType};
use super::super::StoreError;

/// Token for the one in-flight audit record of a save attempt. Every
/// row snapshot written during the attempt is bound through it; the
/// context is a plain value threaded down the call chain, never
/// ambient state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuditContext {
    audit_id: i64,
}

impl AuditContext {
    pub fn audit_id(&self) -> i64 {
        self.audit_id
    }
}

/// Opens the attempt's audit record with tentative outcome Success.
/// The record is created at transaction start and finalized at the
/// end; it survives validation failures and conflicts.
pub(in crate::store) fn audit_open_tx(
    conn: &Connection,
    item: &EntityRef,
    reason: &str,
    ts_ms: i64,
) -> Result<AuditContext, StoreError> {
    conn.execute(
        "INSERT INTO audit_records (item_kind, item_id, reason, ts_ms, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            reason,
            ts_ms,
            AuditOutcome::Success.as_str()
        ],
    )?;
    Ok(AuditContext {
        audit_id: conn.last_insert_rowid(),
    })
}

pub(in crate::store) struct VersionEntryInsert<'a> {
    pub row_kind: &'a str,
    pub collection: Option<&'a str>,
    pub row_id: &'a str,
    pub version_before: Option<i64>,
    pub version_after: Option<i64>,
    pub before_json: Option<String>,
    pub after_json: Option<String>,
}

pub(in crate::store) fn version_entry_append_tx(
    conn: &Connection,
    ctx: &AuditContext,
    entry: VersionEntryInsert<'_>,
    ts_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO version_entries
           (audit_id, row_kind, collection, row_id, version_before, version_after,
            before_json, after_json, ts_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            ctx.audit_id,
            entry.row_kind,
            entry.collection,
            entry.row_id,
            entry.version_before,
            entry.version_after,
            entry.before_json,
            entry.after_json,
            ts_ms
        ],
    )?;
    Ok(())
}

/// The only write path for an audit record's terminal fields.
/// Idempotent: re-finalizing overwrites with the same values.
pub(in crate::store) fn audit_finalize_tx(
    conn: &Connection,
    ctx: &AuditContext,
    outcome: AuditOutcome,
    resolution: Option<ResolutionType>,
    conflict_details: Option<&ConflictDetails>,
    error_text: Option<&str>,
) -> Result<(), StoreError> {
    let details_json = conflict_details
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "UPDATE audit_records
         SET outcome = ?2, resolution = ?3, conflict_details_json = ?4, error_text = ?5
         WHERE id = ?1",
        params![
            ctx.audit_id,
            outcome.as_str(),
            resolution.map(|r| r.as_str()),
            details_json,
            error_text
        ],
    )?;
    Ok(())
}
