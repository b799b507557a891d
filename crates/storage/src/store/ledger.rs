#![forbid(unsafe_code)]

use bo_core::conflict::ConflictDetails;
use bo_core::entity::{EntityId, EntityKind, EntityRef};
use rusqlite::params;

use super::{AuditTrailRequest, SqliteStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    ConflictResolved,
    ConflictFailed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ConflictResolved => "conflict_resolved",
            Self::ConflictFailed => "conflict_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "conflict_resolved" => Some(Self::ConflictResolved),
            "conflict_failed" => Some(Self::ConflictFailed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionType {
    AutoResolvedPatchReplay,
    ValidationError,
    StorageError,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoResolvedPatchReplay => "auto_resolved_patch_replay",
            Self::ValidationError => "validation_error",
            Self::StorageError => "storage_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_resolved_patch_replay" => Some(Self::AutoResolvedPatchReplay),
            "validation_error" => Some(Self::ValidationError),
            "storage_error" => Some(Self::StorageError),
            _ => None,
        }
    }
}

/// Immutable before/after snapshot of one row changed within one
/// audit record.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionEntry {
    pub id: i64,
    pub row_kind: String,
    pub collection: Option<String>,
    pub row_id: String,
    pub version_before: Option<i64>,
    pub version_after: Option<i64>,
    pub before_json: Option<String>,
    pub after_json: Option<String>,
    pub ts_ms: i64,
}

/// One save attempt's durable outcome, hydrated with its version
/// entries. Exists for failed attempts too.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub item: EntityRef,
    pub reason: String,
    pub ts_ms: i64,
    pub outcome: AuditOutcome,
    pub resolution: Option<ResolutionType>,
    pub conflict_details: Option<ConflictDetails>,
    pub error_text: Option<String>,
    pub entries: Vec<VersionEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditTrailSlice {
    pub records: Vec<AuditRecord>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

struct AuditRow {
    id: i64,
    reason: String,
    ts_ms: i64,
    outcome: String,
    resolution: Option<String>,
    conflict_details_json: Option<String>,
    error_text: Option<String>,
}

impl SqliteStore {
    /// Audit trail for one entity, most-recent-first, cursor-paged.
    pub fn audit_trail(
        &mut self,
        request: AuditTrailRequest,
    ) -> Result<AuditTrailSlice, StoreError> {
        let before_id = request.cursor.unwrap_or(i64::MAX);
        let limit = request.limit.clamp(1, 200) as i64;
        let tx = self.conn.transaction()?;

        let mut rows = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, reason, ts_ms, outcome, resolution, conflict_details_json, error_text
                 FROM audit_records
                 WHERE item_kind = ?1 AND item_id = ?2 AND id < ?3
                 ORDER BY id DESC
                 LIMIT ?4",
            )?;
            let mut query = stmt.query(params![
                request.item.kind.as_str(),
                request.item.id.as_str(),
                before_id,
                limit + 1
            ])?;
            while let Some(row) = query.next()? {
                rows.push(AuditRow {
                    id: row.get(0)?,
                    reason: row.get(1)?,
                    ts_ms: row.get(2)?,
                    outcome: row.get(3)?,
                    resolution: row.get(4)?,
                    conflict_details_json: row.get(5)?,
                    error_text: row.get(6)?,
                });
            }
        }

        let has_more = rows.len() as i64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            rows.last().map(|row| row.id)
        } else {
            None
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let entries = version_entries_for(&tx, row.id)?;
            records.push(hydrate_record(&request.item, row, entries)?);
        }

        tx.commit()?;
        Ok(AuditTrailSlice {
            records,
            next_cursor,
            has_more,
        })
    }
}

fn version_entries_for(
    conn: &rusqlite::Connection,
    audit_id: i64,
) -> Result<Vec<VersionEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, row_kind, collection, row_id, version_before, version_after,
                before_json, after_json, ts_ms
         FROM version_entries
         WHERE audit_id = ?1
         ORDER BY id",
    )?;
    let mut rows = stmt.query(params![audit_id])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(VersionEntry {
            id: row.get(0)?,
            row_kind: row.get(1)?,
            collection: row.get(2)?,
            row_id: row.get(3)?,
            version_before: row.get(4)?,
            version_after: row.get(5)?,
            before_json: row.get(6)?,
            after_json: row.get(7)?,
            ts_ms: row.get(8)?,
        });
    }
    Ok(out)
}

fn hydrate_record(
    item: &EntityRef,
    row: AuditRow,
    entries: Vec<VersionEntry>,
) -> Result<AuditRecord, StoreError> {
    let outcome = AuditOutcome::parse(&row.outcome)
        .ok_or(StoreError::InvalidInput("unknown audit outcome in storage"))?;
    let resolution = row
        .resolution
        .as_deref()
        .map(|value| {
            ResolutionType::parse(value)
                .ok_or(StoreError::InvalidInput("unknown resolution type in storage"))
        })
        .transpose()?;
    let conflict_details = row
        .conflict_details_json
        .as_deref()
        .map(serde_json::from_str::<ConflictDetails>)
        .transpose()?;

    Ok(AuditRecord {
        id: row.id,
        item: item.clone(),
        reason: row.reason,
        ts_ms: row.ts_ms,
        outcome,
        resolution,
        conflict_details,
        error_text: row.error_text,
        entries,
    })
}

/// Re-parses an item reference read back from an audit row.
pub(in crate::store) fn item_ref_from_columns(
    kind: &str,
    id: &str,
) -> Result<EntityRef, StoreError> {
    let kind = EntityKind::parse(kind)
        .ok_or(StoreError::InvalidInput("unknown entity kind in storage"))?;
    let id = EntityId::try_new(id)
        .map_err(|_| StoreError::InvalidInput("invalid entity id in storage"))?;
    Ok(EntityRef::new(kind, id))
}
