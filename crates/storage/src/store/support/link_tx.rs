#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use bo_core::entity::EntityRef;
use rusqlite::{Connection, params};

use super::super::StoreError;

/// Live linked-id sets per relationship (soft-deleted rows excluded).
pub(in crate::store) fn links_live_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT relation, target_id FROM links
         WHERE parent_kind = ?1 AND parent_id = ?2 AND deleted_at_ms IS NULL
         ORDER BY relation, target_id",
    )?;
    let mut rows = stmt.query(params![item.kind.as_str(), item.id.as_str()])?;

    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let relation: String = row.get(0)?;
        let target_id: String = row.get(1)?;
        out.entry(relation).or_default().insert(target_id);
    }
    Ok(out)
}

pub(in crate::store) fn links_live_for_tx(
    conn: &Connection,
    item: &EntityRef,
    relation: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT target_id FROM links
         WHERE parent_kind = ?1 AND parent_id = ?2 AND relation = ?3
           AND deleted_at_ms IS NULL",
    )?;
    let mut rows = stmt.query(params![item.kind.as_str(), item.id.as_str(), relation])?;

    let mut out = BTreeSet::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?);
    }
    Ok(out)
}

/// Links a target, reviving a previously unlinked row if one exists so
/// the join row keeps its original provenance trail.
pub(in crate::store) fn link_upsert_tx(
    conn: &Connection,
    item: &EntityRef,
    relation: &str,
    target_id: &str,
    reason: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO links
           (parent_kind, parent_id, relation, target_id, reason, created_at_ms, deleted_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
         ON CONFLICT(parent_kind, parent_id, relation, target_id)
         DO UPDATE SET deleted_at_ms = NULL, reason = ?5",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            relation,
            target_id,
            reason,
            now_ms
        ],
    )?;
    Ok(())
}

/// Unlinks by stamping `deleted_at_ms`; the row itself stays so the
/// ledger can reconstruct link history.
pub(in crate::store) fn link_stamp_deleted_tx(
    conn: &Connection,
    item: &EntityRef,
    relation: &str,
    target_id: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE links SET deleted_at_ms = ?5
         WHERE parent_kind = ?1 AND parent_id = ?2 AND relation = ?3 AND target_id = ?4
           AND deleted_at_ms IS NULL",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            relation,
            target_id,
            now_ms
        ],
    )?;
    Ok(())
}

pub(in crate::store) fn links_delete_all_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM links WHERE parent_kind = ?1 AND parent_id = ?2",
        params![item.kind.as_str(), item.id.as_str()],
    )?;
    Ok(())
}
