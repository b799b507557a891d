#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use bo_core::entity::EntityRef;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value as JsonValue;

use super::super::StoreError;
use super::entity_tx::{fields_from_json, fields_to_json};

#[derive(Clone, Debug)]
pub(in crate::store) struct ChildRow {
    pub collection: String,
    pub id: String,
    pub version: i64,
    pub fields: BTreeMap<String, JsonValue>,
    pub deleted: bool,
}

pub(in crate::store) fn children_load_tx(
    conn: &Connection,
    item: &EntityRef,
    include_deleted: bool,
) -> Result<Vec<ChildRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT collection, id, version, fields_json, deleted
         FROM children
         WHERE parent_kind = ?1 AND parent_id = ?2 AND (?3 OR deleted = 0)
         ORDER BY collection, id",
    )?;
    let mut rows = stmt.query(params![
        item.kind.as_str(),
        item.id.as_str(),
        include_deleted
    ])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let fields_json: String = row.get(3)?;
        out.push(ChildRow {
            collection: row.get(0)?,
            id: row.get(1)?,
            version: row.get(2)?,
            fields: fields_from_json(&fields_json)?,
            deleted: row.get::<_, i64>(4)? != 0,
        });
    }
    Ok(out)
}

pub(in crate::store) fn child_get_tx(
    conn: &Connection,
    item: &EntityRef,
    collection: &str,
    id: &str,
) -> Result<Option<ChildRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT version, fields_json, deleted
             FROM children
             WHERE parent_kind = ?1 AND parent_id = ?2 AND collection = ?3 AND id = ?4",
            params![item.kind.as_str(), item.id.as_str(), collection, id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((version, fields_json, deleted)) = row else {
        return Ok(None);
    };
    Ok(Some(ChildRow {
        collection: collection.to_string(),
        id: id.to_string(),
        version,
        fields: fields_from_json(&fields_json)?,
        deleted: deleted != 0,
    }))
}

pub(in crate::store) fn child_insert_tx(
    conn: &Connection,
    item: &EntityRef,
    collection: &str,
    id: &str,
    fields: &BTreeMap<String, JsonValue>,
    now_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO children
           (parent_kind, parent_id, collection, id, version, fields_json, deleted,
            created_at_ms, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, 0, ?6, ?6)",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            collection,
            id,
            fields_to_json(fields)?,
            now_ms
        ],
    )?;
    Ok(())
}

/// Rewrites a child row's fields and bumps its version by exactly one.
/// Returns (version_before, version_after).
pub(in crate::store) fn child_update_tx(
    conn: &Connection,
    item: &EntityRef,
    collection: &str,
    id: &str,
    fields: &BTreeMap<String, JsonValue>,
    now_ms: i64,
) -> Result<(i64, i64), StoreError> {
    let before = child_version_tx(conn, item, collection, id)?;
    conn.execute(
        "UPDATE children SET version = version + 1, fields_json = ?5, updated_at_ms = ?6
         WHERE parent_kind = ?1 AND parent_id = ?2 AND collection = ?3 AND id = ?4",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            collection,
            id,
            fields_to_json(fields)?,
            now_ms
        ],
    )?;
    Ok((before, before + 1))
}

pub(in crate::store) fn child_soft_delete_tx(
    conn: &Connection,
    item: &EntityRef,
    collection: &str,
    id: &str,
    now_ms: i64,
) -> Result<(i64, i64), StoreError> {
    let before = child_version_tx(conn, item, collection, id)?;
    conn.execute(
        "UPDATE children SET version = version + 1, deleted = 1, updated_at_ms = ?5
         WHERE parent_kind = ?1 AND parent_id = ?2 AND collection = ?3 AND id = ?4",
        params![item.kind.as_str(), item.id.as_str(), collection, id, now_ms],
    )?;
    Ok((before, before + 1))
}

pub(in crate::store) fn children_delete_all_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM children WHERE parent_kind = ?1 AND parent_id = ?2",
        params![item.kind.as_str(), item.id.as_str()],
    )?;
    Ok(())
}

fn child_version_tx(
    conn: &Connection,
    item: &EntityRef,
    collection: &str,
    id: &str,
) -> Result<i64, StoreError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM children
             WHERE parent_kind = ?1 AND parent_id = ?2 AND collection = ?3 AND id = ?4",
            params![item.kind.as_str(), item.id.as_str(), collection, id],
            |row| row.get(0),
        )
        .optional()?;
    version.ok_or(StoreError::UnknownId)
}
