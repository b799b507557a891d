#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use bo_core::entity::{EntityKind, EntityRef};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value as JsonValue;

use super::super::StoreError;

#[derive(Clone, Debug)]
pub(in crate::store) struct EntityRow {
    pub version: i64,
    pub fields: BTreeMap<String, JsonValue>,
}

pub(in crate::store) fn fields_to_json(
    fields: &BTreeMap<String, JsonValue>,
) -> Result<String, StoreError> {
    Ok(serde_json::to_string(fields)?)
}

pub(in crate::store) fn fields_from_json(
    raw: &str,
) -> Result<BTreeMap<String, JsonValue>, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

pub(in crate::store) fn entity_get_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<Option<EntityRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT version, fields_json
             FROM entities WHERE kind = ?1 AND id = ?2",
            params![item.kind.as_str(), item.id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    let Some((version, fields_json)) = row else {
        return Ok(None);
    };
    Ok(Some(EntityRow {
        version,
        fields: fields_from_json(&fields_json)?,
    }))
}

pub(in crate::store) fn entity_exists_tx(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(in crate::store) fn entity_insert_tx(
    conn: &Connection,
    item: &EntityRef,
    fields: &BTreeMap<String, JsonValue>,
    now_ms: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO entities (kind, id, version, fields_json, created_at_ms, updated_at_ms)
         VALUES (?1, ?2, 1, ?3, ?4, ?4)",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            fields_to_json(fields)?,
            now_ms
        ],
    )?;
    Ok(())
}

/// Compare-and-swap write of the parent row. The `WHERE version = ?`
/// guard is the sole conflict trigger: zero rows changed on an
/// existing id means a concurrent writer got there first.
pub(in crate::store) fn entity_update_cas_tx(
    conn: &Connection,
    item: &EntityRef,
    expected_version: i64,
    fields: &BTreeMap<String, JsonValue>,
    now_ms: i64,
) -> Result<i64, StoreError> {
    let changed = conn.execute(
        "UPDATE entities SET version = version + 1, fields_json = ?4, updated_at_ms = ?5
         WHERE kind = ?1 AND id = ?2 AND version = ?3",
        params![
            item.kind.as_str(),
            item.id.as_str(),
            expected_version,
            fields_to_json(fields)?,
            now_ms
        ],
    )?;
    if changed == 1 {
        return Ok(expected_version + 1);
    }

    let actual: Option<i64> = conn
        .query_row(
            "SELECT version FROM entities WHERE kind = ?1 AND id = ?2",
            params![item.kind.as_str(), item.id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match actual {
        Some(actual) => Err(StoreError::VersionMismatch {
            expected: expected_version,
            actual,
        }),
        None => Err(StoreError::UnknownId),
    }
}

pub(in crate::store) fn entity_delete_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
        params![item.kind.as_str(), item.id.as_str()],
    )?;
    Ok(())
}

/// Allocates the next id from a named counter, e.g. `cus_000042`.
pub(in crate::store) fn next_id_tx(
    conn: &Connection,
    counter: &str,
    prefix: &str,
) -> Result<String, StoreError> {
    conn.execute(
        "INSERT INTO counters (name, value) VALUES (?1, 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1",
        params![counter],
    )?;
    let value: i64 = conn.query_row(
        "SELECT value FROM counters WHERE name = ?1",
        params![counter],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}_{value:06}"))
}
