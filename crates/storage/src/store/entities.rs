#![forbid(unsafe_code)]

use bo_core::entity::{ChildRecord, EntityRef, GraphEntity};
use rusqlite::{Connection, params};
use serde_json::Value as JsonValue;

use super::ledger::item_ref_from_columns;
use super::support::child_tx::children_load_tx;
use super::support::entity_tx::{entity_get_tx, fields_from_json};
use super::support::link_tx::links_live_tx;
use super::{ListEntitiesRequest, SqliteStore, StoreError};

/// Hydrates the full aggregate: parent fields, live children grouped
/// by collection, live linked-id sets per relationship.
pub(in crate::store) fn load_graph_entity_tx(
    conn: &Connection,
    item: &EntityRef,
) -> Result<Option<GraphEntity>, StoreError> {
    let Some(row) = entity_get_tx(conn, item)? else {
        return Ok(None);
    };

    let mut entity = GraphEntity::new(item.clone(), row.version);
    entity.fields = row.fields;

    for child in children_load_tx(conn, item, false)? {
        entity
            .children
            .entry(child.collection.clone())
            .or_default()
            .push(ChildRecord {
                id: child.id,
                version: child.version,
                fields: child.fields,
                deleted: child.deleted,
            });
    }
    entity.links = links_live_tx(conn, item)?;

    Ok(Some(entity))
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityHead {
    pub item: EntityRef,
    pub version: i64,
    pub name: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityListSlice {
    pub entities: Vec<EntityHead>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl SqliteStore {
    pub fn graph_get(&mut self, item: &EntityRef) -> Result<GraphEntity, StoreError> {
        let tx = self.conn.transaction()?;
        let entity = load_graph_entity_tx(&tx, item)?.ok_or(StoreError::UnknownId)?;
        tx.commit()?;
        Ok(entity)
    }

    /// Id-ordered page of entity heads for one kind.
    pub fn graph_list(
        &mut self,
        request: ListEntitiesRequest,
    ) -> Result<EntityListSlice, StoreError> {
        let after_id = request.cursor.unwrap_or_default();
        let limit = request.limit.clamp(1, 200) as i64;
        let tx = self.conn.transaction()?;

        let mut entities = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, version, fields_json, updated_at_ms
                 FROM entities
                 WHERE kind = ?1 AND id > ?2
                 ORDER BY id
                 LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![request.kind.as_str(), after_id, limit + 1])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let fields_json: String = row.get(2)?;
                let fields = fields_from_json(&fields_json)?;
                entities.push(EntityHead {
                    item: item_ref_from_columns(request.kind.as_str(), &id)?,
                    version: row.get(1)?,
                    name: fields
                        .get("name")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    updated_at_ms: row.get(3)?,
                });
            }
        }
        tx.commit()?;

        let has_more = entities.len() as i64 > limit;
        if has_more {
            entities.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            entities.last().map(|head| head.item.id.as_str().to_string())
        } else {
            None
        };

        Ok(EntityListSlice {
            entities,
            next_cursor,
            has_more,
        })
    }
}
