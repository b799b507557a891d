#![forbid(unsafe_code)]

use bo_core::conflict::{ConflictDetails, FieldConflict, RelationshipConflict};
use bo_core::entity::{EntityRef, GraphEntity};
use bo_core::patch::Patch;
use bo_core::reconcile::desired_set;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use super::entities::load_graph_entity_tx;
use super::StoreError;

/// Concurrency-conflict resolution: runs only after a version mismatch
/// during persisting, once the attempt's row writes have been rolled
/// back. Reloads current authoritative state, diffs the user's intent
/// against it, and replays the intent in memory for re-display.
///
/// A field whose intended value equals the current server value is no
/// conflict, even when a concurrent writer changed it since the
/// client's stale load.
pub(in crate::store) fn resolve_version_conflict(
    conn: &Connection,
    item: &EntityRef,
    patch: &Patch,
) -> Result<(GraphEntity, ConflictDetails), StoreError> {
    let mut entity = load_graph_entity_tx(conn, item)?.ok_or(StoreError::UnknownId)?;
    let mut details = ConflictDetails::default();

    for (field, change) in &patch.field_changes {
        let server_value = entity
            .fields
            .get(field)
            .cloned()
            .unwrap_or(JsonValue::Null);
        if server_value != change.intended {
            details.fields.push(FieldConflict {
                field: field.clone(),
                server_value,
                intended_value: change.intended.clone(),
            });
        }
    }

    for (relation, desired) in &patch.relationship_patches {
        let current = entity.linked_ids(relation);
        let desired = desired_set(desired);
        let concurrent_links: Vec<String> = current.difference(&desired).cloned().collect();
        let concurrent_unlinks: Vec<String> = desired.difference(&current).cloned().collect();
        let conflict = RelationshipConflict::new(relation.clone(), concurrent_links, concurrent_unlinks);
        if !conflict.is_empty() {
            details.relationships.push(conflict);
        }
    }

    // Replay: reassign the user's intended field values and
    // relationship selection onto the fresh state. Nothing persists;
    // the merged entity carries the current version so an unchanged
    // resubmission will succeed.
    for (field, change) in &patch.field_changes {
        entity.fields.insert(field.clone(), change.intended.clone());
    }
    for (relation, desired) in &patch.relationship_patches {
        entity.links.insert(relation.clone(), desired_set(desired));
    }

    Ok((entity, details))
}
