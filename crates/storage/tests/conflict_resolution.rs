#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use bo_core::entity::{EntityKind, EntityRef};
use bo_storage::{
    AuditOutcome, AuditTrailRequest, GraphCreateRequest, GraphSaveRequest, ResolutionType,
    SaveOutcome, SqliteStore,
};
use serde_json::{Value as JsonValue, json};

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("bo_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn fields(pairs: &[(&str, JsonValue)]) -> BTreeMap<String, JsonValue> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn create_entity(store: &mut SqliteStore, kind: EntityKind, name: &str) -> EntityRef {
    let outcome = store
        .graph_create(GraphCreateRequest {
            kind,
            fields: fields(&[("name", json!(name))]),
            reason: "test setup".to_string(),
        })
        .expect("create entity");
    match outcome {
        SaveOutcome::Committed { entity, .. } => entity.item,
        other => panic!("expected committed create, got {other:?}"),
    }
}

fn save_name(store: &mut SqliteStore, item: &EntityRef, version: i64, name: &str) -> SaveOutcome {
    store
        .graph_save(GraphSaveRequest {
            item: item.clone(),
            submitted_version: version,
            field_params: BTreeMap::new(),
            raw_patch: Some(json!({"parent": {"name": name}}).to_string()),
            reason: "rename".to_string(),
        })
        .expect("graph save")
}

fn latest_audit(store: &mut SqliteStore, item: &EntityRef) -> bo_storage::AuditRecord {
    let slice = store
        .audit_trail(AuditTrailRequest {
            item: item.clone(),
            cursor: None,
            limit: 1,
        })
        .expect("audit trail");
    slice.records.into_iter().next().expect("at least one record")
}

#[test]
fn stale_write_is_replayed_onto_fresh_state() {
    let dir = temp_dir("stale_write_replay");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Customer, "Acme");

    // A concurrent writer wins the race.
    let SaveOutcome::Committed { entity, .. } = save_name(&mut store, &item, 1, "Acme LLC") else {
        panic!("expected committed save");
    };
    assert_eq!(entity.version, 2);

    // The user submits against the stale version.
    let outcome = save_name(&mut store, &item, 1, "Acme Corp");
    let SaveOutcome::ConflictResolved { entity, details, summary, audit_id } = outcome else {
        panic!("expected conflict resolution");
    };

    // Merged entity: user's intent on top of current version.
    assert_eq!(entity.field("name"), Some(&json!("Acme Corp")));
    assert_eq!(entity.version, 2);

    assert_eq!(details.fields.len(), 1);
    assert_eq!(details.fields[0].field, "name");
    assert_eq!(details.fields[0].server_value, json!("Acme LLC"));
    assert_eq!(details.fields[0].intended_value, json!("Acme Corp"));
    assert!(summary.contains("name"));

    // Stored state is untouched by the losing attempt.
    let reloaded = store.graph_get(&item).expect("reload");
    assert_eq!(reloaded.field("name"), Some(&json!("Acme LLC")));
    assert_eq!(reloaded.version, 2);

    let record = latest_audit(&mut store, &item);
    assert_eq!(record.id, audit_id);
    assert_eq!(record.outcome, AuditOutcome::ConflictResolved);
    assert_eq!(record.resolution, Some(ResolutionType::AutoResolvedPatchReplay));
    assert_eq!(record.conflict_details.as_ref().expect("details").fields.len(), 1);
    assert!(record.entries.is_empty(), "the losing attempt wrote no rows");

    // Resubmitting the merged entity succeeds at the current version.
    let SaveOutcome::Committed { entity, .. } = save_name(&mut store, &item, 2, "Acme Corp") else {
        panic!("expected committed resubmission");
    };
    assert_eq!(entity.version, 3);
    assert_eq!(entity.field("name"), Some(&json!("Acme Corp")));
}

#[test]
fn coincidentally_equal_intent_is_not_a_field_conflict() {
    let dir = temp_dir("coincidental_equality");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Customer, "Acme");

    let SaveOutcome::Committed { .. } = save_name(&mut store, &item, 1, "Acme Corp") else {
        panic!("expected committed save");
    };

    // Stale version, but the intended value matches what the
    // concurrent writer already saved.
    let outcome = save_name(&mut store, &item, 1, "Acme Corp");
    let SaveOutcome::ConflictResolved { entity, details, summary, .. } = outcome else {
        panic!("expected conflict resolution");
    };
    assert!(details.fields.is_empty());
    assert!(details.relationships.is_empty());
    assert_eq!(entity.version, 2);
    assert!(summary.contains("reapplied cleanly"));
}

#[test]
fn relationship_divergence_is_recorded_with_ids_and_counts() {
    let dir = temp_dir("relationship_conflict");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let product = create_entity(&mut store, EntityKind::Product, "Widget");
    let cat_a = create_entity(&mut store, EntityKind::Category, "A").id.into_string();
    let cat_b = create_entity(&mut store, EntityKind::Category, "B").id.into_string();
    let cat_c = create_entity(&mut store, EntityKind::Category, "C").id.into_string();

    // Concurrent writer links {a, b}.
    let patch = json!({"categories_ids": [cat_a, cat_b]}).to_string();
    let SaveOutcome::Committed { .. } = store
        .graph_save(GraphSaveRequest {
            item: product.clone(),
            submitted_version: 1,
            field_params: BTreeMap::new(),
            raw_patch: Some(patch),
            reason: "categorize".to_string(),
        })
        .expect("link save")
    else {
        panic!("expected committed save");
    };

    // The user, still on version 1, wants {a, c}.
    let patch = json!({"categories_ids": [cat_a, cat_c]}).to_string();
    let outcome = store
        .graph_save(GraphSaveRequest {
            item: product.clone(),
            submitted_version: 1,
            field_params: BTreeMap::new(),
            raw_patch: Some(patch),
            reason: "categorize".to_string(),
        })
        .expect("stale save");
    let SaveOutcome::ConflictResolved { entity, details, .. } = outcome else {
        panic!("expected conflict resolution");
    };

    assert_eq!(details.relationships.len(), 1);
    let conflict = &details.relationships[0];
    assert_eq!(conflict.relation, "categories");
    assert_eq!(conflict.concurrent_links, vec![cat_b.clone()]);
    assert_eq!(conflict.concurrent_unlinks, vec![cat_c.clone()]);
    assert_eq!(conflict.concurrent_link_count, 1);
    assert_eq!(conflict.concurrent_unlink_count, 1);

    // Replayed selection is the user's desired set, not the stored one.
    let expected: std::collections::BTreeSet<String> =
        [cat_a.clone(), cat_c.clone()].into_iter().collect();
    assert_eq!(entity.linked_ids("categories"), expected);

    // Storage still holds the concurrent writer's set.
    let reloaded = store.graph_get(&product).expect("reload");
    let stored: std::collections::BTreeSet<String> = [cat_a, cat_b].into_iter().collect();
    assert_eq!(reloaded.linked_ids("categories"), stored);
}

#[test]
fn conflict_details_survive_in_the_ledger() {
    let dir = temp_dir("details_in_ledger");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Customer, "Acme");

    let SaveOutcome::Committed { .. } = save_name(&mut store, &item, 1, "Acme LLC") else {
        panic!("expected committed save");
    };
    let SaveOutcome::ConflictResolved { .. } = save_name(&mut store, &item, 1, "Acme Corp") else {
        panic!("expected conflict resolution");
    };

    let record = latest_audit(&mut store, &item);
    let details = record.conflict_details.expect("persisted details");
    assert_eq!(details.fields.len(), 1);
    assert_eq!(details.fields[0].server_value, json!("Acme LLC"));
}
