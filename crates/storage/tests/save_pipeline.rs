#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use bo_core::entity::{EntityKind, EntityRef};
use bo_storage::{
    AuditTrailRequest, GraphCreateRequest, GraphSaveRequest, SaveOutcome, SqliteStore,
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

fn save(
    store: &mut SqliteStore,
    item: &EntityRef,
    version: i64,
    params: BTreeMap<String, JsonValue>,
    raw_patch: Option<&str>,
) -> SaveOutcome {
    store
        .graph_save(GraphSaveRequest {
            item: item.clone(),
            submitted_version: version,
            field_params: params,
            raw_patch: raw_patch.map(str::to_string),
            reason: "test save".to_string(),
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
fn clean_save_bumps_version_by_one_and_records_success() {
    let dir = temp_dir("clean_save");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Customer, "Acme");

    let outcome = save(
        &mut store,
        &item,
        1,
        BTreeMap::new(),
        Some(r#"{"parent": {"name": "Acme Corp"}}"#),
    );
    let SaveOutcome::Committed { entity, audit_id } = outcome else {
        panic!("expected committed save");
    };
    assert_eq!(entity.version, 2);
    assert_eq!(entity.field("name"), Some(&json!("Acme Corp")));

    let record = latest_audit(&mut store, &item);
    assert_eq!(record.id, audit_id);
    assert_eq!(record.outcome, bo_storage::AuditOutcome::Success);
    assert_eq!(record.resolution, None);
    assert_eq!(record.entries.len(), 1);
    let entry = &record.entries[0];
    assert_eq!(entry.row_kind, "entity");
    assert_eq!(entry.version_before, Some(1));
    assert_eq!(entry.version_after, Some(2));
}

#[test]
fn child_create_and_delete_group_under_one_audit_record() {
    let dir = temp_dir("child_create_delete");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Order, "#1001");

    let outcome = save(
        &mut store,
        &item,
        1,
        BTreeMap::new(),
        Some(r#"{"lines_attributes": {"0": {"title": "Widget", "quantity": 2}}}"#),
    );
    let SaveOutcome::Committed { entity, .. } = outcome else {
        panic!("expected committed save");
    };
    assert_eq!(entity.children["lines"].len(), 1);
    let first_line_id = entity.children["lines"][0].id.clone();

    // One save: create a second line, delete the first.
    let patch = format!(
        r#"{{"lines_attributes": {{
            "0": {{"title": "Gadget", "quantity": 1}},
            "1": {{"id": "{first_line_id}", "_destroy": "1"}}
        }}}}"#
    );
    let outcome = save(&mut store, &item, 2, BTreeMap::new(), Some(&patch));
    let SaveOutcome::Committed { entity, .. } = outcome else {
        panic!("expected committed save");
    };
    let lines = &entity.children["lines"];
    assert_eq!(lines.len(), 1);
    assert_ne!(lines[0].id, first_line_id);
    assert_eq!(lines[0].fields["title"], json!("Gadget"));

    let record = latest_audit(&mut store, &item);
    assert_eq!(record.outcome, bo_storage::AuditOutcome::Success);
    assert_eq!(record.entries.len(), 3, "parent + created child + deleted child");
    let kinds: Vec<&str> = record.entries.iter().map(|e| e.row_kind.as_str()).collect();
    assert_eq!(kinds, vec!["entity", "child", "child"]);
    let deleted = record
        .entries
        .iter()
        .find(|e| e.row_id == first_line_id)
        .expect("entry for deleted child");
    assert!(deleted.after_json.is_none());
}

#[test]
fn malformed_patch_degrades_to_direct_params_only() {
    let dir = temp_dir("malformed_patch");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Customer, "Acme");

    let outcome = save(
        &mut store,
        &item,
        1,
        fields(&[("name", json!("Acme Corp"))]),
        Some(r#"{"parent": {"name""#),
    );
    let SaveOutcome::Committed { entity, .. } = outcome else {
        panic!("expected committed save despite broken patch");
    };
    assert_eq!(entity.version, 2);
    assert_eq!(entity.field("name"), Some(&json!("Acme Corp")));
    assert!(entity.children.is_empty());
    assert!(entity.links.is_empty());

    let record = latest_audit(&mut store, &item);
    assert_eq!(record.entries.len(), 1, "only the parent row was touched");
}

#[test]
fn validation_failure_preserves_input_and_writes_failed_audit_record() {
    let dir = temp_dir("validation_failure");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = create_entity(&mut store, EntityKind::Order, "#1001");

    let outcome = save(
        &mut store,
        &item,
        1,
        fields(&[("status", json!("teleported"))]),
        Some(r#"{"lines_attributes": {"0": {"title": "Widget", "quantity": 0}}}"#),
    );
    let SaveOutcome::ValidationFailed { entity, issues, .. } = outcome else {
        panic!("expected validation failure");
    };

    // The as-submitted entity keeps everything the user typed.
    assert_eq!(entity.field("status"), Some(&json!("teleported")));
    assert_eq!(entity.children["lines"].len(), 1);
    assert_eq!(entity.children["lines"][0].fields["quantity"], json!(0));
    assert_eq!(issues.len(), 2);

    // Nothing persisted.
    let reloaded = store.graph_get(&item).expect("reload");
    assert_eq!(reloaded.version, 1);
    assert_eq!(reloaded.field("status"), None);
    assert!(reloaded.children.is_empty());

    // The ledger row survives the rollback, with zero version entries.
    let record = latest_audit(&mut store, &item);
    assert_eq!(record.outcome, bo_storage::AuditOutcome::ConflictFailed);
    assert_eq!(
        record.resolution,
        Some(bo_storage::ResolutionType::ValidationError)
    );
    assert!(record.entries.is_empty());
    let error_text = record.error_text.expect("error text");
    assert!(error_text.contains("status"));
    assert!(error_text.contains("quantity"));
}

#[test]
fn relationship_reconciliation_reaches_desired_set_and_is_idempotent() {
    let dir = temp_dir("reconcile_idempotent");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let product = create_entity(&mut store, EntityKind::Product, "Widget");
    let cats: Vec<String> = (0..4)
        .map(|i| {
            create_entity(&mut store, EntityKind::Category, &format!("Cat {i}"))
                .id
                .into_string()
        })
        .collect();

    // Link {0,1,2}.
    let patch = json!({ "categories_ids": [cats[0], cats[1], cats[2]] }).to_string();
    let SaveOutcome::Committed { entity, .. } =
        save(&mut store, &product, 1, BTreeMap::new(), Some(&patch))
    else {
        panic!("expected committed save");
    };
    assert_eq!(
        entity.linked_ids("categories").into_iter().collect::<Vec<_>>(),
        {
            let mut expected = vec![cats[0].clone(), cats[1].clone(), cats[2].clone()];
            expected.sort();
            expected
        }
    );

    // Move to {1,2,3}: one link, one unlink.
    let patch = json!({ "categories_ids": [cats[1], cats[2], cats[3]] }).to_string();
    let SaveOutcome::Committed { entity, .. } =
        save(&mut store, &product, 2, BTreeMap::new(), Some(&patch))
    else {
        panic!("expected committed save");
    };
    let expected: std::collections::BTreeSet<String> =
        [&cats[1], &cats[2], &cats[3]].iter().map(|s| s.to_string()).collect();
    assert_eq!(entity.linked_ids("categories"), expected);

    let record = latest_audit(&mut store, &product);
    let link_entries: Vec<_> = record
        .entries
        .iter()
        .filter(|e| e.row_kind == "link")
        .collect();
    assert_eq!(link_entries.len(), 2, "one link + one unlink");

    // Re-apply the identical desired set: no link operations at all.
    let SaveOutcome::Committed { entity, .. } =
        save(&mut store, &product, 3, BTreeMap::new(), Some(&patch))
    else {
        panic!("expected committed save");
    };
    assert_eq!(entity.linked_ids("categories"), expected);
    let record = latest_audit(&mut store, &product);
    assert!(
        record.entries.iter().all(|e| e.row_kind == "entity"),
        "second application must issue zero link operations"
    );
}

#[test]
fn unknown_relationship_target_fails_like_validation() {
    let dir = temp_dir("relationship_integrity");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let product = create_entity(&mut store, EntityKind::Product, "Widget");

    let outcome = save(
        &mut store,
        &product,
        1,
        BTreeMap::new(),
        Some(r#"{"categories_ids": ["cat_999999"]}"#),
    );
    let SaveOutcome::ValidationFailed { issues, .. } = outcome else {
        panic!("expected validation failure for dangling target id");
    };
    assert!(
        issues
            .iter()
            .any(|issue| issue.message.contains("cat_999999")),
        "issue must name the missing target"
    );

    let reloaded = store.graph_get(&product).expect("reload");
    assert!(reloaded.links.is_empty());
}

#[test]
fn unknown_relationship_name_is_reported_not_ignored() {
    let dir = temp_dir("unknown_relation");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let order = create_entity(&mut store, EntityKind::Order, "#1001");

    let outcome = save(
        &mut store,
        &order,
        1,
        BTreeMap::new(),
        Some(r#"{"categories_ids": ["cat_000001"]}"#),
    );
    let SaveOutcome::ValidationFailed { issues, .. } = outcome else {
        panic!("expected validation failure");
    };
    assert!(issues.iter().any(|i| i.message.contains("unknown relationship")));
}

#[test]
fn save_of_unknown_entity_is_an_error() {
    let dir = temp_dir("unknown_entity");
    let mut store = SqliteStore::open(&dir).expect("open store");
    let item = EntityRef::new(
        EntityKind::Customer,
        bo_core::entity::EntityId::try_new("cus_999999").expect("id"),
    );
    let err = store
        .graph_save(GraphSaveRequest {
            item,
            submitted_version: 1,
            field_params: BTreeMap::new(),
            raw_patch: None,
            reason: "test save".to_string(),
        })
        .expect_err("expected unknown id");
    assert!(matches!(err, bo_storage::StoreError::UnknownId));
}

#[test]
fn create_validation_failure_still_writes_an_audit_record() {
    let dir = temp_dir("create_validation");
    let mut store = SqliteStore::open(&dir).expect("open store");

    let outcome = store
        .graph_create(GraphCreateRequest {
            kind: EntityKind::Product,
            fields: fields(&[("name", json!("")), ("price", json!(-5))]),
            reason: "import".to_string(),
        })
        .expect("create attempt");
    let SaveOutcome::ValidationFailed { entity, issues, audit_id } = outcome else {
        panic!("expected validation failure");
    };
    assert_eq!(entity.version, 0);
    assert_eq!(issues.len(), 2);

    let record = latest_audit(&mut store, &entity.item);
    assert_eq!(record.id, audit_id);
    assert_eq!(record.outcome, bo_storage::AuditOutcome::ConflictFailed);
    assert!(record.entries.is_empty());
}
