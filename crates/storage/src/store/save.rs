#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use bo_core::conflict::ConflictDetails;
use bo_core::entity::{ChildRecord, EntityId, EntityRef, GraphEntity};
use bo_core::patch::{ChildPatch, Patch};
use bo_core::reconcile::{ReconcilePlan, desired_set};
use bo_core::rules::{self, ValidationIssue};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use super::entities::load_graph_entity_tx;
use super::ledger::{AuditOutcome, ResolutionType};
use super::resolve::resolve_version_conflict;
use super::support::audit_tx::{
    AuditContext, VersionEntryInsert, audit_finalize_tx, audit_open_tx, version_entry_append_tx,
};
use super::support::child_tx::{
    ChildRow, child_get_tx, child_insert_tx, child_soft_delete_tx, child_update_tx,
    children_delete_all_tx, children_load_tx,
};
use super::support::entity_tx::{
    entity_delete_tx, entity_exists_tx, entity_get_tx, entity_insert_tx, entity_update_cas_tx,
    fields_to_json, next_id_tx,
};
use super::support::link_tx::{
    link_stamp_deleted_tx, link_upsert_tx, links_delete_all_tx, links_live_for_tx, links_live_tx,
};
use super::{
    GraphCreateRequest, GraphDestroyRequest, GraphSaveRequest, SqliteStore, StoreError, now_ms,
};

/// What a save attempt came to. Validation failures and resolved
/// conflicts are recovered outcomes, not errors: both hand back an
/// in-memory entity for re-display and leave a finalized audit record
/// behind.
#[derive(Clone, Debug)]
pub enum SaveOutcome {
    Committed {
        entity: GraphEntity,
        audit_id: i64,
    },
    ValidationFailed {
        entity: GraphEntity,
        issues: Vec<ValidationIssue>,
        audit_id: i64,
    },
    ConflictResolved {
        entity: GraphEntity,
        details: ConflictDetails,
        summary: String,
        audit_id: i64,
    },
}

enum Attempt {
    Committed(GraphEntity),
    ValidationFailed {
        entity: GraphEntity,
        issues: Vec<ValidationIssue>,
    },
    Conflict,
    Failed(StoreError),
}

enum PersistFailure {
    Validation {
        entity: GraphEntity,
        issues: Vec<ValidationIssue>,
    },
    VersionMismatch,
    Store(StoreError),
}

impl From<StoreError> for PersistFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionMismatch { .. } => Self::VersionMismatch,
            other => Self::Store(other),
        }
    }
}

impl SqliteStore {
    pub fn graph_create(&mut self, request: GraphCreateRequest) -> Result<SaveOutcome, StoreError> {
        if request.reason.trim().is_empty() {
            return Err(StoreError::InvalidInput("reason must not be empty"));
        }

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let id = next_id_tx(&tx, request.kind.as_str(), request.kind.id_prefix())?;
        let id = EntityId::try_new(id)
            .map_err(|_| StoreError::InvalidInput("allocated id is invalid"))?;
        let item = EntityRef::new(request.kind, id);
        let ctx = audit_open_tx(&tx, &item, &request.reason, now)?;

        let issues = rules::validate_entity(request.kind, &request.fields);
        if !issues.is_empty() {
            finalize_validation_failure(&tx, &ctx, &issues)?;
            tx.commit()?;
            let mut entity = GraphEntity::new(item, 0);
            entity.fields = request.fields;
            return Ok(SaveOutcome::ValidationFailed {
                entity,
                issues,
                audit_id: ctx.audit_id(),
            });
        }

        entity_insert_tx(&tx, &item, &request.fields, now)?;
        version_entry_append_tx(
            &tx,
            &ctx,
            VersionEntryInsert {
                row_kind: "entity",
                collection: None,
                row_id: item.id.as_str(),
                version_before: None,
                version_after: Some(1),
                before_json: None,
                after_json: Some(fields_to_json(&request.fields)?),
            },
            now,
        )?;
        audit_finalize_tx(&tx, &ctx, AuditOutcome::Success, None, None, None)?;
        tx.commit()?;

        let mut entity = GraphEntity::new(item, 1);
        entity.fields = request.fields;
        Ok(SaveOutcome::Committed {
            entity,
            audit_id: ctx.audit_id(),
        })
    }

    /// One graph save attempt: normalize → validate → persist →
    /// commit, with the audit record opened at transaction start and
    /// finalized on every path. Row writes happen under a savepoint so
    /// validation failures and version conflicts can roll them back
    /// while the ledger row still commits.
    pub fn graph_save(&mut self, request: GraphSaveRequest) -> Result<SaveOutcome, StoreError> {
        if request.reason.trim().is_empty() {
            return Err(StoreError::InvalidInput("reason must not be empty"));
        }
        if request.submitted_version < 1 {
            return Err(StoreError::InvalidInput("submitted_version must be at least 1"));
        }

        let mut patch = match request.raw_patch.as_deref() {
            Some(raw) => Patch::normalize(raw),
            None => Patch::empty(),
        };
        patch.overlay_params(&request.field_params);

        let now = now_ms();
        let mut tx = self.conn.transaction()?;

        if entity_get_tx(&tx, &request.item)?.is_none() {
            return Err(StoreError::UnknownId);
        }
        let ctx = audit_open_tx(&tx, &request.item, &request.reason, now)?;

        let attempt = {
            let sp = tx.savepoint()?;
            match persist_graph_patch(&sp, &ctx, &request, &patch, now) {
                Ok(entity) => {
                    sp.commit()?;
                    Attempt::Committed(entity)
                }
                // Savepoint drop rolls the attempt's row writes back.
                Err(PersistFailure::Validation { entity, issues }) => {
                    Attempt::ValidationFailed { entity, issues }
                }
                Err(PersistFailure::VersionMismatch) => Attempt::Conflict,
                Err(PersistFailure::Store(err)) => Attempt::Failed(err),
            }
        };

        match attempt {
            Attempt::Committed(entity) => {
                audit_finalize_tx(&tx, &ctx, AuditOutcome::Success, None, None, None)?;
                tx.commit()?;
                Ok(SaveOutcome::Committed {
                    entity,
                    audit_id: ctx.audit_id(),
                })
            }
            Attempt::ValidationFailed { entity, issues } => {
                finalize_validation_failure(&tx, &ctx, &issues)?;
                tx.commit()?;
                Ok(SaveOutcome::ValidationFailed {
                    entity,
                    issues,
                    audit_id: ctx.audit_id(),
                })
            }
            Attempt::Conflict => {
                let (entity, details) = resolve_version_conflict(&tx, &request.item, &patch)?;
                audit_finalize_tx(
                    &tx,
                    &ctx,
                    AuditOutcome::ConflictResolved,
                    Some(ResolutionType::AutoResolvedPatchReplay),
                    Some(&details),
                    None,
                )?;
                tx.commit()?;
                let summary = details.summary();
                Ok(SaveOutcome::ConflictResolved {
                    entity,
                    details,
                    summary,
                    audit_id: ctx.audit_id(),
                })
            }
            Attempt::Failed(err) => {
                audit_finalize_tx(
                    &tx,
                    &ctx,
                    AuditOutcome::ConflictFailed,
                    Some(ResolutionType::StorageError),
                    None,
                    Some(&err.to_string()),
                )?;
                tx.commit()?;
                Err(err)
            }
        }
    }

    /// Whole-graph destroy. Not replayable: a stale version finalizes
    /// the ledger row as failed and surfaces the mismatch.
    pub fn graph_destroy(&mut self, request: GraphDestroyRequest) -> Result<i64, StoreError> {
        if request.reason.trim().is_empty() {
            return Err(StoreError::InvalidInput("reason must not be empty"));
        }

        let now = now_ms();
        let tx = self.conn.transaction()?;

        let Some(stored) = entity_get_tx(&tx, &request.item)? else {
            return Err(StoreError::UnknownId);
        };
        let ctx = audit_open_tx(&tx, &request.item, &request.reason, now)?;

        if stored.version != request.submitted_version {
            let err = StoreError::VersionMismatch {
                expected: request.submitted_version,
                actual: stored.version,
            };
            audit_finalize_tx(
                &tx,
                &ctx,
                AuditOutcome::ConflictFailed,
                None,
                None,
                Some(&err.to_string()),
            )?;
            tx.commit()?;
            return Err(err);
        }

        version_entry_append_tx(
            &tx,
            &ctx,
            VersionEntryInsert {
                row_kind: "entity",
                collection: None,
                row_id: request.item.id.as_str(),
                version_before: Some(stored.version),
                version_after: None,
                before_json: Some(fields_to_json(&stored.fields)?),
                after_json: None,
            },
            now,
        )?;
        for child in children_load_tx(&tx, &request.item, false)? {
            version_entry_append_tx(
                &tx,
                &ctx,
                VersionEntryInsert {
                    row_kind: "child",
                    collection: Some(&child.collection),
                    row_id: &child.id,
                    version_before: Some(child.version),
                    version_after: None,
                    before_json: Some(fields_to_json(&child.fields)?),
                    after_json: None,
                },
                now,
            )?;
        }
        for (relation, targets) in links_live_tx(&tx, &request.item)? {
            for target in targets {
                version_entry_append_tx(
                    &tx,
                    &ctx,
                    VersionEntryInsert {
                        row_kind: "link",
                        collection: Some(&relation),
                        row_id: &target,
                        version_before: None,
                        version_after: None,
                        before_json: Some(r#"{"linked":true}"#.to_string()),
                        after_json: None,
                    },
                    now,
                )?;
            }
        }

        children_delete_all_tx(&tx, &request.item)?;
        links_delete_all_tx(&tx, &request.item)?;
        entity_delete_tx(&tx, &request.item)?;

        audit_finalize_tx(&tx, &ctx, AuditOutcome::Success, None, None, None)?;
        tx.commit()?;
        Ok(ctx.audit_id())
    }
}

fn finalize_validation_failure(
    conn: &Connection,
    ctx: &AuditContext,
    issues: &[ValidationIssue],
) -> Result<(), StoreError> {
    let error_text = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    audit_finalize_tx(
        conn,
        ctx,
        AuditOutcome::ConflictFailed,
        Some(ResolutionType::ValidationError),
        None,
        Some(&error_text),
    )
}

/// The Validating and Persisting phases, run under a savepoint. Every
/// touched row bumps its version by one and appends a version entry
/// bound to the active audit context.
fn persist_graph_patch(
    conn: &Connection,
    ctx: &AuditContext,
    request: &GraphSaveRequest,
    patch: &Patch,
    now: i64,
) -> Result<GraphEntity, PersistFailure> {
    let item = &request.item;
    let stored = entity_get_tx(conn, item)?.ok_or(StoreError::UnknownId)?;

    let mut intended = stored.fields.clone();
    for (field, change) in &patch.field_changes {
        intended.insert(field.clone(), change.intended.clone());
    }

    let children = children_load_tx(conn, item, false)?;
    let issues = validate_attempt(conn, request, patch, &intended, &children)?;
    if !issues.is_empty() {
        let links = links_live_tx(conn, item)?;
        let mut entity = as_submitted_entity(item, request.submitted_version, intended, &children, patch);
        for (relation, targets) in links {
            entity.links.entry(relation).or_insert(targets);
        }
        return Err(PersistFailure::Validation { entity, issues });
    }

    // Parent first: the CAS on its version column is the attempt's
    // only serialization point. A stale version aborts here and hands
    // off to the conflict resolver.
    let new_version = entity_update_cas_tx(conn, item, request.submitted_version, &intended, now)?;
    version_entry_append_tx(
        conn,
        ctx,
        VersionEntryInsert {
            row_kind: "entity",
            collection: None,
            row_id: item.id.as_str(),
            version_before: Some(stored.version),
            version_after: Some(new_version),
            before_json: Some(fields_to_json(&stored.fields)?),
            after_json: Some(fields_to_json(&intended)?),
        },
        now,
    )?;

    for child in &patch.child_patches {
        match child {
            ChildPatch::Create {
                collection, fields, ..
            } => {
                let counter = format!("child_{collection}");
                let prefix: String = collection.chars().take(3).collect();
                let id = next_id_tx(conn, &counter, &prefix)?;
                child_insert_tx(conn, item, collection, &id, fields, now)?;
                version_entry_append_tx(
                    conn,
                    ctx,
                    VersionEntryInsert {
                        row_kind: "child",
                        collection: Some(collection),
                        row_id: &id,
                        version_before: None,
                        version_after: Some(1),
                        before_json: None,
                        after_json: Some(fields_to_json(fields)?),
                    },
                    now,
                )?;
            }
            ChildPatch::Update {
                collection,
                id,
                fields,
            } => {
                let existing = child_get_tx(conn, item, collection, id)?
                    .ok_or(StoreError::UnknownId)?;
                let mut merged = existing.fields.clone();
                for (field, value) in fields {
                    merged.insert(field.clone(), value.clone());
                }
                let (before, after) = child_update_tx(conn, item, collection, id, &merged, now)?;
                version_entry_append_tx(
                    conn,
                    ctx,
                    VersionEntryInsert {
                        row_kind: "child",
                        collection: Some(collection),
                        row_id: id,
                        version_before: Some(before),
                        version_after: Some(after),
                        before_json: Some(fields_to_json(&existing.fields)?),
                        after_json: Some(fields_to_json(&merged)?),
                    },
                    now,
                )?;
            }
            ChildPatch::Delete { collection, id } => {
                let existing = child_get_tx(conn, item, collection, id)?
                    .ok_or(StoreError::UnknownId)?;
                let (before, after) = child_soft_delete_tx(conn, item, collection, id, now)?;
                version_entry_append_tx(
                    conn,
                    ctx,
                    VersionEntryInsert {
                        row_kind: "child",
                        collection: Some(collection),
                        row_id: id,
                        version_before: Some(before),
                        version_after: Some(after),
                        before_json: Some(fields_to_json(&existing.fields)?),
                        after_json: None,
                    },
                    now,
                )?;
            }
        }
    }

    for (relation, desired) in &patch.relationship_patches {
        let current = links_live_for_tx(conn, item, relation)?;
        let plan = ReconcilePlan::diff(&current, desired);
        for target in &plan.to_link {
            link_upsert_tx(conn, item, relation, target, &request.reason, now)?;
            version_entry_append_tx(
                conn,
                ctx,
                VersionEntryInsert {
                    row_kind: "link",
                    collection: Some(relation),
                    row_id: target,
                    version_before: None,
                    version_after: None,
                    before_json: None,
                    after_json: Some(r#"{"linked":true}"#.to_string()),
                },
                now,
            )?;
        }
        for target in &plan.to_unlink {
            link_stamp_deleted_tx(conn, item, relation, target, now)?;
            version_entry_append_tx(
                conn,
                ctx,
                VersionEntryInsert {
                    row_kind: "link",
                    collection: Some(relation),
                    row_id: target,
                    version_before: None,
                    version_after: None,
                    before_json: Some(r#"{"linked":true}"#.to_string()),
                    after_json: Some(r#"{"linked":false}"#.to_string()),
                },
                now,
            )?;
        }
    }

    let entity = load_graph_entity_tx(conn, item)?.ok_or(StoreError::UnknownId)?;
    Ok(entity)
}

/// Collects every business-rule and integrity violation in one pass;
/// nothing is reported piecemeal.
fn validate_attempt(
    conn: &Connection,
    request: &GraphSaveRequest,
    patch: &Patch,
    intended: &BTreeMap<String, JsonValue>,
    children: &[ChildRow],
) -> Result<Vec<ValidationIssue>, StoreError> {
    let item = &request.item;
    let mut issues = rules::validate_entity(item.kind, intended);

    for child in &patch.child_patches {
        let collection = child.collection();
        if !item.kind.owns_collection(collection) {
            issues.push(ValidationIssue::child(
                collection,
                child_patch_id(child),
                None,
                "unknown child collection",
            ));
            continue;
        }
        match child {
            ChildPatch::Create {
                client_token,
                fields,
                ..
            } => {
                issues.extend(rules::validate_child(collection, client_token, fields));
            }
            ChildPatch::Update { id, fields, .. } => {
                match find_child(children, collection, id) {
                    Some(existing) => {
                        let mut merged = existing.fields.clone();
                        for (field, value) in fields {
                            merged.insert(field.clone(), value.clone());
                        }
                        issues.extend(rules::validate_child(collection, id, &merged));
                    }
                    None => issues.push(ValidationIssue::child(
                        collection,
                        id.clone(),
                        None,
                        "no longer exists",
                    )),
                }
            }
            ChildPatch::Delete { id, .. } => {
                if find_child(children, collection, id).is_none() {
                    issues.push(ValidationIssue::child(
                        collection,
                        id.clone(),
                        None,
                        "no longer exists",
                    ));
                }
            }
        }
    }

    for (relation, desired) in &patch.relationship_patches {
        let Some(def) = item.kind.relationship(relation) else {
            issues.push(ValidationIssue::parent(
                relation.clone(),
                "unknown relationship",
            ));
            continue;
        };
        for target in desired_set(desired) {
            if !entity_exists_tx(conn, def.target, &target)? {
                issues.push(ValidationIssue::parent(
                    relation.clone(),
                    format!("{} {target} no longer exists", def.target.as_str()),
                ));
            }
        }
    }

    Ok(issues)
}

fn find_child<'a>(children: &'a [ChildRow], collection: &str, id: &str) -> Option<&'a ChildRow> {
    children
        .iter()
        .find(|child| child.collection == collection && child.id == id)
}

fn child_patch_id(child: &ChildPatch) -> String {
    match child {
        ChildPatch::Create { client_token, .. } => client_token.clone(),
        ChildPatch::Update { id, .. } | ChildPatch::Delete { id, .. } => id.clone(),
    }
}

/// The entity exactly as the user submitted it, for re-display after a
/// validation failure. Nothing the user typed is dropped: field edits,
/// child creates/updates/deletes, and relationship selections are all
/// applied in memory.
fn as_submitted_entity(
    item: &EntityRef,
    submitted_version: i64,
    fields: BTreeMap<String, JsonValue>,
    children: &[ChildRow],
    patch: &Patch,
) -> GraphEntity {
    let mut entity = GraphEntity::new(item.clone(), submitted_version);
    entity.fields = fields;

    for child in children {
        entity
            .children
            .entry(child.collection.clone())
            .or_default()
            .push(ChildRecord {
                id: child.id.clone(),
                version: child.version,
                fields: child.fields.clone(),
                deleted: child.deleted,
            });
    }

    for child in &patch.child_patches {
        match child {
            ChildPatch::Create {
                collection,
                client_token,
                fields,
            } => {
                entity
                    .children
                    .entry(collection.clone())
                    .or_default()
                    .push(ChildRecord {
                        id: client_token.clone(),
                        version: 0,
                        fields: fields.clone(),
                        deleted: false,
                    });
            }
            ChildPatch::Update {
                collection,
                id,
                fields,
            } => {
                if let Some(existing) = entity
                    .children
                    .get_mut(collection)
                    .and_then(|rows| rows.iter_mut().find(|row| row.id == *id))
                {
                    for (field, value) in fields {
                        existing.fields.insert(field.clone(), value.clone());
                    }
                }
            }
            ChildPatch::Delete { collection, id } => {
                if let Some(rows) = entity.children.get_mut(collection) {
                    rows.retain(|row| row.id != *id);
                }
            }
        }
    }

    for (relation, desired) in &patch.relationship_patches {
        entity.links.insert(relation.clone(), desired_set(desired));
    }

    entity
}
