#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use bo_core::entity::{EntityKind, EntityRef};
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq)]
pub struct GraphCreateRequest {
    pub kind: EntityKind,
    pub fields: BTreeMap<String, JsonValue>,
    pub reason: String,
}

/// One save attempt: directly submitted field params plus the raw
/// client-accumulated patch JSON. `submitted_version` is the version
/// the client loaded the entity at.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphSaveRequest {
    pub item: EntityRef,
    pub submitted_version: i64,
    pub field_params: BTreeMap<String, JsonValue>,
    pub raw_patch: Option<String>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphDestroyRequest {
    pub item: EntityRef,
    pub submitted_version: i64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditTrailRequest {
    pub item: EntityRef,
    pub cursor: Option<i64>,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListEntitiesRequest {
    pub kind: EntityKind,
    pub cursor: Option<String>,
    pub limit: usize,
}
