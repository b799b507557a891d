#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::entity::EntityKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssueTarget {
    Parent,
    Child { collection: String, id: String },
}

/// One business-rule violation found while validating a save attempt.
/// Collected, never thrown: the caller gets the full list back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub target: IssueTarget,
    pub field: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn parent(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: IssueTarget::Parent,
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn child(
        collection: impl Into<String>,
        id: impl Into<String>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: IssueTarget::Child {
                collection: collection.into(),
                id: id.into(),
            },
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.target, &self.field) {
            (IssueTarget::Parent, Some(field)) => write!(f, "{field}: {}", self.message),
            (IssueTarget::Parent, None) => write!(f, "{}", self.message),
            (IssueTarget::Child { collection, id }, Some(field)) => {
                write!(f, "{collection}[{id}].{field}: {}", self.message)
            }
            (IssueTarget::Child { collection, id }, None) => {
                write!(f, "{collection}[{id}]: {}", self.message)
            }
        }
    }
}

pub fn validate_field_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("field name must not be empty");
    }
    if name.len() > 64 {
        return Err("field name must be at most 64 characters");
    }
    if name.chars().any(char::is_control) {
        return Err("field name must not contain control characters");
    }
    Ok(())
}

/// Entity-level rules, applied to the full intended field map.
pub fn validate_entity(kind: EntityKind, fields: &BTreeMap<String, JsonValue>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for name in fields.keys() {
        if let Err(message) = validate_field_name(name) {
            issues.push(ValidationIssue::parent(name.clone(), message));
        }
    }

    if !has_text(fields.get("name")) {
        issues.push(ValidationIssue::parent("name", "must not be blank"));
    }

    match kind {
        EntityKind::Product => {
            if let Some(price) = fields.get("price") {
                match price.as_f64() {
                    Some(value) if value >= 0.0 => {}
                    _ => issues.push(ValidationIssue::parent(
                        "price",
                        "must be a non-negative number",
                    )),
                }
            }
        }
        EntityKind::Order => {
            if let Some(status) = fields.get("status") {
                let ok = status
                    .as_str()
                    .is_some_and(|s| matches!(s, "draft" | "placed" | "shipped" | "cancelled"));
                if !ok {
                    issues.push(ValidationIssue::parent(
                        "status",
                        "must be one of draft, placed, shipped, cancelled",
                    ));
                }
            }
        }
        EntityKind::Customer | EntityKind::Category => {}
    }

    issues
}

/// Child-level rules for one row's full intended field map. `id` is
/// the persisted id or the client token for rows being created.
pub fn validate_child(
    collection: &str,
    id: &str,
    fields: &BTreeMap<String, JsonValue>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for name in fields.keys() {
        if let Err(message) = validate_field_name(name) {
            issues.push(ValidationIssue::child(collection, id, Some(name), message));
        }
    }

    match collection {
        "addresses" => {
            if !has_text(fields.get("line1")) {
                issues.push(ValidationIssue::child(
                    collection,
                    id,
                    Some("line1"),
                    "must not be blank",
                ));
            }
        }
        "variants" => {
            if !has_text(fields.get("sku")) {
                issues.push(ValidationIssue::child(
                    collection,
                    id,
                    Some("sku"),
                    "must not be blank",
                ));
            }
        }
        "lines" => {
            let ok = fields
                .get("quantity")
                .and_then(JsonValue::as_i64)
                .is_some_and(|q| q >= 1);
            if !ok {
                issues.push(ValidationIssue::child(
                    collection,
                    id,
                    Some("quantity"),
                    "must be an integer of at least 1",
                ));
            }
        }
        _ => {}
    }

    issues
}

fn has_text(value: Option<&JsonValue>) -> bool {
    value
        .and_then(JsonValue::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}
