#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{ChildPatch, FieldChange, Patch};

/// Collapses the legacy wire shapes into one canonical patch.
///
/// Precedence when several shapes describe the same target:
/// `parent` > `parent_attributes` for parent fields, and
/// `relationships` > `<collection>_attributes` per child collection.
/// `<relation>_ids` is the only source of desired-id sets. Unknown
/// top-level keys are ignored, not rejected.
pub(super) fn normalize_value(value: &JsonValue) -> Patch {
    let Some(root) = value.as_object() else {
        return Patch::empty();
    };

    let mut patch = Patch::default();

    if let Some(attrs) = root.get("parent_attributes").and_then(JsonValue::as_object) {
        for (field, entry) in attrs {
            if field.starts_with('_') {
                continue;
            }
            patch
                .field_changes
                .insert(field.clone(), field_change_from_entry(entry));
        }
    }

    if let Some(parent) = root.get("parent").and_then(JsonValue::as_object) {
        for (field, intended) in parent {
            if field.starts_with('_') {
                continue;
            }
            patch
                .field_changes
                .entry(field.clone())
                .and_modify(|change| change.intended = intended.clone())
                .or_insert_with(|| FieldChange {
                    original: None,
                    intended: intended.clone(),
                });
        }
    }

    let mut child_sources: BTreeMap<String, Vec<ChildPatch>> = BTreeMap::new();

    for (key, entries) in root {
        let Some(collection) = key.strip_suffix("_attributes") else {
            continue;
        };
        if collection.is_empty() || collection == "parent" {
            continue;
        }
        child_sources.insert(collection.to_string(), child_map_patches(collection, entries));
    }

    if let Some(relationships) = root.get("relationships").and_then(JsonValue::as_object) {
        for (name, entries) in relationships {
            let Some(list) = entries.as_array() else {
                continue;
            };
            child_sources.insert(name.clone(), action_list_patches(name, list));
        }
    }

    patch.child_patches = child_sources.into_values().flatten().collect();

    for (key, ids) in root {
        let Some(relation) = key.strip_suffix("_ids") else {
            continue;
        };
        if relation.is_empty() {
            continue;
        }
        let Some(list) = ids.as_array() else {
            continue;
        };
        patch
            .relationship_patches
            .insert(relation.to_string(), desired_id_list(list));
    }

    patch
}

/// `{original_value, new_value}` entries keep the recorded original;
/// anything else is taken verbatim as the intended value.
fn field_change_from_entry(entry: &JsonValue) -> FieldChange {
    if let Some(map) = entry.as_object() {
        if let Some(new_value) = map.get("new_value") {
            return FieldChange {
                original: map.get("original_value").cloned(),
                intended: new_value.clone(),
            };
        }
    }
    FieldChange {
        original: None,
        intended: entry.clone(),
    }
}

/// Turns an id-keyed child map (or positional array) into an ordinal
/// list of child patches. Keys sort numerics-first so Rails-style
/// index maps keep their positional order, and every create gets a
/// collision-free client token.
fn child_map_patches(collection: &str, entries: &JsonValue) -> Vec<ChildPatch> {
    let keyed: Vec<(String, &JsonValue)> = match entries {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| match (parse_ordinal(a), parse_ordinal(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.cmp(b),
            });
            keys.into_iter()
                .map(|key| (key.clone(), &map[key]))
                .collect()
        }
        JsonValue::Array(list) => list
            .iter()
            .enumerate()
            .map(|(index, entry)| (index.to_string(), entry))
            .collect(),
        _ => return Vec::new(),
    };

    let mut out = Vec::new();
    for (ordinal, (key, entry)) in keyed.into_iter().enumerate() {
        let Some(map) = entry.as_object() else {
            continue;
        };
        if let Some(child) = classify_child_entry(collection, &key, ordinal, map) {
            out.push(child);
        }
    }
    out
}

fn classify_child_entry(
    collection: &str,
    key: &str,
    ordinal: usize,
    entry: &JsonMap<String, JsonValue>,
) -> Option<ChildPatch> {
    let id = entry
        .get("id")
        .and_then(value_as_id)
        .or_else(|| persisted_key_id(key));
    let destroy = entry.get("_destroy").map(is_truthy).unwrap_or(false);

    if destroy {
        // A delete marker on a never-persisted row is a no-op.
        let id = id?;
        return Some(ChildPatch::Delete {
            collection: collection.to_string(),
            id,
        });
    }

    let fields = entry_fields(entry);
    match id {
        Some(id) => Some(ChildPatch::Update {
            collection: collection.to_string(),
            id,
            fields,
        }),
        None => Some(ChildPatch::Create {
            collection: collection.to_string(),
            client_token: client_token(key, ordinal),
            fields,
        }),
    }
}

/// `relationships: {name: [{action, attributes|id}]}` entries, kept in
/// listed order. Unrecognized actions and update/destroy entries with
/// no resolvable id are dropped rather than failing the whole patch.
fn action_list_patches(collection: &str, list: &[JsonValue]) -> Vec<ChildPatch> {
    let mut out = Vec::new();
    for (ordinal, entry) in list.iter().enumerate() {
        let Some(map) = entry.as_object() else {
            continue;
        };
        let Some(action) = map.get("action").and_then(JsonValue::as_str) else {
            continue;
        };
        let attributes = map
            .get("attributes")
            .and_then(JsonValue::as_object)
            .map(entry_fields)
            .unwrap_or_else(|| entry_fields(map));
        let id = map
            .get("id")
            .and_then(value_as_id)
            .or_else(|| attributes.get("id").and_then(value_as_id));

        match action {
            "create" | "add" | "new" => out.push(ChildPatch::Create {
                collection: collection.to_string(),
                client_token: id.unwrap_or_else(|| format!("ord_{ordinal}")),
                fields: attributes,
            }),
            "update" | "change" => {
                let Some(id) = id else { continue };
                out.push(ChildPatch::Update {
                    collection: collection.to_string(),
                    id,
                    fields: attributes,
                });
            }
            "destroy" | "delete" | "remove" => {
                let Some(id) = id else { continue };
                out.push(ChildPatch::Delete {
                    collection: collection.to_string(),
                    id,
                });
            }
            _ => {}
        }
    }
    out
}

fn desired_id_list(list: &[JsonValue]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in list {
        let Some(id) = value_as_id(value) else {
            continue;
        };
        if id.is_empty() || out.contains(&id) {
            continue;
        }
        out.push(id);
    }
    out
}

fn entry_fields(entry: &JsonMap<String, JsonValue>) -> BTreeMap<String, JsonValue> {
    entry
        .iter()
        .filter(|(key, _)| {
            !key.starts_with('_') && key.as_str() != "id" && key.as_str() != "action"
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn value_as_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A map key names a persisted row when it is neither a positional
/// ordinal nor a client-assigned temporary token.
fn persisted_key_id(key: &str) -> Option<String> {
    if parse_ordinal(key).is_some() || is_client_token(key) {
        return None;
    }
    let trimmed = key.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn client_token(key: &str, ordinal: usize) -> String {
    if is_client_token(key) {
        key.to_string()
    } else {
        format!("ord_{ordinal}")
    }
}

fn is_client_token(key: &str) -> bool {
    key.starts_with("new") || key.starts_with("tmp")
}

fn parse_ordinal(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::String(s) => matches!(s.as_str(), "true" | "1"),
        JsonValue::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}
