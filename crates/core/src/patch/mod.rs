#![forbid(unsafe_code)]

mod normalize;


use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// One field's intended change. `original` is the value the client saw
/// at load time when the wire shape carried it; it is informational
/// only, conflict detection always diffs against current server state.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub original: Option<JsonValue>,
    pub intended: JsonValue,
}

/// One child-row operation inside a parent graph save.
#[derive(Clone, Debug, PartialEq)]
pub enum ChildPatch {
    Create {
        collection: String,
        client_token: String,
        fields: BTreeMap<String, JsonValue>,
    },
    Update {
        collection: String,
        id: String,
        fields: BTreeMap<String, JsonValue>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl ChildPatch {
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }
}

/// Canonical, normalized description of one save attempt's intent.
/// Relationship patches are desired-id lists: deduplicated, blanks
/// stripped, first-appearance order preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    pub field_changes: BTreeMap<String, FieldChange>,
    pub child_patches: Vec<ChildPatch>,
    pub relationship_patches: BTreeMap<String, Vec<String>>,
}

impl Patch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.field_changes.is_empty()
            && self.child_patches.is_empty()
            && self.relationship_patches.is_empty()
    }

    /// Parses raw wire JSON into a canonical patch. Malformed input
    /// degrades to an empty patch, never an error: directly submitted
    /// field params must still apply when the patch payload is broken.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::empty();
        }
        match serde_json::from_str::<JsonValue>(trimmed) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::empty(),
        }
    }

    pub fn from_value(value: &JsonValue) -> Self {
        normalize::normalize_value(value)
    }

    /// Overlays directly submitted field params underneath the patch:
    /// params fill in fields the patch does not already describe, the
    /// patch's intended values win where both name the same field.
    pub fn overlay_params(&mut self, params: &BTreeMap<String, JsonValue>) {
        for (field, value) in params {
            self.field_changes
                .entry(field.clone())
                .or_insert_with(|| FieldChange {
                    original: None,
                    intended: value.clone(),
                });
        }
    }

    /// Intended parent field values, keyed by field name.
    pub fn intended_fields(&self) -> BTreeMap<String, JsonValue> {
        self.field_changes
            .iter()
            .map(|(field, change)| (field.clone(), change.intended.clone()))
            .collect()
    }
}
