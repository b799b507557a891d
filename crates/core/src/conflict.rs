#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One field where the user's intent disagrees with current server
/// state. Recorded only when `intended_value != server_value`; a field
/// that coincidentally matches after a concurrent write is no conflict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub server_value: JsonValue,
    pub intended_value: JsonValue,
}

/// Divergence between a desired-id set and the currently linked set at
/// resolution time. `concurrent_links` are ids linked by others that
/// the patch would drop; `concurrent_unlinks` are ids the patch still
/// assumes present that are no longer linked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipConflict {
    pub relation: String,
    pub concurrent_links: Vec<String>,
    pub concurrent_unlinks: Vec<String>,
    pub concurrent_link_count: usize,
    pub concurrent_unlink_count: usize,
}

impl RelationshipConflict {
    pub fn new(
        relation: impl Into<String>,
        concurrent_links: Vec<String>,
        concurrent_unlinks: Vec<String>,
    ) -> Self {
        let concurrent_link_count = concurrent_links.len();
        let concurrent_unlink_count = concurrent_unlinks.len();
        Self {
            relation: relation.into(),
            concurrent_links,
            concurrent_unlinks,
            concurrent_link_count,
            concurrent_unlink_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.concurrent_links.is_empty() && self.concurrent_unlinks.is_empty()
    }
}

/// Structured conflict payload persisted on the audit record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub fields: Vec<FieldConflict>,
    pub relationships: Vec<RelationshipConflict>,
}

impl ConflictDetails {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.relationships.is_empty()
    }

    /// Human-readable rendering for the re-display notice. The caller
    /// shows this next to the merged entity; resubmission stays a
    /// deliberate user action.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Another change was saved first; your edits were reapplied cleanly. \
                    Review and resubmit to save."
                .to_string();
        }

        let mut parts = Vec::new();
        if !self.fields.is_empty() {
            let names: Vec<&str> = self.fields.iter().map(|c| c.field.as_str()).collect();
            parts.push(format!(
                "{} field(s) changed by someone else: {}",
                self.fields.len(),
                names.join(", ")
            ));
        }
        for conflict in &self.relationships {
            if conflict.is_empty() {
                continue;
            }
            parts.push(format!(
                "relationship {}: {} concurrently linked, {} concurrently unlinked",
                conflict.relation, conflict.concurrent_link_count, conflict.concurrent_unlink_count
            ));
        }
        format!(
            "Another change was saved first. {}. Your edits were reapplied on top of the \
             latest state; review and resubmit to save.",
            parts.join("; ")
        )
    }
}
