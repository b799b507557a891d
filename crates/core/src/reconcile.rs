#![forbid(unsafe_code)]

use std::collections::BTreeSet;

/// Link/unlink operations that take a relationship's stored link set
/// to a desired-id set. Pure set algebra: applying the plan yields
/// `linked == desired`, and re-diffing afterwards yields a no-op.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_link: Vec<String>,
    pub to_unlink: Vec<String>,
}

impl ReconcilePlan {
    pub fn diff(current: &BTreeSet<String>, desired: &[String]) -> Self {
        let desired = desired_set(desired);
        Self {
            to_link: desired.difference(current).cloned().collect(),
            to_unlink: current.difference(&desired).cloned().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_link.is_empty() && self.to_unlink.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.to_link.len() + self.to_unlink.len()
    }
}

/// Deduplicates and strips blanks from a desired-id list.
pub fn desired_set(desired: &[String]) -> BTreeSet<String> {
    desired
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
