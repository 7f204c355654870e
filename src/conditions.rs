//! Kubernetes-standard status condition helpers
//!
//! Provides constants and builder functions for the per-role conditions
//! recorded on `DbCluster` status, following the Kubernetes API conventions.

use crate::crd::{ClusterCondition, Role};
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// Per-role condition suffixes
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_DEGRADED: &str = "Degraded";

// Condition reasons
pub const REASON_STARTED: &str = "Started";
pub const REASON_START_FAILED: &str = "StartFailed";
pub const REASON_SCALE_FAILED: &str = "ScaleFailed";
pub const REASON_SCALE_REJECTED: &str = "ScaleRejected";
pub const REASON_UPGRADE_FAILED: &str = "UpgradeFailed";

/// Condition type for a role, e.g. `StorageReady`
pub fn role_condition_type(role: Role, suffix: &str) -> String {
    let name = role.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", first.to_ascii_uppercase(), chars.as_str(), suffix),
        None => suffix.to_string(),
    }
}

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ClusterCondition {
    ClusterCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<ClusterCondition>, new: ClusterCondition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

/// Remove a condition type from the list
pub fn clear_condition(conditions: &mut Vec<ClusterCondition>, condition_type: &str) {
    conditions.retain(|c| c.r#type != condition_type);
}
