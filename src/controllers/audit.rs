//! Audit trail of lifecycle operations
//!
//! Every install, upgrade and scale records one [`AuditEvent`] with its
//! outcome, whether it succeeded or not.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::crd::Role;
use crate::error::OperatorError;

/// Outcome of one lifecycle operation on one role of a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub cluster: String,
    pub role: Role,
    /// Operation name, e.g. `install`, `upgrade`, `scale`
    pub action: &'static str,
    pub succeeded: bool,
    pub message: String,
    /// When the operation finished
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build the record for `result`, appending the error on failure.
    pub fn trace(
        cluster: &str,
        role: Role,
        action: &'static str,
        result: Result<(), &OperatorError>,
        message: &str,
    ) -> Self {
        let (succeeded, message) = match result {
            Ok(()) => (true, message.to_string()),
            Err(e) => (false, format!("{}: {}", message, e)),
        };

        if succeeded {
            info!(cluster = %cluster, role = %role, action, "{}", message);
        } else {
            warn!(cluster = %cluster, role = %role, action, "{}", message);
        }

        Self {
            cluster: cluster.to_string(),
            role,
            action,
            succeeded,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Event reason, e.g. `StorageScaleFailed`
    pub fn reason(&self) -> String {
        let outcome = if self.succeeded { "Succeeded" } else { "Failed" };
        format!(
            "{}{}{}",
            crate::conditions::role_condition_type(self.role, ""),
            capitalize(self.action),
            outcome
        )
    }

    pub fn event_type(&self) -> &'static str {
        if self.succeeded {
            "Normal"
        } else {
            "Warning"
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
