//! Operator configuration
//!
//! Plain values consumed by the watch controller, reconciler and garbage
//! collector. Loading is done by the CLI in `main.rs`.

use crate::crd::Role;
use crate::error::{OperatorError, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// How storage volumes are laid out and reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProvisionerKind {
    /// Pod-local volumes; nothing to reclaim
    None,
    /// Directories under a host mount, one per storage pod
    HostPath,
}

/// Upper bound on replicas per role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleLimits {
    pub coordinator: i32,
    pub storage: i32,
    pub frontend: i32,
}

impl RoleLimits {
    pub fn max_replicas(&self, role: Role) -> i32 {
        match role {
            Role::Coordinator => self.coordinator,
            Role::Storage => self.storage,
            Role::Frontend => self.frontend,
        }
    }
}

impl Default for RoleLimits {
    fn default() -> Self {
        Self {
            coordinator: 7,
            storage: 100,
            frontend: 50,
        }
    }
}

/// Configuration surface of the operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Node this process runs on; host-path volumes are only removed locally
    pub node_name: String,
    /// Namespace holding DbClusters and their workloads
    pub namespace: String,
    pub provisioner: ProvisionerKind,
    /// Host directory holding per-pod volume directories
    pub host_path_root: Option<PathBuf>,
    /// Directory names under the host-path root that are never reclaimed
    pub gc_exclude: Vec<String>,
    /// Image registry prefix, e.g. `registry.example.com/db`
    pub registry: String,
    pub limits: RoleLimits,
    /// How long a health gate may poll before giving up
    pub health_timeout: Duration,
    /// Startup attempts before giving up (0 = unbounded)
    pub startup_max_attempts: u32,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(OperatorError::Configuration(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.registry.is_empty() {
            return Err(OperatorError::Configuration(
                "image registry must not be empty".to_string(),
            ));
        }
        if self.provisioner == ProvisionerKind::HostPath {
            if self.host_path_root.is_none() {
                return Err(OperatorError::Configuration(
                    "host-path provisioner requires --host-path-root".to_string(),
                ));
            }
            if self.node_name.is_empty() {
                return Err(OperatorError::Configuration(
                    "host-path provisioner requires --node-name, NODE_NAME or HOSTNAME"
                        .to_string(),
                ));
            }
        }
        for role in Role::ALL {
            if self.limits.max_replicas(role) < crate::crd::MIN_REPLICAS {
                return Err(OperatorError::Configuration(format!(
                    "max replicas of {} must be at least {}",
                    role,
                    crate::crd::MIN_REPLICAS
                )));
            }
        }
        Ok(())
    }
}

/// Detects the namespace to manage.
///
/// Priority: explicit argument → service account file → `"default"`.
pub fn detect_namespace(explicit: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

/// Detects the node name: explicit value, then `NODE_NAME`, then `HOSTNAME`.
pub fn detect_node_name(explicit: &str) -> Option<String> {
    if !explicit.is_empty() {
        return Some(explicit.to_string());
    }
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|s| !s.is_empty())
}

/// Split a comma-separated exclude list
pub fn parse_exclude(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OperatorConfig {
        OperatorConfig {
            node_name: "node-1".to_string(),
            namespace: "db".to_string(),
            provisioner: ProvisionerKind::None,
            host_path_root: None,
            gc_exclude: vec![],
            registry: "registry.local".to_string(),
            limits: RoleLimits::default(),
            health_timeout: Duration::from_secs(300),
            startup_max_attempts: 0,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_host_path_requires_root() {
        let mut cfg = config();
        cfg.provisioner = ProvisionerKind::HostPath;
        assert!(matches!(
            cfg.validate(),
            Err(OperatorError::Configuration(_))
        ));

        cfg.host_path_root = Some(PathBuf::from("/data"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_host_path_requires_node_name() {
        let mut cfg = config();
        cfg.provisioner = ProvisionerKind::HostPath;
        cfg.host_path_root = Some(PathBuf::from("/data"));
        cfg.node_name.clear();
        assert!(matches!(
            cfg.validate(),
            Err(OperatorError::Configuration(_))
        ));
    }

    #[test]
    fn test_limits_below_minimum_rejected() {
        let mut cfg = config();
        cfg.limits.frontend = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_exclude() {
        assert_eq!(
            parse_exclude("grafana, prometheus,,"),
            vec!["grafana".to_string(), "prometheus".to_string()]
        );
        assert!(parse_exclude("").is_empty());
    }

    #[test]
    fn test_detect_namespace_explicit() {
        assert_eq!(detect_namespace("tenant-a"), "tenant-a");
    }
}
