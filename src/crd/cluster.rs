//! DbCluster Custom Resource Definition
//!
//! Defines the custom resource for deploying a multi-role database cluster
//! (coordinator, storage and SQL-frontend) on Kubernetes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest replica count a started role may run with
pub const MIN_REPLICAS: i32 = 2;

/// DbCluster is the Schema for the dbclusters API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dbcluster.io",
    version = "v1alpha1",
    kind = "DbCluster",
    namespaced,
    status = "DbClusterStatus",
    shortname = "dbc",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterSpec {
    /// Version of the database software, used as the image tag
    #[serde(default = "default_version")]
    pub version: String,

    /// Coordinator (placement driver) role
    #[serde(default)]
    pub coordinator: ComponentSpec,

    /// Storage node role
    #[serde(default)]
    pub storage: ComponentSpec,

    /// SQL frontend role
    #[serde(default)]
    pub frontend: ComponentSpec,
}

/// Desired state of a single role
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Desired number of replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Per-role version override
    #[serde(default)]
    pub version: Option<String>,

    /// Resource requirements for each replica
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Size of the data volume (e.g. "100Gi"), storage role only
    #[serde(default)]
    pub storage_size: Option<String>,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            version: None,
            resources: ResourceRequirements::default(),
            storage_size: None,
        }
    }
}

/// Resource requirements for containers
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Resource limits
    #[serde(default)]
    pub limits: ResourceList,
    /// Resource requests
    #[serde(default)]
    pub requests: ResourceList,
}

/// Resource quantities
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ResourceList {
    /// CPU limit/request (e.g., "500m", "2")
    #[serde(default)]
    pub cpu: Option<String>,
    /// Memory limit/request (e.g., "512Mi", "2Gi")
    #[serde(default)]
    pub memory: Option<String>,
}

/// Component roles of a cluster, in install order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Coordinator,
    Storage,
    Frontend,
}

impl Role {
    /// Install order; uninstall runs in reverse
    pub const ALL: [Role; 3] = [Role::Coordinator, Role::Storage, Role::Frontend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coordinator => "coordinator",
            Role::Storage => "storage",
            Role::Frontend => "frontend",
        }
    }

    /// Image repository name under the configured registry
    pub fn image(&self) -> &'static str {
        match self {
            Role::Coordinator => "pd",
            Role::Storage => "tikv",
            Role::Frontend => "tidb",
        }
    }

    /// Port clients connect to
    pub fn client_port(&self) -> i32 {
        match self {
            Role::Coordinator => 2379,
            Role::Storage => 20160,
            Role::Frontend => 4000,
        }
    }

    /// Port serving the status endpoint
    pub fn status_port(&self) -> i32 {
        match self {
            Role::Coordinator => 2379,
            Role::Storage => 20180,
            Role::Frontend => 10080,
        }
    }

    pub fn status_path(&self) -> &'static str {
        match self {
            Role::Coordinator => "/pd/api/v1/health",
            Role::Storage | Role::Frontend => "/status",
        }
    }

    /// Bit recorded in `DbClusterStatus::scale_state` when scaling this role fails
    pub fn scale_error_bit(&self) -> u8 {
        match self {
            Role::Coordinator => 0b001,
            Role::Storage => 0b010,
            Role::Frontend => 0b100,
        }
    }

    /// Role installed before this one
    pub fn predecessor(&self) -> Option<Role> {
        match self {
            Role::Coordinator => None,
            Role::Storage => Some(Role::Coordinator),
            Role::Frontend => Some(Role::Storage),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the DbCluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterStatus {
    /// Current phase of the cluster, derived from the role phases
    #[serde(default)]
    pub phase: ClusterPhase,
    #[serde(default)]
    pub coordinator: RoleStatus,
    #[serde(default)]
    pub storage: RoleStatus,
    #[serde(default)]
    pub frontend: RoleStatus,
    /// Scale error bits, one per role
    #[serde(default)]
    pub scale_state: u8,
    /// Progress of an external data migration into the cluster
    #[serde(default)]
    pub migrate_state: Option<String>,
    /// Client endpoints of the SQL frontend
    #[serde(default)]
    pub outer_addresses: Vec<String>,
    /// Conditions representing cluster state
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
    /// Last update timestamp
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl DbClusterStatus {
    pub fn role(&self, role: Role) -> &RoleStatus {
        match role {
            Role::Coordinator => &self.coordinator,
            Role::Storage => &self.storage,
            Role::Frontend => &self.frontend,
        }
    }

    pub fn role_mut(&mut self, role: Role) -> &mut RoleStatus {
        match role {
            Role::Coordinator => &mut self.coordinator,
            Role::Storage => &mut self.storage,
            Role::Frontend => &mut self.frontend,
        }
    }

    pub fn has_scale_error(&self, role: Role) -> bool {
        self.scale_state & role.scale_error_bit() != 0
    }

    pub fn set_scale_error(&mut self, role: Role, failed: bool) {
        if failed {
            self.scale_state |= role.scale_error_bit();
        } else {
            self.scale_state &= !role.scale_error_bit();
        }
    }

    /// Recompute the overall phase from the role phases
    pub fn refresh_phase(&mut self) {
        let phases: Vec<Option<RolePhase>> =
            Role::ALL.iter().map(|r| self.role(*r).phase).collect();

        self.phase = if phases.contains(&Some(RolePhase::StartFailed)) {
            ClusterPhase::Failed
        } else if phases.contains(&Some(RolePhase::Upgrading)) {
            ClusterPhase::Upgrading
        } else if phases.contains(&Some(RolePhase::Scaling)) {
            ClusterPhase::Scaling
        } else if phases.iter().all(|p| *p == Some(RolePhase::Started)) {
            ClusterPhase::Running
        } else {
            ClusterPhase::Pending
        };
    }
}

/// Observed state of a single role
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    /// Lifecycle phase, absent until the first install
    #[serde(default)]
    pub phase: Option<RolePhase>,
    /// Replica count the workload controller was last set to
    #[serde(default)]
    pub replicas: i32,
    /// Version all replicas are known to run
    #[serde(default)]
    pub version: Option<String>,
    /// Version whose rollout failed; not retried until the desired version changes
    #[serde(default)]
    pub failed_version: Option<String>,
    /// Live pods of the role
    #[serde(default)]
    pub members: Vec<Member>,
    /// Storage nodes, storage role only
    #[serde(default)]
    pub stores: Vec<Store>,
}

/// Lifecycle phase of a role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum RolePhase {
    Pending,
    Started,
    StartFailed,
    Upgrading,
    Scaling,
}

impl RolePhase {
    /// Transition table; `from == None` means the role was never installed.
    pub fn can_transition(from: Option<RolePhase>, to: RolePhase) -> bool {
        use RolePhase::*;
        match from {
            None => to == Pending,
            Some(Pending) => matches!(to, Pending | Started | StartFailed),
            Some(Started) => matches!(to, Started | Upgrading | Scaling),
            Some(Upgrading) | Some(Scaling) => to == Started,
            Some(StartFailed) => false,
        }
    }
}

impl fmt::Display for RolePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A pod belonging to a role
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Member {
    pub name: String,
}

/// A storage node and the volume backing it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    /// Store identity; equals the pod name and the volume directory name
    pub id: String,
    /// Node the store's volume lives on
    #[serde(default)]
    pub node: Option<String>,
    /// Tombstoned; the backing volume may be reclaimed
    #[serde(default)]
    pub buried: bool,
}

/// Phase of the cluster lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Cluster is being created
    #[default]
    Pending,
    /// All roles are started
    Running,
    /// A role is being scaled
    Scaling,
    /// A role is being upgraded
    Upgrading,
    /// A role failed to start
    Failed,
}

/// Condition of the cluster
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl DbCluster {
    pub fn component(&self, role: Role) -> &ComponentSpec {
        match role {
            Role::Coordinator => &self.spec.coordinator,
            Role::Storage => &self.spec.storage,
            Role::Frontend => &self.spec.frontend,
        }
    }

    /// Version requested for a role, honouring the per-role override
    pub fn desired_version(&self, role: Role) -> &str {
        self.component(role)
            .version
            .as_deref()
            .unwrap_or(&self.spec.version)
    }

    pub fn role_status(&self, role: Role) -> RoleStatus {
        self.status
            .as_ref()
            .map(|s| s.role(role).clone())
            .unwrap_or_default()
    }

    pub fn status_mut(&mut self) -> &mut DbClusterStatus {
        self.status.get_or_insert_with(DbClusterStatus::default)
    }

    /// All stores known for this cluster, buried or not
    pub fn stores(&self) -> &[Store] {
        self.status
            .as_ref()
            .map(|s| s.storage.stores.as_slice())
            .unwrap_or_default()
    }
}

fn default_version() -> String {
    "v1.0.8".to_string()
}

fn default_replicas() -> i32 {
    3
}
