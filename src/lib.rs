//! DbCluster Kubernetes Operator
//!
//! Deploys and operates multi-role database clusters: a coordinator tier, a
//! storage tier and a SQL frontend tier, each run by a ReplicationController
//! behind a Service.
//!
//! ## Custom Resources
//!
//! - `DbCluster`: desired version and replica counts of each role
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: dbcluster.io/v1alpha1
//! kind: DbCluster
//! metadata:
//!   name: orders
//! spec:
//!   version: v1.0.8
//!   coordinator:
//!     replicas: 3
//!   storage:
//!     replicas: 3
//!     storageSize: 100Gi
//!   frontend:
//!     replicas: 2
//! ```

pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod gc;
pub mod platform;
pub mod retry;

pub use config::{OperatorConfig, ProvisionerKind, RoleLimits};
pub use controllers::{Reconciler, Watcher, WatcherTimings};
pub use crd::{
    ClusterCondition, ClusterPhase, ComponentSpec, DbCluster, DbClusterSpec, DbClusterStatus,
    Role, RolePhase, RoleStatus, Store,
};
pub use error::{OperatorError, Result};
pub use platform::{HttpHealthChecker, KubePlatform, Platform};
