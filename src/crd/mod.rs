//! Custom Resource Definitions for the DbCluster operator
//!
//! Defines the CRD that the operator manages:
//! - DbCluster: a coordinator/storage/frontend database deployment

mod cluster;

pub use cluster::{
    ClusterCondition, ClusterPhase, ComponentSpec, DbCluster, DbClusterSpec, DbClusterStatus,
    Member, ResourceList, ResourceRequirements, Role, RolePhase, RoleStatus, Store, MIN_REPLICAS,
};
