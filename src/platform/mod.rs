//! Platform gateway
//!
//! Everything the operator asks of the Kubernetes API server goes through the
//! [`Platform`] trait, so the watch controller, reconciler and garbage
//! collector can be exercised against a mock in tests and against
//! [`KubePlatform`] in production.

mod health;
mod job;
mod kube_platform;
mod pod;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, ReplicationController, Service};
use kube::api::WatchEvent;

#[cfg(test)]
use mockall::automock;

use crate::controllers::AuditEvent;
use crate::crd::{DbCluster, DbClusterStatus};
use crate::error::Result;

pub use health::{HealthChecker, HttpHealthChecker};
#[cfg(test)]
pub use health::MockHealthChecker;
pub use job::{create_and_wait_job, JOB_POLL_INTERVAL};
pub use kube_platform::KubePlatform;
pub use pod::{is_pod_ok, is_pod_broken, pod_image};

/// Stream of raw watch events for DbClusters
pub type ClusterWatchStream = BoxStream<'static, Result<WatchEvent<DbCluster>>>;

/// Result of listing DbClusters
#[derive(Debug, Clone, Default)]
pub struct ClusterList {
    pub items: Vec<DbCluster>,
    /// Collection resource version to start watching from
    pub resource_version: String,
}

/// Trait abstracting Kubernetes API operations
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production. All operations are scoped to the
/// operator's namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Register (or update) the DbCluster CRD
    async fn ensure_cluster_crd(&self) -> Result<()>;

    /// List all DbClusters with the collection resource version
    async fn list_clusters(&self) -> Result<ClusterList>;

    /// Open a watch on DbClusters starting after `resource_version`
    async fn watch_clusters(&self, resource_version: &str) -> Result<ClusterWatchStream>;

    /// Merge-patch the status subresource of a DbCluster
    async fn patch_cluster_status(&self, name: &str, status: &DbClusterStatus) -> Result<()>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    /// Delete a service; absent services are not an error
    async fn delete_service(&self, name: &str) -> Result<()>;

    async fn create_workload(&self, workload: &ReplicationController) -> Result<()>;

    /// Delete a replication controller and its pods; absent is not an error
    async fn delete_workload(&self, name: &str) -> Result<()>;

    /// Set the desired replica count of a replication controller
    async fn scale_workload(&self, name: &str, replicas: i32) -> Result<()>;

    /// Point a replication controller's container at a new image
    async fn set_workload_image(&self, name: &str, container: &str, image: &str) -> Result<()>;

    /// List pods matching a label selector
    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>>;

    /// Delete a pod; absent pods are not an error
    async fn delete_pod(&self, name: &str) -> Result<()>;

    async fn create_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, name: &str) -> Result<Job>;

    /// Delete a job and its pods; absent jobs are not an error
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Publish an audit record as a Kubernetes Event on the cluster
    async fn publish_event(&self, event: &AuditEvent) -> Result<()>;
}
