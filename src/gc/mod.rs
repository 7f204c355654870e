//! Storage garbage collection
//!
//! Reclaims the volumes of stores that no longer back a live storage pod:
//! orphans found at startup, buried stores found periodically and on every
//! cluster change, and every store of a deleted cluster.

pub mod provisioner;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::crd::{DbCluster, Store};
use crate::error::Result;
use crate::platform::{create_and_wait_job, Platform, JOB_POLL_INTERVAL};

pub use provisioner::{
    select as select_provisioner, HostPathProvisioner, NoopProvisioner, Provisioner, Reclaim,
    StorageVolume,
};

/// Image running `rm -rf` in remote cleanup jobs
pub const CLEANUP_IMAGE: &str = "busybox:1.36";

const CLEANUP_MOUNT: &str = "/reclaim";

/// Maximum length of a job name that still fits in a label value
const MAX_JOB_NAME: usize = 63;

pub struct GarbageCollector {
    platform: Arc<dyn Platform>,
    provisioner: Arc<dyn Provisioner>,
    namespace: String,
    job_timeout: Duration,
}

impl GarbageCollector {
    pub fn new(
        platform: Arc<dyn Platform>,
        provisioner: Arc<dyn Provisioner>,
        namespace: &str,
    ) -> Self {
        Self {
            platform,
            provisioner,
            namespace: namespace.to_string(),
            job_timeout: Duration::from_secs(60),
        }
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Remove every volume that backs none of the `live` stores
    pub fn recycle(&self, live: &[Store]) -> Result<Vec<PathBuf>> {
        let removed = self.provisioner.clean(live)?;
        info!(
            provisioner = self.provisioner.name(),
            live = live.len(),
            removed = removed.len(),
            "Recycled storage volumes"
        );
        Ok(removed)
    }

    /// Reclaim buried stores of every cluster and return the names of the
    /// clusters whose status no longer lists them. One failing cluster does
    /// not stop the others.
    pub async fn sweep(&self, clusters: &[DbCluster]) -> Vec<String> {
        let mut swept = Vec::new();
        for cluster in clusters {
            match self.delete_buried_stores(cluster).await {
                Ok(0) => {}
                Ok(_) => swept.push(cluster.name_any()),
                Err(e) => {
                    warn!(cluster = %cluster.name_any(), error = %e, "Failed to delete buried stores")
                }
            }
        }
        swept
    }

    /// Reclaim the buried stores of one cluster and drop them from its status.
    ///
    /// `cluster` must carry the operator's current status; it is written back
    /// whole. Returns the number of stores deleted.
    pub async fn delete_buried_stores(&self, cluster: &DbCluster) -> Result<usize> {
        let name = cluster.name_any();
        let buried: Vec<&Store> = cluster.stores().iter().filter(|s| s.buried).collect();
        if buried.is_empty() {
            return Ok(0);
        }

        for store in &buried {
            self.reclaim_store(&name, store).await?;
        }

        let mut status = cluster.status.clone().unwrap_or_default();
        status.storage.stores.retain(|s| !s.buried);
        self.platform.patch_cluster_status(&name, &status).await?;
        info!(cluster = %name, count = buried.len(), "Deleted buried stores");
        Ok(buried.len())
    }

    /// Reclaim every store of a deleted cluster
    pub async fn reclaim_cluster(&self, cluster: &DbCluster) {
        let name = cluster.name_any();
        for store in cluster.stores() {
            if let Err(e) = self.reclaim_store(&name, store).await {
                warn!(cluster = %name, store = %store.id, error = %e, "Failed to reclaim store");
            }
        }
    }

    async fn reclaim_store(&self, cluster: &str, store: &Store) -> Result<()> {
        match self.provisioner.reclaim(store)? {
            Reclaim::Nothing => {
                debug!(cluster = %cluster, store = %store.id, "No volume to reclaim");
                Ok(())
            }
            Reclaim::Removed(_) => Ok(()),
            Reclaim::Remote { node, root, dir } => {
                let job = cleanup_job(cluster, &self.namespace, &node, &root, &dir);
                let job_name = job.name_any();
                self.platform.delete_job(&job_name).await?;
                create_and_wait_job(
                    self.platform.as_ref(),
                    &job,
                    JOB_POLL_INTERVAL,
                    self.job_timeout,
                )
                .await?;
                info!(cluster = %cluster, store = %store.id, node = %node, job = %job_name, "Started remote cleanup job");
                Ok(())
            }
        }
    }
}

fn cleanup_job_name(dir: &str) -> String {
    let mut name = format!("reclaim-{}", dir);
    name.truncate(MAX_JOB_NAME);
    name.trim_end_matches('-').to_string()
}

/// One-shot job pinned to `node` that removes `{root}/{dir}`
pub fn cleanup_job(cluster: &str, namespace: &str, node: &str, root: &Path, dir: &str) -> Job {
    let labels = provisioner::cleanup_labels(cluster);
    Job {
        metadata: ObjectMeta {
            name: Some(cleanup_job_name(dir)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            ttl_seconds_after_finished: Some(300),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_name: Some(node.to_string()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "reclaim".to_string(),
                        image: Some(CLEANUP_IMAGE.to_string()),
                        command: Some(vec![
                            "rm".to_string(),
                            "-rf".to_string(),
                            format!("{}/{}", CLEANUP_MOUNT, dir),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "root".to_string(),
                            mount_path: CLEANUP_MOUNT.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "root".to_string(),
                        host_path: Some(HostPathVolumeSource {
                            path: root.to_string_lossy().into_owned(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
