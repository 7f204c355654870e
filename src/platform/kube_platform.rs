//! Kubernetes-backed implementation of [`Platform`]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Event, EventSource, ObjectReference, Pod, ReplicationController, Service,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, WatchParams};
use kube::{Client, CustomResourceExt, Resource};
use tracing::{debug, info};

use super::{ClusterList, ClusterWatchStream, Platform};
use crate::controllers::AuditEvent;
use crate::crd::{DbCluster, DbClusterStatus};
use crate::error::{OperatorError, Result};

const FIELD_MANAGER: &str = "dbcluster-operator";
const CRD_NAME: &str = "dbclusters.dbcluster.io";

/// Real Kubernetes client implementation, scoped to one namespace
pub struct KubePlatform {
    client: Client,
    namespace: String,
}

impl KubePlatform {
    /// Create a new KubePlatform wrapping the given kube Client
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Treat 404 as success for idempotent deletes
fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = OperatorError::from(e);
            if err.is_not_found() {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Platform for KubePlatform {
    async fn ensure_cluster_crd(&self) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        info!("Installing {} CRD...", CRD_NAME);
        crds.patch(
            CRD_NAME,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&DbCluster::crd()),
        )
        .await?;
        Ok(())
    }

    async fn list_clusters(&self) -> Result<ClusterList> {
        let clusters: Api<DbCluster> = self.api();
        let list = clusters.list(&ListParams::default()).await?;
        Ok(ClusterList {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch_clusters(&self, resource_version: &str) -> Result<ClusterWatchStream> {
        let clusters: Api<DbCluster> = self.api();
        let stream = clusters
            .watch(&WatchParams::default(), resource_version)
            .await?;
        Ok(stream.map(|item| item.map_err(OperatorError::from)).boxed())
    }

    async fn patch_cluster_status(&self, name: &str, status: &DbClusterStatus) -> Result<()> {
        let clusters: Api<DbCluster> = self.api();
        let patch = serde_json::json!({ "status": status });
        clusters
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let services: Api<Service> = self.api();
        Ok(services.create(&PostParams::default(), service).await?)
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let services: Api<Service> = self.api();
        ignore_not_found(services.delete(name, &DeleteParams::default()).await)
    }

    async fn create_workload(&self, workload: &ReplicationController) -> Result<()> {
        let rcs: Api<ReplicationController> = self.api();
        rcs.create(&PostParams::default(), workload).await?;
        Ok(())
    }

    async fn delete_workload(&self, name: &str) -> Result<()> {
        let rcs: Api<ReplicationController> = self.api();
        ignore_not_found(rcs.delete(name, &DeleteParams::foreground()).await)
    }

    async fn scale_workload(&self, name: &str, replicas: i32) -> Result<()> {
        let rcs: Api<ReplicationController> = self.api();
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        rcs.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_workload_image(&self, name: &str, container: &str, image: &str) -> Result<()> {
        let rcs: Api<ReplicationController> = self.api();
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{ "name": container, "image": image }]
                    }
                }
            }
        });
        rcs.patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = self.api();
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let pods: Api<Pod> = self.api();
        debug!(pod = %name, "Deleting pod");
        ignore_not_found(pods.delete(name, &DeleteParams::default()).await)
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let jobs: Api<Job> = self.api();
        Ok(jobs.create(&PostParams::default(), job).await?)
    }

    async fn get_job(&self, name: &str) -> Result<Job> {
        let jobs: Api<Job> = self.api();
        Ok(jobs.get(name).await?)
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let jobs: Api<Job> = self.api();
        ignore_not_found(jobs.delete(name, &DeleteParams::background()).await)
    }

    async fn publish_event(&self, audit: &AuditEvent) -> Result<()> {
        let events: Api<Event> = self.api();
        let at = Time(audit.timestamp);
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", audit.cluster)),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(DbCluster::api_version(&()).to_string()),
                kind: Some(DbCluster::kind(&()).to_string()),
                name: Some(audit.cluster.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            reason: Some(audit.reason()),
            message: Some(audit.message.clone()),
            type_: Some(audit.event_type().to_string()),
            first_timestamp: Some(at.clone()),
            last_timestamp: Some(at),
            count: Some(1),
            source: Some(EventSource {
                component: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}
