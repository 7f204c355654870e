//! Service and ReplicationController manifests for each role

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Probe, ReplicationController, ReplicationControllerSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::crd::{DbCluster, Role};
use crate::gc::StorageVolume;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
const APP_NAME: &str = "dbcluster";

/// Name shared by the role's service and replication controller
pub fn workload_name(cluster: &str, role: Role) -> String {
    format!("{}-{}", cluster, role)
}

pub fn labels(cluster: &str, role: Role) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), APP_NAME.to_string());
    labels.insert(LABEL_INSTANCE.to_string(), cluster.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), role.as_str().to_string());
    labels
}

/// Label selector string matching the role's pods
pub fn selector(cluster: &str, role: Role) -> String {
    labels(cluster, role)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn image(registry: &str, role: Role, version: &str) -> String {
    format!("{}/{}:{}", registry.trim_end_matches('/'), role.image(), version)
}

/// Status endpoint of the role, reached through its service
pub fn status_url(cluster: &str, namespace: &str, role: Role) -> String {
    format!(
        "http://{}.{}.svc:{}{}",
        workload_name(cluster, role),
        namespace,
        role.status_port(),
        role.status_path()
    )
}

/// Status endpoint of a single pod
pub fn pod_status_url(pod_ip: &str, role: Role) -> String {
    format!("http://{}:{}{}", pod_ip, role.status_port(), role.status_path())
}

/// Client endpoint of the SQL frontend
pub fn outer_address(cluster: &str, namespace: &str) -> String {
    format!(
        "{}.{}.svc:{}",
        workload_name(cluster, Role::Frontend),
        namespace,
        Role::Frontend.client_port()
    )
}

fn coordinator_endpoint(cluster: &str, namespace: &str) -> String {
    format!(
        "{}.{}.svc:{}",
        workload_name(cluster, Role::Coordinator),
        namespace,
        Role::Coordinator.client_port()
    )
}

pub fn owner_reference(cluster: &DbCluster) -> OwnerReference {
    OwnerReference {
        api_version: DbCluster::api_version(&()).to_string(),
        kind: DbCluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn service(cluster: &DbCluster, namespace: &str, role: Role) -> Service {
    let name = cluster.name_any();
    let mut ports = vec![ServicePort {
        name: Some("client".to_string()),
        port: role.client_port(),
        ..Default::default()
    }];
    if role.status_port() != role.client_port() {
        ports.push(ServicePort {
            name: Some("status".to_string()),
            port: role.status_port(),
            ..Default::default()
        });
    }

    Service {
        metadata: ObjectMeta {
            name: Some(workload_name(&name, role)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&name, role)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels(&name, role)),
            ports: Some(ports),
            type_: Some(if role == Role::Frontend {
                "NodePort".to_string()
            } else {
                "ClusterIP".to_string()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn args(cluster: &str, namespace: &str, role: Role) -> Vec<String> {
    let coordinator = coordinator_endpoint(cluster, namespace);
    match role {
        Role::Coordinator => vec![
            "--name=$(POD_NAME)".to_string(),
            "--data-dir=/data".to_string(),
            format!("--client-urls=http://0.0.0.0:{}", role.client_port()),
            format!("--advertise-client-urls=http://$(POD_IP):{}", role.client_port()),
            "--peer-urls=http://0.0.0.0:2380".to_string(),
            "--advertise-peer-urls=http://$(POD_IP):2380".to_string(),
            format!("--join=http://{}", coordinator),
        ],
        Role::Storage => vec![
            format!("--addr=0.0.0.0:{}", role.client_port()),
            format!("--advertise-addr=$(POD_IP):{}", role.client_port()),
            format!("--status-addr=0.0.0.0:{}", role.status_port()),
            "--data-dir=/data".to_string(),
            format!("--pd={}", coordinator),
        ],
        Role::Frontend => vec![
            format!("-P={}", role.client_port()),
            format!("--status={}", role.status_port()),
            "--store=tikv".to_string(),
            format!("--path={}", coordinator),
        ],
    }
}

fn resource_requirements(spec: &crate::crd::ResourceRequirements) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();

    if let Some(cpu) = &spec.limits.cpu {
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.limits.memory {
        limits.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if let Some(cpu) = &spec.requests.cpu {
        requests.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.requests.memory {
        requests.insert("memory".to_string(), Quantity(memory.clone()));
    }

    ResourceRequirements {
        limits: (!limits.is_empty()).then_some(limits),
        requests: (!requests.is_empty()).then_some(requests),
        ..Default::default()
    }
}

/// Replication controller running `replicas` pods of `role` at `version`.
///
/// `volume` is the data volume for the storage role.
pub fn workload(
    cluster: &DbCluster,
    namespace: &str,
    registry: &str,
    role: Role,
    version: &str,
    volume: Option<StorageVolume>,
) -> ReplicationController {
    let name = cluster.name_any();
    let component = cluster.component(role);
    let (volumes, mounts) = match volume {
        Some(v) => (Some(vec![v.volume]), Some(vec![v.mount])),
        None => (None, None),
    };

    let mut ports = vec![ContainerPort {
        name: Some("client".to_string()),
        container_port: role.client_port(),
        ..Default::default()
    }];
    if role.status_port() != role.client_port() {
        ports.push(ContainerPort {
            name: Some("status".to_string()),
            container_port: role.status_port(),
            ..Default::default()
        });
    }

    let container = Container {
        name: role.as_str().to_string(),
        image: Some(image(registry, role, version)),
        args: Some(args(&name, namespace, role)),
        ports: Some(ports),
        env: Some(vec![
            field_env("POD_NAME", "metadata.name"),
            field_env("POD_NAMESPACE", "metadata.namespace"),
            field_env("POD_IP", "status.podIP"),
        ]),
        resources: Some(resource_requirements(&component.resources)),
        volume_mounts: mounts,
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(role.status_path().to_string()),
                port: IntOrString::Int(role.status_port()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(3),
            ..Default::default()
        }),
        ..Default::default()
    };

    ReplicationController {
        metadata: ObjectMeta {
            name: Some(workload_name(&name, role)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&name, role)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ReplicationControllerSpec {
            replicas: Some(component.replicas),
            selector: Some(labels(&name, role)),
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(&name, role)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    termination_grace_period_seconds: Some(5),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{NoopProvisioner, Provisioner};

    fn cluster() -> DbCluster {
        let mut c = DbCluster::new("c1", serde_json::from_str("{}").unwrap());
        c.metadata.uid = Some("uid-1".to_string());
        c.spec.storage.replicas = 5;
        c
    }

    #[test]
    fn test_names_and_urls() {
        assert_eq!(workload_name("c1", Role::Storage), "c1-storage");
        assert_eq!(
            selector("c1", Role::Frontend),
            "app.kubernetes.io/component=frontend,app.kubernetes.io/instance=c1,app.kubernetes.io/name=dbcluster"
        );
        assert_eq!(image("reg.local/", Role::Storage, "v2"), "reg.local/tikv:v2");
        assert_eq!(
            status_url("c1", "db", Role::Coordinator),
            "http://c1-coordinator.db.svc:2379/pd/api/v1/health"
        );
        assert_eq!(
            pod_status_url("10.0.0.7", Role::Frontend),
            "http://10.0.0.7:10080/status"
        );
        assert_eq!(outer_address("c1", "db"), "c1-frontend.db.svc:4000");
    }

    #[test]
    fn test_service_ports() {
        let svc = service(&cluster(), "db", Role::Coordinator);
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 1);

        let svc = service(&cluster(), "db", Role::Frontend);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap().len(), 2);
    }

    #[test]
    fn test_storage_workload() {
        let c = cluster();
        let volume = NoopProvisioner.volume(c.component(Role::Storage));
        let rc = workload(&c, "db", "reg.local", Role::Storage, "v1.0.8", Some(volume));

        assert_eq!(rc.metadata.name.as_deref(), Some("c1-storage"));
        let owner = &rc.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.kind, "DbCluster");

        let spec = rc.spec.unwrap();
        assert_eq!(spec.replicas, Some(5));
        assert_eq!(spec.selector, Some(labels("c1", Role::Storage)));
        let pod = spec.template.unwrap().spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.name, "storage");
        assert_eq!(container.image.as_deref(), Some("reg.local/tikv:v1.0.8"));
        assert_eq!(pod.volumes.unwrap()[0].name, "data");
        assert!(container
            .args
            .as_ref()
            .unwrap()
            .contains(&"--pd=c1-coordinator.db.svc:2379".to_string()));
    }
}
