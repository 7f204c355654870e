//! Per-role lifecycle of a DbCluster
//!
//! Roles are brought up in order (coordinator, storage, frontend), each only
//! once its predecessor is started. Started roles are upgraded when the
//! desired version changes and scaled toward the desired replica count.
//! Every install, upgrade and scale is gated on pod health and leaves an
//! audit event behind.

pub mod manifest;
mod scale;
mod upgrade;

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::AuditEvent;
use crate::conditions::{
    build_condition, clear_condition, role_condition_type, set_condition, CONDITION_DEGRADED,
    CONDITION_FALSE, CONDITION_READY, CONDITION_TRUE, REASON_START_FAILED, REASON_STARTED,
};
use crate::config::{OperatorConfig, RoleLimits};
use crate::crd::{
    ClusterCondition, DbCluster, DbClusterStatus, Member, Role, RolePhase, RoleStatus, Store,
    MIN_REPLICAS,
};
use crate::error::{OperatorError, Result};
use crate::gc::Provisioner;
use crate::platform::{is_pod_broken, is_pod_ok, HealthChecker, Platform};
use crate::retry::{attempts_for, poll};

pub use scale::{validate_scale, ScaleDecision};

/// Delays used while waiting on pods
#[derive(Debug, Clone)]
pub struct ReconcileTimings {
    pub poll_interval: Duration,
    pub health_timeout: Duration,
    /// Pause between deleting a pod and gating on its replacement
    pub upgrade_grace: Duration,
}

impl Default for ReconcileTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            health_timeout: Duration::from_secs(300),
            upgrade_grace: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub namespace: String,
    pub registry: String,
    pub limits: RoleLimits,
    pub timings: ReconcileTimings,
}

impl ReconcilerSettings {
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            registry: config.registry.clone(),
            limits: config.limits,
            timings: ReconcileTimings {
                health_timeout: config.health_timeout,
                ..Default::default()
            },
        }
    }
}

/// Which pods a health gate looks at
#[derive(Debug, Clone)]
pub enum HealthScope {
    /// All desired replicas ready and the role's service answering
    Service,
    /// All desired replicas ready, plus a ready pod not in the given set
    /// probed directly
    Replacement(BTreeSet<String>),
}

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    health: Arc<dyn HealthChecker>,
    provisioner: Arc<dyn Provisioner>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn Platform>,
        health: Arc<dyn HealthChecker>,
        provisioner: Arc<dyn Provisioner>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            platform,
            health,
            provisioner,
            settings,
        }
    }

    /// Drive every role of `cluster` one step toward its spec.
    ///
    /// Returns the first role failure after visiting the remaining roles.
    pub async fn reconcile(&self, cluster: &mut DbCluster) -> Result<()> {
        let name = cluster.name_any();
        let mut first_error = None;

        for role in Role::ALL {
            if let Some(predecessor) = role.predecessor() {
                if cluster.role_status(predecessor).phase != Some(RolePhase::Started) {
                    debug!(cluster = %name, role = %role, predecessor = %predecessor, "Waiting for predecessor");
                    break;
                }
            }

            let result = match cluster.role_status(role).phase {
                None | Some(RolePhase::Pending) => self.install(cluster, role).await,
                Some(RolePhase::StartFailed) => {
                    warn!(cluster = %name, role = %role, "Role failed to start, not reconciling further");
                    break;
                }
                Some(phase @ (RolePhase::Upgrading | RolePhase::Scaling)) => {
                    self.resume(cluster, role, phase).await
                }
                Some(RolePhase::Started) => self.converge(cluster, role).await,
            };

            if let Err(e) = result {
                warn!(cluster = %name, role = %role, error = %e, "Role reconciliation failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Upgrade, then scale
    async fn converge(&self, cluster: &mut DbCluster, role: Role) -> Result<()> {
        let status = cluster.role_status(role);
        let desired = cluster.desired_version(role);
        if status.version.as_deref() != Some(desired)
            && status.failed_version.as_deref() != Some(desired)
        {
            self.upgrade(cluster, role).await?;
        }
        self.scale(cluster, role).await
    }

    /// A role left mid-operation by a restart goes back to Started and is
    /// evaluated again.
    async fn resume(&self, cluster: &mut DbCluster, role: Role, phase: RolePhase) -> Result<()> {
        info!(cluster = %cluster.name_any(), role = %role, phase = %phase, "Resuming interrupted operation");
        Self::transition(cluster, role, RolePhase::Started)?;
        self.write_status(cluster).await?;
        self.converge(cluster, role).await
    }

    /// Create the role's service and workload and wait for it to become healthy
    pub async fn install(&self, cluster: &mut DbCluster, role: Role) -> Result<()> {
        let name = cluster.name_any();
        let replicas = cluster.component(role).replicas;
        let version = cluster.desired_version(role).to_string();
        let message = format!("install {} replicas of {}", replicas, version);

        if replicas < MIN_REPLICAS {
            let err = OperatorError::InvalidState(format!(
                "{} needs at least {} replicas, got {}",
                role, MIN_REPLICAS, replicas
            ));
            self.audit(&name, role, "install", Err(&err), &message).await;
            return Err(err);
        }

        Self::transition(cluster, role, RolePhase::Pending)?;
        let rs = cluster.status_mut().role_mut(role);
        rs.replicas = replicas;
        rs.version = Some(version.clone());
        rs.failed_version = None;
        self.write_status(cluster).await?;

        let mut result = self.create_role(cluster, role, &version).await;
        if result.is_ok() {
            result = self.wait_for_ok(cluster, role, HealthScope::Service).await;
        }

        let ready = role_condition_type(role, CONDITION_READY);
        let status = cluster.status_mut();
        let phase = match &result {
            Ok(()) => {
                set_condition(
                    &mut status.conditions,
                    build_condition(
                        &ready,
                        CONDITION_TRUE,
                        REASON_STARTED,
                        &format!("{} replicas ready", replicas),
                    ),
                );
                if role == Role::Frontend {
                    status.outer_addresses =
                        vec![manifest::outer_address(&name, &self.settings.namespace)];
                }
                RolePhase::Started
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    build_condition(&ready, CONDITION_FALSE, REASON_START_FAILED, &e.to_string()),
                );
                RolePhase::StartFailed
            }
        };
        Self::transition(cluster, role, phase)?;

        let written = self.write_status(cluster).await;
        self.audit(&name, role, "install", result.as_ref().map(|_| ()), &message)
            .await;
        written?;
        result
    }

    async fn create_role(&self, cluster: &DbCluster, role: Role, version: &str) -> Result<()> {
        let namespace = &self.settings.namespace;
        let service = manifest::service(cluster, namespace, role);
        tolerate_conflict(self.platform.create_service(&service).await.map(|_| ()))?;

        let volume =
            (role == Role::Storage).then(|| self.provisioner.volume(cluster.component(role)));
        let workload = manifest::workload(
            cluster,
            namespace,
            &self.settings.registry,
            role,
            version,
            volume,
        );
        tolerate_conflict(self.platform.create_workload(&workload).await)?;
        info!(cluster = %cluster.name_any(), role = %role, "Created service and workload");
        Ok(())
    }

    /// Delete the role's workload and service and forget its runtime state
    pub async fn uninstall(&self, cluster: &mut DbCluster, role: Role) -> Result<()> {
        let name = cluster.name_any();
        let workload = manifest::workload_name(&name, role);
        self.platform.delete_workload(&workload).await?;
        self.platform.delete_service(&workload).await?;

        let status = cluster.status_mut();
        *status.role_mut(role) = RoleStatus::default();
        status.set_scale_error(role, false);
        status.migrate_state = None;
        if role == Role::Frontend {
            status.outer_addresses.clear();
        }
        clear_condition(&mut status.conditions, &role_condition_type(role, CONDITION_READY));
        clear_condition(&mut status.conditions, &role_condition_type(role, CONDITION_DEGRADED));
        status.refresh_phase();
        info!(cluster = %name, role = %role, "Uninstalled role");
        Ok(())
    }

    /// Uninstall every role in reverse install order
    pub async fn uninstall_all(&self, cluster: &mut DbCluster) -> Result<()> {
        let mut first_error = None;
        for role in Role::ALL.iter().rev() {
            if let Err(e) = self.uninstall(cluster, *role).await {
                warn!(cluster = %cluster.name_any(), role = %role, error = %e, "Failed to uninstall role");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Poll until the role is healthy, then refresh its members (and stores).
    ///
    /// Failed iterations only delay; running out of time fails with
    /// [`OperatorError::Timeout`].
    pub async fn wait_for_ok(
        &self,
        cluster: &mut DbCluster,
        role: Role,
        scope: HealthScope,
    ) -> Result<()> {
        let name = cluster.name_any();
        let expected = usize::try_from(cluster.role_status(role).replicas).unwrap_or(0);
        let selector = manifest::selector(&name, role);
        let timings = &self.settings.timings;
        let observed: Mutex<Vec<Pod>> = Mutex::new(Vec::new());

        poll(
            timings.poll_interval,
            attempts_for(timings.health_timeout, timings.poll_interval),
            &format!("wait for {} of {}", role, name),
            || async {
                match self.probe(&name, role, expected, &selector, &scope).await {
                    Ok(Some(pods)) => {
                        if let Ok(mut slot) = observed.lock() {
                            *slot = pods;
                        }
                        Ok(true)
                    }
                    Ok(None) => Ok(false),
                    Err(e) => {
                        debug!(cluster = %name, role = %role, error = %e, "Health check failed");
                        Ok(false)
                    }
                }
            },
        )
        .await?;

        let pods = observed
            .into_inner()
            .map_err(|_| OperatorError::InvalidState(format!("pods of {} poisoned", name)))?;
        sync_members(cluster.status_mut(), role, &pods);
        info!(cluster = %name, role = %role, pods = pods.len(), "Role is healthy");
        Ok(())
    }

    /// One health iteration; returns the live pods once healthy
    async fn probe(
        &self,
        cluster: &str,
        role: Role,
        expected: usize,
        selector: &str,
        scope: &HealthScope,
    ) -> Result<Option<Vec<Pod>>> {
        let pods: Vec<Pod> = self
            .platform
            .list_pods(selector)
            .await?
            .into_iter()
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .collect();

        let ready = pods.iter().filter(|p| is_pod_ok(p)).count();
        if ready != expected {
            debug!(cluster = %cluster, role = %role, ready, expected, "Waiting for pods");
            return Ok(None);
        }

        let url = match scope {
            HealthScope::Service => manifest::status_url(cluster, &self.settings.namespace, role),
            HealthScope::Replacement(previous) => {
                let replacement = pods
                    .iter()
                    .filter(|p| is_pod_ok(p) && !previous.contains(&p.name_any()))
                    .find_map(|p| p.status.as_ref().and_then(|s| s.pod_ip.clone()));
                match replacement {
                    Some(ip) => manifest::pod_status_url(&ip, role),
                    None => return Ok(None),
                }
            }
        };

        self.health.check(&url).await?;
        Ok(Some(pods))
    }

    /// Delete pods that will not recover so their controller recreates them
    pub async fn check_status(&self, cluster: &DbCluster, role: Role) -> Result<()> {
        let name = cluster.name_any();
        let pods = self
            .platform
            .list_pods(&manifest::selector(&name, role))
            .await?;
        for pod in pods.iter().filter(|p| is_pod_broken(p)) {
            let pod_name = pod.name_any();
            info!(cluster = %name, role = %role, pod = %pod_name, "Deleting broken pod");
            self.platform.delete_pod(&pod_name).await?;
        }
        Ok(())
    }

    /// Move a role to `to`, refusing transitions the lifecycle does not allow
    fn transition(cluster: &mut DbCluster, role: Role, to: RolePhase) -> Result<()> {
        let status = cluster.status_mut();
        let from = status.role(role).phase;
        if !RolePhase::can_transition(from, to) {
            return Err(OperatorError::InvalidState(format!(
                "{} cannot move from {:?} to {}",
                role, from, to
            )));
        }
        status.role_mut(role).phase = Some(to);
        status.refresh_phase();
        Ok(())
    }

    async fn write_status(&self, cluster: &mut DbCluster) -> Result<()> {
        let name = cluster.name_any();
        let status = cluster.status_mut();
        status.refresh_phase();
        status.last_updated = Some(Utc::now().to_rfc3339());
        self.platform.patch_cluster_status(&name, status).await
    }

    async fn audit(
        &self,
        cluster: &str,
        role: Role,
        action: &'static str,
        result: std::result::Result<(), &OperatorError>,
        message: &str,
    ) {
        let event = AuditEvent::trace(cluster, role, action, result, message);
        if let Err(e) = self.platform.publish_event(&event).await {
            warn!(cluster = %cluster, error = %e, "Failed to publish audit event");
        }
    }
}

fn tolerate_conflict(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

/// Drop the role's Degraded condition if one of `reasons` set it
fn clear_degraded(conditions: &mut Vec<ClusterCondition>, role: Role, reasons: &[&str]) {
    let degraded = role_condition_type(role, CONDITION_DEGRADED);
    conditions.retain(|c| {
        c.r#type != degraded || !c.reason.as_deref().is_some_and(|r| reasons.contains(&r))
    });
}

/// Refresh members from live pods. For storage, new pods become stores and
/// stores whose pod is gone are buried.
pub fn sync_members(status: &mut DbClusterStatus, role: Role, pods: &[Pod]) {
    let rs = status.role_mut(role);
    rs.members = pods.iter().map(|p| Member { name: p.name_any() }).collect();
    if role != Role::Storage {
        return;
    }

    let live: HashSet<String> = pods.iter().map(|p| p.name_any()).collect();
    for store in rs.stores.iter_mut() {
        if !store.buried && !live.contains(&store.id) {
            info!(store = %store.id, "Store lost its pod, burying");
            store.buried = true;
        }
    }
    for pod in pods {
        let id = pod.name_any();
        if !rs.stores.iter().any(|s| s.id == id) {
            rs.stores.push(Store {
                id,
                node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
                buried: false,
            });
        }
    }
}
