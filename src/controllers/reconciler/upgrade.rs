//! Rolling image upgrade, one pod at a time

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::info;

use super::{manifest, HealthScope, Reconciler};
use crate::conditions::{
    build_condition, role_condition_type, set_condition, CONDITION_DEGRADED, CONDITION_TRUE,
    REASON_UPGRADE_FAILED,
};
use crate::crd::{DbCluster, Role, RolePhase};
use crate::error::Result;
use crate::platform::pod_image;

impl Reconciler {
    /// Roll a started role onto its desired version.
    ///
    /// A failed rollout is not rolled back; the version is recorded as failed
    /// and not retried until the desired version changes.
    pub async fn upgrade(&self, cluster: &mut DbCluster, role: Role) -> Result<()> {
        let name = cluster.name_any();
        let version = cluster.desired_version(role).to_string();
        let from = cluster.role_status(role).version.unwrap_or_default();
        let message = format!("upgrade {} -> {}", from, version);
        let image = manifest::image(&self.settings.registry, role, &version);

        Self::transition(cluster, role, RolePhase::Upgrading)?;
        self.write_status(cluster).await?;

        let result = self.roll_pods(cluster, role, &image).await;

        let status = cluster.status_mut();
        match &result {
            Ok(()) => {
                let rs = status.role_mut(role);
                rs.version = Some(version.clone());
                rs.failed_version = None;
                super::clear_degraded(&mut status.conditions, role, &[REASON_UPGRADE_FAILED]);
            }
            Err(e) => {
                status.role_mut(role).failed_version = Some(version.clone());
                set_condition(
                    &mut status.conditions,
                    build_condition(
                        &role_condition_type(role, CONDITION_DEGRADED),
                        CONDITION_TRUE,
                        REASON_UPGRADE_FAILED,
                        &format!("{}: {}", version, e),
                    ),
                );
            }
        }
        Self::transition(cluster, role, RolePhase::Started)?;
        let written = self.write_status(cluster).await;
        self.audit(&name, role, "upgrade", result.as_ref().map(|_| ()), &message)
            .await;
        written?;
        result
    }

    /// Re-image the workload, then replace outdated pods in list order, each
    /// followed by a health gate on its replacement.
    async fn roll_pods(&self, cluster: &mut DbCluster, role: Role, image: &str) -> Result<()> {
        let name = cluster.name_any();
        let workload = manifest::workload_name(&name, role);
        self.platform
            .set_workload_image(&workload, role.as_str(), image)
            .await?;

        let pods = self
            .platform
            .list_pods(&manifest::selector(&name, role))
            .await?;
        let mut known: BTreeSet<String> = pods.iter().map(|p| p.name_any()).collect();
        let outdated: Vec<String> = pods
            .iter()
            .filter(|p| pod_image(p) != Some(image))
            .map(|p| p.name_any())
            .collect();

        for (i, pod) in outdated.iter().enumerate() {
            info!(cluster = %name, role = %role, pod = %pod, progress = %format!("{}/{}", i + 1, outdated.len()), "Replacing pod");
            self.platform.delete_pod(pod).await?;
            tokio::time::sleep(self.settings.timings.upgrade_grace).await;
            self.wait_for_ok(cluster, role, HealthScope::Replacement(known.clone()))
                .await?;
            known.extend(
                cluster
                    .role_status(role)
                    .members
                    .into_iter()
                    .map(|m| m.name),
            );
        }
        Ok(())
    }
}
