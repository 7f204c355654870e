//! Replica count changes

use kube::ResourceExt;
use tracing::{debug, info};

use super::{manifest, HealthScope, Reconciler};
use crate::conditions::{
    build_condition, role_condition_type, set_condition, CONDITION_DEGRADED, CONDITION_TRUE,
    REASON_SCALE_FAILED, REASON_SCALE_REJECTED,
};
use crate::crd::{DbCluster, Role, RolePhase, MIN_REPLICAS};
use crate::error::{OperatorError, Result};

/// Outcome of validating a scale request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Nothing to change; only recheck pod health
    NoOp,
    Apply,
}

/// Check a request to move a role from `current` to `requested` replicas.
///
/// Growth is bounded to three times the current size and shrinking to a
/// third of it per step.
pub fn validate_scale(current: i32, requested: i32, max: i32) -> Result<ScaleDecision> {
    if requested == current || requested < 1 {
        return Ok(ScaleDecision::NoOp);
    }
    if requested > max {
        return Err(OperatorError::ScaleRejected(format!(
            "{} replicas exceeds the maximum of {}",
            requested, max
        )));
    }
    if requested < MIN_REPLICAS {
        return Err(OperatorError::ScaleRejected(format!(
            "{} replicas is below the minimum of {}",
            requested, MIN_REPLICAS
        )));
    }
    if requested > current.saturating_mul(3) {
        return Err(OperatorError::ScaleRejected(format!(
            "cannot grow from {} to {} replicas in one step",
            current, requested
        )));
    }
    if (current - requested).saturating_mul(3) > current {
        return Err(OperatorError::ScaleRejected(format!(
            "cannot shrink from {} to {} replicas in one step",
            current, requested
        )));
    }
    Ok(ScaleDecision::Apply)
}

impl Reconciler {
    /// Move a started role toward its desired replica count
    pub async fn scale(&self, cluster: &mut DbCluster, role: Role) -> Result<()> {
        let name = cluster.name_any();
        let current = cluster.role_status(role).replicas;
        let requested = cluster.component(role).replicas;
        let message = format!("scale {} -> {}", current, requested);

        match validate_scale(current, requested, self.settings.limits.max_replicas(role)) {
            Ok(ScaleDecision::NoOp) => return self.check_status(cluster, role).await,
            Ok(ScaleDecision::Apply) => {}
            Err(err) => return self.reject_scale(cluster, role, err, &message).await,
        }

        Self::transition(cluster, role, RolePhase::Scaling)?;
        self.write_status(cluster).await?;

        let result = self.apply_scale(cluster, role, requested).await;

        let degraded = role_condition_type(role, CONDITION_DEGRADED);
        let status = cluster.status_mut();
        status.set_scale_error(role, result.is_err());
        match &result {
            Ok(()) => super::clear_degraded(
                &mut status.conditions,
                role,
                &[REASON_SCALE_FAILED, REASON_SCALE_REJECTED],
            ),
            Err(e) => set_condition(
                &mut status.conditions,
                build_condition(&degraded, CONDITION_TRUE, REASON_SCALE_FAILED, &e.to_string()),
            ),
        }
        Self::transition(cluster, role, RolePhase::Started)?;
        let written = self.write_status(cluster).await;
        self.audit(&name, role, "scale", result.as_ref().map(|_| ()), &message)
            .await;
        written?;
        result
    }

    async fn apply_scale(&self, cluster: &mut DbCluster, role: Role, requested: i32) -> Result<()> {
        let workload = manifest::workload_name(&cluster.name_any(), role);
        self.platform.scale_workload(&workload, requested).await?;
        cluster.status_mut().role_mut(role).replicas = requested;
        info!(cluster = %cluster.name_any(), role = %role, replicas = requested, "Scaled workload");
        self.wait_for_ok(cluster, role, HealthScope::Service).await
    }

    /// Record a rejected request without touching the workload. A rejection
    /// that is already recorded is not written again.
    async fn reject_scale(
        &self,
        cluster: &mut DbCluster,
        role: Role,
        err: OperatorError,
        message: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        let reason = err.to_string();
        let degraded = role_condition_type(role, CONDITION_DEGRADED);
        let status = cluster.status_mut();

        let recorded = status.has_scale_error(role)
            && status
                .conditions
                .iter()
                .any(|c| c.r#type == degraded && c.message.as_deref() == Some(reason.as_str()));
        if recorded {
            debug!(cluster = %name, role = %role, "Scale rejection already recorded");
            return Err(err);
        }

        status.set_scale_error(role, true);
        set_condition(
            &mut status.conditions,
            build_condition(&degraded, CONDITION_TRUE, REASON_SCALE_REJECTED, &reason),
        );
        let written = self.write_status(cluster).await;
        self.audit(&name, role, "scale", Err(&err), message).await;
        written?;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_scale() {
        use ScaleDecision::*;
        let cases = [
            // (current, requested, max, expected)
            (3, 3, 10, Some(NoOp)),
            (3, 0, 10, Some(NoOp)),
            (3, -1, 10, Some(NoOp)),
            (3, 5, 10, Some(Apply)),
            (3, 9, 10, Some(Apply)),
            (3, 10, 10, None),
            (3, 11, 10, None),
            (3, 1, 10, None),
            (3, 2, 10, Some(Apply)),
            (6, 4, 10, Some(Apply)),
            (6, 3, 10, None),
            (9, 6, 10, Some(Apply)),
            (9, 5, 10, None),
        ];
        for (current, requested, max, expected) in cases {
            let got = validate_scale(current, requested, max).ok();
            assert_eq!(
                got, expected,
                "current={} requested={} max={}",
                current, requested, max
            );
        }
    }

    #[test]
    fn test_rejections_are_checked_in_order() {
        let err = validate_scale(3, 20, 10).unwrap_err();
        assert!(err.to_string().contains("maximum"));
        let err = validate_scale(2, 1, 10).unwrap_err();
        assert!(err.to_string().contains("minimum"));
        let err = validate_scale(2, 7, 10).unwrap_err();
        assert!(err.to_string().contains("grow"));
        let err = validate_scale(10, 6, 20).unwrap_err();
        assert!(err.to_string().contains("shrink"));
    }
}
