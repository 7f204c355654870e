//! One-shot Job helpers

use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use tracing::info;

use super::Platform;
use crate::error::{OperatorError, Result};
use crate::retry::{attempts_for, poll};

/// Interval between job status polls
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Create a job and wait until it is running (or already finished).
///
/// Polls once per `interval` until `timeout` elapses. The job is returned in
/// its last observed state.
pub async fn create_and_wait_job(
    platform: &dyn Platform,
    job: &Job,
    interval: Duration,
    timeout: Duration,
) -> Result<Job> {
    let created = platform.create_job(job).await?;
    let name = created
        .metadata
        .name
        .clone()
        .ok_or_else(|| OperatorError::InvalidState("created job has no name".to_string()))?;

    let last = Mutex::new(created);
    poll(
        interval,
        attempts_for(timeout, interval),
        &format!("start job {}", name),
        || async {
            let current = platform.get_job(&name).await?;
            let started = current
                .status
                .as_ref()
                .is_some_and(|s| s.active.unwrap_or(0) > 0 || s.succeeded.unwrap_or(0) > 0);
            if let Ok(mut slot) = last.lock() {
                *slot = current;
            }
            Ok(started)
        },
    )
    .await?;

    info!(job = %name, "Job started");
    last.into_inner()
        .map_err(|_| OperatorError::InvalidState(format!("job {} state poisoned", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn job(name: &str, active: Option<i32>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: active.map(|a| JobStatus {
                active: Some(a),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_waits_until_job_active() {
        let mut platform = MockPlatform::new();
        platform
            .expect_create_job()
            .times(1)
            .returning(|j| Ok(j.clone()));
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();
        platform.expect_get_job().returning(move |name| {
            let n = p.fetch_add(1, Ordering::SeqCst);
            Ok(job(name, if n < 2 { None } else { Some(1) }))
        });

        let result = create_and_wait_job(
            &platform,
            &job("reclaim-c1", None),
            Duration::from_millis(1),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status.and_then(|s| s.active), Some(1));
    }

    #[tokio::test]
    async fn test_times_out_when_job_never_starts() {
        let mut platform = MockPlatform::new();
        platform.expect_create_job().returning(|j| Ok(j.clone()));
        platform
            .expect_get_job()
            .times(5)
            .returning(|name| Ok(job(name, Some(0))));

        let result = create_and_wait_job(
            &platform,
            &job("reclaim-c1", None),
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;

        assert!(matches!(result, Err(OperatorError::Timeout { .. })));
    }
}
