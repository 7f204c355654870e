//! Fixed-interval retry utilities.
//!
//! Two shapes are used across the operator:
//!
//! - [`poll`]: bounded polling of a condition (health gates, job start).
//!   The condition returns `Ok(false)` to keep waiting and `Err` to abort.
//! - [`retry_with_config`]: re-run a fallible operation until it succeeds,
//!   up to `max_attempts` (0 = infinite). Used for operator startup.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{OperatorError, Result};

/// Configuration for operations retried at a fixed interval.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            interval: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Number of polls that fit into `timeout` at `interval`, at least one.
pub fn attempts_for(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let n = timeout.as_millis() / interval.as_millis().max(1);
    n.clamp(1, u32::MAX as u128) as u32
}

/// Poll `condition` every `interval`, at most `max_attempts` times.
///
/// Returns `Ok(())` on the first `Ok(true)`, propagates the first `Err`,
/// and fails with [`OperatorError::Timeout`] when attempts run out.
pub async fn poll<F, Fut>(
    interval: Duration,
    max_attempts: u32,
    operation: &str,
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=max_attempts {
        if condition().await? {
            return Ok(());
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(OperatorError::Timeout {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}

/// Execute an async operation at a fixed interval until it succeeds.
///
/// Retries indefinitely (or up to `max_attempts` if set) and returns the
/// last error once attempts are exhausted.
pub async fn retry_with_config<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = config.interval.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(config.interval).await;
            }
        }
    }
}
