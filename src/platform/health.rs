//! HTTP status probes used by the health gate

use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::error::{OperatorError, Result};

/// Answers whether a role's status endpoint is reachable
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// GET `url`; `Ok` when the endpoint answers with a success status
    async fn check(&self, url: &str) -> Result<()>;
}

/// reqwest-backed checker with a short per-request timeout
pub struct HttpHealthChecker {
    client: reqwest::Client,
}

impl HttpHealthChecker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OperatorError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, url: &str) -> Result<()> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(OperatorError::Http(format!(
                "{} answered {}",
                url,
                resp.status()
            )));
        }
        Ok(())
    }
}
