//! HTTP client for the gateway API.

use std::time::Duration;

use async_trait::async_trait;
use undertow_core::{SupervisorConfig, TorrentSummary};

use crate::error::SupervisorError;

/// Operations the supervisor needs from a gateway.
///
/// State is synchronized by polling [`GatewayApi::list`]; another state
/// source can be plugged in behind this trait.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Fast liveness probe. Any failure means "not running".
    async fn health(&self) -> bool;

    /// Current torrents with their files.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Unreachable` - Gateway did not answer in time
    /// - `SupervisorError::Status` - Gateway answered with an error status
    /// - `SupervisorError::InvalidResponse` - Body was not a torrent list
    async fn list(&self) -> Result<Vec<TorrentSummary>, SupervisorError>;

    /// Adds a torrent identifier and returns its playlist document.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Unreachable` - Gateway did not answer
    /// - `SupervisorError::Status` - Gateway rejected the identifier
    async fn add(&self, identifier: &str) -> Result<String, SupervisorError>;

    /// Removes a torrent, optionally erasing its cached data.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Unreachable` - Gateway did not answer
    /// - `SupervisorError::Status` - Torrent unknown to the gateway
    async fn remove(&self, info_hash: &str, delete_files: bool) -> Result<(), SupervisorError>;

    /// Asks the gateway to shut down.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::Unreachable` - Gateway did not answer
    async fn exit(&self) -> Result<(), SupervisorError>;
}

/// reqwest-backed [`GatewayApi`] with per-call timeouts.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
    health_timeout: Duration,
    poll_timeout: Duration,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, health_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            health_timeout,
            poll_timeout,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.gateway_url(), config.health_timeout, config.poll_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn unreachable(&self, error: reqwest::Error) -> SupervisorError {
        SupervisorError::Unreachable {
            url: self.base_url.clone(),
            reason: error.to_string(),
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, SupervisorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SupervisorError::Status {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn health(&self) -> bool {
        self.http
            .get(self.url("/torrents"))
            .timeout(self.health_timeout)
            .send()
            .await
            .is_ok()
    }

    async fn list(&self) -> Result<Vec<TorrentSummary>, SupervisorError> {
        let response = self
            .http
            .get(self.url("/torrents"))
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let body = self
            .check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| self.unreachable(e))?;
        serde_json::from_slice(&body).map_err(|e| SupervisorError::InvalidResponse {
            reason: e.to_string(),
        })
    }

    async fn add(&self, identifier: &str) -> Result<String, SupervisorError> {
        tracing::debug!(identifier, "Submitting torrent to gateway");
        let response = self
            .http
            .post(self.url("/torrents"))
            .body(identifier.to_string())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response)
            .await?
            .text()
            .await
            .map_err(|e| self.unreachable(e))
    }

    async fn remove(&self, info_hash: &str, delete_files: bool) -> Result<(), SupervisorError> {
        let response = self
            .http
            .delete(self.url(&format!("/torrents/{info_hash}")))
            .query(&[("deleteFiles", delete_files.to_string())])
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn exit(&self) -> Result<(), SupervisorError> {
        let response = self
            .http
            .get(self.url("/exit"))
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(response).await?;
        Ok(())
    }
}
