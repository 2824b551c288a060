use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::{FileTransfer, ServiceError};

/// HTTP implementation of [`FileTransfer`] against the orchestration server.
pub struct HttpService {
    base_url: String,
    client: Client,
}

/// Upper bound on a single transfer request, connect to last body byte.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpService {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_TRANSFER_TIMEOUT)
    }

    /// Like [`HttpService::new`], bounding every request by `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build http client with timeouts ({e}), using defaults");
                Client::new()
            });
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is reachable.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/health", self.base_url))
            .send()
            .await
            .map_err(|e| ServiceError::Internal(format!("connection failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ServiceError::Internal(format!(
                "health check failed: {}",
                resp.status()
            )))
        }
    }

    async fn get_bytes(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, ServiceError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            let body = resp
                .bytes()
                .await
                .map_err(|e| ServiceError::Internal(format!("read body: {e}")))?;
            Ok(body.to_vec())
        } else {
            Err(parse_error_with_status(status, resp).await)
        }
    }
}

async fn parse_error_with_status(status: StatusCode, resp: reqwest::Response) -> ServiceError {
    let body = resp.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(body);

    if status == StatusCode::NOT_FOUND {
        ServiceError::NotFound(msg)
    } else if status == StatusCode::BAD_REQUEST {
        ServiceError::InvalidInput(msg)
    } else {
        ServiceError::Internal(msg)
    }
}

#[async_trait]
impl FileTransfer for HttpService {
    async fn download_file(
        &self,
        session_id: &str,
        remote_name: &str,
        local_path: &Path,
    ) -> Result<(), ServiceError> {
        let data = self
            .get_bytes(
                "/api/v1/agents/files/download",
                &[("sessionId", session_id), ("fileName", remote_name)],
            )
            .await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &data).await?;
        debug!(
            "downloaded {remote_name} ({} bytes) to {}",
            data.len(),
            local_path.display()
        );
        Ok(())
    }

    async fn fetch_named_dataset(&self, name: &str) -> Result<Vec<u8>, ServiceError> {
        self.get_bytes("/api/v1/knowledge/evaluations/detail", &[("name", name)])
            .await
    }
}
