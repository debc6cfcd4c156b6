pub mod mapper;
pub mod types;

use crate::config::DownloaderConfig;
use crate::error::{TaskError, TaskResult};
use crate::registry::task::{Projection, RemoteProgress, Task, TaskId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use types::*;

/// The engine that actually fetches tiles.
///
/// Every call is a request to a remote process; transient failures come
/// back as [`TaskError::Unreachable`].
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Begin fetching tiles for the task's region, level and kind
    async fn start_download(&self, task: &Task, projection: Projection) -> TaskResult<()>;

    async fn query_progress(&self, id: &TaskId) -> TaskResult<RemoteProgress>;

    /// Pause, keeping partial state
    async fn cancel_download(&self, id: &TaskId) -> TaskResult<()>;

    /// Continue from partial state
    async fn resume_download(&self, id: &TaskId) -> TaskResult<()>;

    /// Discard partial state and progress bookkeeping
    async fn release_download(&self, id: &TaskId) -> TaskResult<()>;
}

/// JSON-over-HTTP client for the tile download backend
pub struct HttpDownloader {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TaskResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TaskError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &DownloaderConfig) -> TaskResult<Self> {
        Self::new(config.base_url.clone(), config.timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/tianditu/download/{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> TaskResult<Option<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| TaskError::Unreachable(format!("Failed to connect: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TaskError::Unreachable(format!("Backend returned {}", status)));
        }
        if !status.is_success() {
            return Err(TaskError::Rejected(format!("Backend returned {}", status)));
        }

        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            if e.is_decode() {
                TaskError::Rejected(format!("Malformed response: {}", e))
            } else {
                TaskError::Unreachable(format!("Failed to read response: {}", e))
            }
        })?;

        match envelope.status {
            ApiStatus::Success => Ok(envelope.data),
            ApiStatus::Failed => Err(TaskError::Rejected(envelope.message)),
        }
    }

    async fn acknowledge(&self, request: reqwest::RequestBuilder) -> TaskResult<()> {
        self.call::<serde_json::Value>(request).await?;
        Ok(())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn start_download(&self, task: &Task, projection: Projection) -> TaskResult<()> {
        let body = mapper::to_start_request(task, projection);
        self.acknowledge(self.http_client.post(self.url("tiles")).json(&body))
            .await
    }

    async fn query_progress(&self, id: &TaskId) -> TaskResult<RemoteProgress> {
        let data: Option<ProgressData> = self
            .call(self.http_client.get(self.url(&format!("progress/{}", id))))
            .await?;

        data.map(mapper::map_progress)
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    async fn cancel_download(&self, id: &TaskId) -> TaskResult<()> {
        self.acknowledge(self.http_client.get(self.url(&format!("cancel/{}", id))))
            .await
    }

    async fn resume_download(&self, id: &TaskId) -> TaskResult<()> {
        self.acknowledge(self.http_client.get(self.url(&format!("resume/{}", id))))
            .await
    }

    async fn release_download(&self, id: &TaskId) -> TaskResult<()> {
        self.acknowledge(self.http_client.delete(self.url(&format!("progress/{}", id))))
            .await
    }
}
