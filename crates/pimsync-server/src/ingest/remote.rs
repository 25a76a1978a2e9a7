//! HTTP client for the stager and loader services

use async_trait::async_trait;
use pimsync_common::types::{LoadRequest, LoadResponse, StageResponse, ADMIN_KEY_HEADER};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

use super::config::OrchestratorConfig;
use super::orchestrator::{RemoteError, SyncServices};

pub struct HttpSyncServices {
    client: Client,
    stager_url: String,
    loader_url: String,
    admin_key: String,
    fetch_timeout: Duration,
    chunk_timeout: Duration,
}

impl HttpSyncServices {
    pub fn new(config: &OrchestratorConfig, admin_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pimsync-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            stager_url: config.stager_url.trim_end_matches('/').to_string(),
            loader_url: config.loader_url.trim_end_matches('/').to_string(),
            admin_key: admin_key.into(),
            fetch_timeout: config.fetch_timeout(),
            chunk_timeout: config.chunk_timeout(),
        })
    }

    async fn post<B, T>(&self, url: &str, body: &B, timeout: Duration) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!(url, ?timeout, "Calling service");
        let response = self
            .client
            .post(url)
            .header(ADMIN_KEY_HEADER, &self.admin_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| RemoteError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::CONFLICT => RemoteError::Conflict(body),
            StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
            _ => RemoteError::Status { status: status.as_u16(), body },
        })
    }
}

#[async_trait]
impl SyncServices for HttpSyncServices {
    async fn stage(&self) -> Result<StageResponse, RemoteError> {
        let url = format!("{}/run", self.stager_url);
        self.post(&url, &serde_json::json!({}), self.fetch_timeout).await
    }

    async fn load(&self, offset: u64, limit: u64) -> Result<LoadResponse, RemoteError> {
        let url = format!("{}/run", self.loader_url);
        let request = LoadRequest { offset: Some(offset), limit: Some(limit) };
        self.post(&url, &request, self.chunk_timeout).await
    }
}
