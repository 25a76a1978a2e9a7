//! HTTP API client for a pimsync server
//!
//! Every administrative call carries the admin key in the `x-admin-key`
//! header. Error bodies are reduced to their message.

use pimsync_common::types::{
    LoadRequest, LoadResponse, StageResponse, StatusResponse, SyncRequest, SyncTriggerResponse,
    ADMIN_KEY_HEADER,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::{CliError, Result};
use crate::ResetTarget;

/// Default timeout for API requests in seconds.
/// Can be overridden via PIMSYNC_API_TIMEOUT_SECS environment variable.
/// Stager and loader runs answer only when the work is done.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 1800;

/// Default server URL when not specified via flag or environment variable.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// API client for a pimsync server
pub struct ApiClient {
    client: Client,
    base_url: String,
    admin_key: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, admin_key: Option<String>) -> Result<Self> {
        let timeout_secs = std::env::var("PIMSYNC_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_key: admin_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check server liveness; connection failures count as down
    pub async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.url("/healthz")).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.send(self.client.get(self.url("/orchestrator/status"))).await
    }

    /// Start a sync; a running sync comes back as [`CliError::Busy`]
    pub async fn trigger_sync(&self, request: &SyncRequest) -> Result<SyncTriggerResponse> {
        self.send(self.client.post(self.url("/orchestrator/sync")).json(request))
            .await
    }

    pub async fn stage(&self) -> Result<StageResponse> {
        self.send(self.client.post(self.url("/stager/run"))).await
    }

    pub async fn load(&self, request: &LoadRequest) -> Result<LoadResponse> {
        self.send(self.client.post(self.url("/loader/run")).json(request))
            .await
    }

    /// Reset a service; the response shape differs per service
    pub async fn reset(&self, target: ResetTarget) -> Result<Value> {
        self.send(self.client.post(self.url(target.path()))).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = match &self.admin_key {
            Some(key) => request.header(ADMIN_KEY_HEADER, key),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }

        let message = error_message(&body)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string());

        tracing::debug!(status = status.as_u16(), %message, "Request failed");

        Err(match status {
            StatusCode::UNAUTHORIZED => CliError::Unauthorized,
            StatusCode::CONFLICT => CliError::Busy(message),
            _ => CliError::api(status.as_u16(), message),
        })
    }
}

/// Message of an `{error: {message}}` or `{message}` body
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
