//! HTTP client for the upstream product catalog

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use reqwest::{header, Client};
use serde_json::json;
use tracing::{debug, info};

use super::config::UpstreamConfig;
use super::stager::CatalogSource;

const PROGRESS_EVERY_BYTES: usize = 10 * 1024 * 1024;

pub struct CatalogClient {
    client: Client,
    config: UpstreamConfig,
}

impl CatalogClient {
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("pimsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self { client, config })
    }

    /// Active products, oldest first
    fn query() -> serde_json::Value {
        json!({
            "filter": { "status": "active" },
            "sorting": { "createdAt": "ASC" }
        })
    }
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn fetch_all(&self) -> anyhow::Result<Bytes> {
        debug!(url = %self.config.url, "Requesting catalog export");
        let response = self
            .client
            .post(&self.config.url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .header(header::ACCEPT, "application/x-ndjson")
            .json(&Self::query())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            bail!("Upstream responded with {}: {}", status, preview);
        }

        let mut buffer = match response.content_length() {
            Some(len) => BytesMut::with_capacity(len as usize),
            None => BytesMut::new(),
        };
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.try_next().await.context("Catalog download interrupted")? {
            let before = buffer.len();
            buffer.extend_from_slice(&chunk);
            if before / PROGRESS_EVERY_BYTES != buffer.len() / PROGRESS_EVERY_BYTES {
                info!("Downloading catalog: {:.2} MB", buffer.len() as f64 / (1024.0 * 1024.0));
            }
        }

        info!(
            "Downloaded {} bytes ({:.2} MB) from upstream",
            buffer.len(),
            buffer.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(buffer.freeze())
    }
}
