//! Ingestion configuration
//!
//! Tunables of the stager and loader ([`IngestConfig`]) and of the
//! orchestrator's chunk loop ([`OrchestratorConfig`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::env_parse;

pub const DEFAULT_OBJECT_KEY: &str = "latest.ndjson";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_LOAD_LIMIT: u64 = 10_000;
/// 6 MiB, the part size of the resumable transfer
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 6 * 1024 * 1024;
/// S3 rejects non-final parts below 5 MiB
pub const MIN_UPLOAD_CHUNK_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_UPLOAD_STATE_FILE: &str = ".upload-state.json";
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.au.medipim.com/v4/products";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_STAGER_URL: &str = "http://localhost:3000/stager";
pub const DEFAULT_LOADER_URL: &str = "http://localhost:3000/loader";
pub const DEFAULT_CHUNK_SIZE: u64 = 20_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 1_000;
/// 30 minutes
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 600;

/// Stager and loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Object key of the staged NDJSON blob
    pub object_key: String,
    /// Records per upsert batch
    pub batch_size: usize,
    /// Records per loader call when the request names no limit
    pub default_limit: u64,
    pub upload_chunk_bytes: usize,
    /// Where the stager keeps its resume state while a transfer is in flight
    pub upload_state_file: PathBuf,
    pub upstream: UpstreamConfig,
}

/// Upstream catalog API
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub key_id: String,
    pub key_secret: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("key_id", &self.key_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            object_key: std::env::var("PIMSYNC_OBJECT_KEY")
                .unwrap_or_else(|_| DEFAULT_OBJECT_KEY.to_string()),
            batch_size: env_parse("PIMSYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            default_limit: env_parse("PIMSYNC_DEFAULT_LIMIT", DEFAULT_LOAD_LIMIT),
            upload_chunk_bytes: env_parse("PIMSYNC_UPLOAD_CHUNK_BYTES", DEFAULT_UPLOAD_CHUNK_BYTES),
            upload_state_file: std::env::var("PIMSYNC_UPLOAD_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOAD_STATE_FILE)),
            upstream: UpstreamConfig {
                url: std::env::var("MEDIPIM_API_URL")
                    .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
                key_id: std::env::var("MEDIPIM_API_KEY_ID").unwrap_or_default(),
                key_secret: std::env::var("MEDIPIM_API_KEY_SECRET").unwrap_or_default(),
                timeout_secs: env_parse("MEDIPIM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS),
            },
        }
    }

    /// Validate. Upstream credentials only matter when the stager runs here.
    pub fn validate(&self, stager_enabled: bool) -> anyhow::Result<()> {
        if self.object_key.trim().is_empty() {
            anyhow::bail!("PIMSYNC_OBJECT_KEY cannot be empty");
        }
        if self.batch_size == 0 {
            anyhow::bail!("PIMSYNC_BATCH_SIZE must be greater than 0");
        }
        if self.default_limit == 0 {
            anyhow::bail!("PIMSYNC_DEFAULT_LIMIT must be greater than 0");
        }
        if self.upload_chunk_bytes < MIN_UPLOAD_CHUNK_BYTES {
            anyhow::bail!(
                "PIMSYNC_UPLOAD_CHUNK_BYTES must be at least {} bytes, got {}",
                MIN_UPLOAD_CHUNK_BYTES,
                self.upload_chunk_bytes
            );
        }
        if stager_enabled {
            if self.upstream.key_id.is_empty() || self.upstream.key_secret.is_empty() {
                anyhow::bail!("MEDIPIM_API_KEY_ID and MEDIPIM_API_KEY_SECRET must be set");
            }
            if self.upstream.timeout_secs == 0 {
                anyhow::bail!("MEDIPIM_TIMEOUT_SECS must be greater than 0");
            }
        }
        Ok(())
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            object_key: DEFAULT_OBJECT_KEY.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            default_limit: DEFAULT_LOAD_LIMIT,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
            upload_state_file: PathBuf::from(DEFAULT_UPLOAD_STATE_FILE),
            upstream: UpstreamConfig {
                url: DEFAULT_UPSTREAM_URL.to_string(),
                key_id: String::new(),
                key_secret: String::new(),
                timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            },
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base URL of the stager service (its `/run` is appended)
    pub stager_url: String,
    /// Base URL of the loader service
    pub loader_url: String,
    /// Records per loader call
    pub chunk_size: u64,
    /// Retries of one chunk after the first attempt fails
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub chunk_pause_ms: u64,
    pub fetch_timeout_ms: u64,
    pub chunk_timeout_secs: u64,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            stager_url: std::env::var("STAGER_URL")
                .or_else(|_| std::env::var("FETCHER_URL"))
                .unwrap_or_else(|_| DEFAULT_STAGER_URL.to_string()),
            loader_url: std::env::var("LOADER_URL")
                .or_else(|_| std::env::var("MAINTAINER_URL"))
                .unwrap_or_else(|_| DEFAULT_LOADER_URL.to_string()),
            chunk_size: env_parse("PIMSYNC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            max_retries: env_parse("PIMSYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_delay_secs: env_parse("PIMSYNC_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS),
            chunk_pause_ms: env_parse("PIMSYNC_CHUNK_PAUSE_MS", DEFAULT_CHUNK_PAUSE_MS),
            fetch_timeout_ms: env_parse("REQUEST_TIMEOUT", DEFAULT_FETCH_TIMEOUT_MS),
            chunk_timeout_secs: env_parse("PIMSYNC_CHUNK_TIMEOUT_SECS", DEFAULT_CHUNK_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stager_url.is_empty() || self.loader_url.is_empty() {
            anyhow::bail!("STAGER_URL and LOADER_URL must be set");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("PIMSYNC_CHUNK_SIZE must be greater than 0");
        }
        if self.fetch_timeout_ms == 0 || self.chunk_timeout_secs == 0 {
            anyhow::bail!("Request timeouts must be greater than 0");
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stager_url: DEFAULT_STAGER_URL.to_string(),
            loader_url: DEFAULT_LOADER_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            chunk_pause_ms: DEFAULT_CHUNK_PAUSE_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            chunk_timeout_secs: DEFAULT_CHUNK_TIMEOUT_SECS,
        }
    }
}
