//! Local record of an in-flight multipart transfer
//!
//! Written after every acknowledged chunk and removed once the transfer
//! completes, so a restarted stager can pick the session back up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    /// Destination location, e.g. `s3://bucket/key`
    pub upload_url: String,
    pub upload_id: String,
    pub object_key: String,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// Hex SHA-256 of the whole payload; files written without it never match
    #[serde(default)]
    pub sha256: String,
    pub timestamp: DateTime<Utc>,
}

impl UploadState {
    /// Whether this state describes a transfer of the same payload.
    ///
    /// Size alone is not enough: a catalog that changed in place keeps its
    /// length, and resuming it would splice old parts onto new ones.
    pub fn matches(&self, object_key: &str, bytes_total: u64, sha256: &str) -> bool {
        self.object_key == object_key
            && self.bytes_total == bytes_total
            && !self.sha256.is_empty()
            && self.sha256 == sha256
    }
}

#[derive(Debug, Clone)]
pub struct UploadStateFile {
    path: PathBuf,
}

impl UploadStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. A missing or unreadable file is treated as no
    /// state; the transfer then starts over.
    pub async fn load(&self) -> Option<UploadState> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read upload state");
                return None;
            }
        };

        match serde_json::from_slice(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt upload state");
                None
            }
        }
    }

    pub async fn save(&self, state: &UploadState) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(state)?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(bytes_uploaded = state.bytes_uploaded, "Saved upload state");
        Ok(())
    }

    pub async fn clear(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
