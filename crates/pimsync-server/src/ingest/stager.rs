//! Extraction stage: upstream catalog to blob store
//!
//! The whole catalog is fetched into memory, hashed, then written to the
//! destination as a multipart transfer. Progress is recorded in an
//! [`UploadState`] file after every acknowledged chunk; a later run with the
//! same payload size asks the destination which chunks it already holds and
//! continues after them.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use pimsync_common::types::StageResponse;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::config::IngestConfig;
use super::guard::RunGuard;
use super::retry::RetryPolicy;
use super::upload_state::{UploadState, UploadStateFile};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One chunk the destination has acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedChunk {
    /// 1-based
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("transient transfer failure: {0}")]
    Transient(String),

    #[error("permanent transfer failure: {0}")]
    Permanent(String),
}

impl TransferError {
    /// Unauthorized, forbidden and not-found responses are permanent;
    /// everything else, including no response at all, is worth retrying.
    pub fn from_status(status: Option<u16>, message: String) -> Self {
        match status {
            Some(401 | 403 | 404) => TransferError::Permanent(message),
            _ => TransferError::Transient(message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}

/// Destination of a resumable chunked transfer
#[async_trait]
pub trait TransferTarget: Send + Sync {
    /// Human-readable location of `key`, recorded in the upload state
    fn location(&self, key: &str) -> String;

    /// Open a new session and return its id
    async fn begin(&self, key: &str) -> Result<String, TransferError>;

    /// Chunks the destination holds for a session, or `None` if the session
    /// no longer exists
    async fn acknowledged(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<Vec<CompletedChunk>>, TransferError>;

    async fn put_chunk(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedChunk, TransferError>;

    async fn finish(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedChunk],
    ) -> Result<(), TransferError>;
}

/// Where the catalog comes from
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// The complete dataset as NDJSON bytes
    async fn fetch_all(&self) -> anyhow::Result<Bytes>;
}

#[async_trait]
impl<T: CatalogSource + ?Sized> CatalogSource for Arc<T> {
    async fn fetch_all(&self) -> anyhow::Result<Bytes> {
        (**self).fetch_all().await
    }
}

#[async_trait]
impl<T: TransferTarget + ?Sized> TransferTarget for Arc<T> {
    fn location(&self, key: &str) -> String {
        (**self).location(key)
    }

    async fn begin(&self, key: &str) -> Result<String, TransferError> {
        (**self).begin(key).await
    }

    async fn acknowledged(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<Vec<CompletedChunk>>, TransferError> {
        (**self).acknowledged(key, upload_id).await
    }

    async fn put_chunk(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedChunk, TransferError> {
        (**self).put_chunk(key, upload_id, part_number, data).await
    }

    async fn finish(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedChunk],
    ) -> Result<(), TransferError> {
        (**self).finish(key, upload_id, parts).await
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Upload already in progress")]
    Conflict,

    #[error("Failed to fetch catalog: {0:#}")]
    Source(anyhow::Error),

    #[error("Upstream returned an empty dataset")]
    Empty,

    #[error("Transfer failed after {attempts} attempt(s): {source}")]
    Transfer {
        #[source]
        source: TransferError,
        attempts: u32,
    },
}

pub struct Stager<S, T> {
    source: S,
    target: T,
    state: UploadStateFile,
    object_key: String,
    chunk_bytes: usize,
    retry: RetryPolicy,
    guard: RunGuard,
}

/// An open transfer session and the chunks already in place
struct Session {
    upload_id: String,
    parts: Vec<CompletedChunk>,
    resumed: bool,
}

impl<S: CatalogSource, T: TransferTarget> Stager<S, T> {
    pub fn new(source: S, target: T, config: &IngestConfig) -> Self {
        Self {
            source,
            target,
            state: UploadStateFile::new(&config.upload_state_file),
            object_key: config.object_key.clone(),
            chunk_bytes: config.upload_chunk_bytes.max(1),
            retry: RetryPolicy::upload(),
            guard: RunGuard::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_busy()
    }

    /// Fetch the catalog and write it to the destination.
    ///
    /// Fails with [`StageError::Conflict`] if a stage is already running in
    /// this process.
    #[instrument(skip(self), fields(object_key = %self.object_key))]
    pub async fn stage(&self) -> Result<StageResponse, StageError> {
        let _permit = self.guard.try_acquire().ok_or(StageError::Conflict)?;

        info!("Fetching catalog from upstream");
        let payload = self.source.fetch_all().await.map_err(StageError::Source)?;
        if payload.is_empty() {
            return Err(StageError::Empty);
        }

        let total = payload.len() as u64;
        let sha256 = hex::encode(Sha256::digest(&payload));
        info!(bytes = total, sha256 = %sha256, "Catalog downloaded");

        let mut session = self.open_session(total, &sha256).await?;
        let chunk_count = payload.len().div_ceil(self.chunk_bytes);
        let key = self.object_key.as_str();

        for index in session.parts.len()..chunk_count {
            let start = index * self.chunk_bytes;
            let end = (start + self.chunk_bytes).min(payload.len());
            let data = payload.slice(start..end);
            let part_number = index as i32 + 1;
            let upload_id = session.upload_id.as_str();

            let part = self
                .retry
                .run(
                    "upload_part",
                    |_| self.target.put_chunk(key, upload_id, part_number, data.clone()),
                    TransferError::is_retryable,
                )
                .await
                .map_err(|f| StageError::Transfer { source: f.error, attempts: f.attempts })?;
            session.parts.push(part);

            info!(
                part_number,
                "Upload progress: {}/{} bytes ({:.2}%)",
                end,
                total,
                end as f64 / total as f64 * 100.0
            );
            self.save_state(&session.upload_id, end as u64, total, &sha256).await;
        }

        let upload_id = session.upload_id.as_str();
        let parts = session.parts.as_slice();
        self.retry
            .run(
                "finish_upload",
                |_| self.target.finish(key, upload_id, parts),
                TransferError::is_retryable,
            )
            .await
            .map_err(|f| StageError::Transfer { source: f.error, attempts: f.attempts })?;

        if let Err(e) = self.state.clear().await {
            warn!(error = %e, "Failed to remove upload state");
        }

        info!(bytes = total, resumed = session.resumed, "Upload completed successfully");
        Ok(StageResponse {
            success: true,
            bytes_uploaded: total,
            file_size_mb: format!("{:.2}", total as f64 / BYTES_PER_MB),
            completed_at: Utc::now(),
            object_key: self.object_key.clone(),
            sha256,
            resumed: session.resumed,
        })
    }

    /// Continue the saved session when it covers the same payload and the
    /// destination still has it, otherwise start a new one.
    async fn open_session(&self, total: u64, sha256: &str) -> Result<Session, StageError> {
        if let Some(saved) = self.state.load().await {
            if saved.matches(&self.object_key, total, sha256) {
                match self.target.acknowledged(&self.object_key, &saved.upload_id).await {
                    Ok(Some(acknowledged)) => {
                        let parts = usable_prefix(acknowledged, self.chunk_bytes as u64, total);
                        let offset: u64 = parts.iter().map(|p| p.size).sum();
                        info!(
                            upload_id = %saved.upload_id,
                            "Found previous upload, resuming at byte {}", offset
                        );
                        return Ok(Session { upload_id: saved.upload_id, parts, resumed: true });
                    }
                    Ok(None) => info!("Previous upload session no longer exists"),
                    Err(e) => warn!(error = %e, "Cannot query previous upload, starting over"),
                }
            } else {
                info!(
                    saved_key = %saved.object_key,
                    saved_total = saved.bytes_total,
                    "Saved upload state is for a different payload, starting over"
                );
            }
        }

        let key = self.object_key.as_str();
        let upload_id = self
            .retry
            .run("begin_upload", |_| self.target.begin(key), TransferError::is_retryable)
            .await
            .map_err(|f| StageError::Transfer { source: f.error, attempts: f.attempts })?;
        self.save_state(&upload_id, 0, total, sha256).await;

        Ok(Session { upload_id, parts: Vec::new(), resumed: false })
    }

    /// A state file that cannot be written only costs resumability.
    async fn save_state(&self, upload_id: &str, bytes_uploaded: u64, bytes_total: u64, sha256: &str) {
        let state = UploadState {
            upload_url: self.target.location(&self.object_key),
            upload_id: upload_id.to_string(),
            object_key: self.object_key.clone(),
            bytes_uploaded,
            bytes_total,
            sha256: sha256.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.state.save(&state).await {
            warn!(path = %self.state.path().display(), error = %e, "Failed to save upload state");
        }
    }
}

/// Leading run of acknowledged chunks numbered 1, 2, 3... whose sizes match
/// the current chunking. Anything after a gap is uploaded again.
fn usable_prefix(mut parts: Vec<CompletedChunk>, chunk_bytes: u64, total: u64) -> Vec<CompletedChunk> {
    parts.sort_by_key(|p| p.part_number);
    let mut usable = Vec::new();
    for (index, part) in parts.into_iter().enumerate() {
        let start = index as u64 * chunk_bytes;
        let expected = chunk_bytes.min(total.saturating_sub(start));
        if part.part_number != index as i32 + 1 || part.size != expected || expected == 0 {
            break;
        }
        usable.push(part);
    }
    usable
}

/// In-memory source and destination, for tests
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    pub struct StaticSource {
        pub payload: Bytes,
        /// When set, `fetch_all` waits for a notification first
        pub release: Option<Arc<Notify>>,
    }

    impl StaticSource {
        pub fn new(payload: &'static [u8]) -> Self {
            Self { payload: Bytes::from_static(payload), release: None }
        }
    }

    #[async_trait]
    impl CatalogSource for StaticSource {
        async fn fetch_all(&self) -> anyhow::Result<Bytes> {
            if let Some(release) = &self.release {
                release.notified().await;
            }
            Ok(self.payload.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryTarget {
        sessions: Mutex<HashMap<String, Vec<(CompletedChunk, Bytes)>>>,
        finished: Mutex<Option<Bytes>>,
        failures: Mutex<HashMap<i32, VecDeque<TransferError>>>,
        puts: Mutex<Vec<i32>>,
    }

    impl MemoryTarget {
        pub fn fail_part(&self, part_number: i32, errors: impl IntoIterator<Item = TransferError>) {
            self.failures.lock().unwrap().entry(part_number).or_default().extend(errors);
        }

        pub fn seed_session(&self, upload_id: &str, chunks: &[&'static [u8]]) {
            let parts = chunks
                .iter()
                .enumerate()
                .map(|(i, data)| {
                    let part = CompletedChunk {
                        part_number: i as i32 + 1,
                        etag: format!("etag-{}", i + 1),
                        size: data.len() as u64,
                    };
                    (part, Bytes::from_static(data))
                })
                .collect();
            self.sessions.lock().unwrap().insert(upload_id.to_string(), parts);
        }

        pub fn puts(&self) -> Vec<i32> {
            self.puts.lock().unwrap().clone()
        }

        pub fn finished(&self) -> Option<Bytes> {
            self.finished.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransferTarget for MemoryTarget {
        fn location(&self, key: &str) -> String {
            format!("mem://{}", key)
        }

        async fn begin(&self, _key: &str) -> Result<String, TransferError> {
            let mut sessions = self.sessions.lock().unwrap();
            let id = format!("upload-{}", sessions.len() + 1);
            sessions.insert(id.clone(), Vec::new());
            Ok(id)
        }

        async fn acknowledged(
            &self,
            _key: &str,
            upload_id: &str,
        ) -> Result<Option<Vec<CompletedChunk>>, TransferError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .get(upload_id)
                .map(|parts| parts.iter().map(|(p, _)| p.clone()).collect()))
        }

        async fn put_chunk(
            &self,
            _key: &str,
            upload_id: &str,
            part_number: i32,
            data: Bytes,
        ) -> Result<CompletedChunk, TransferError> {
            self.puts.lock().unwrap().push(part_number);
            let failure = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&part_number)
                .and_then(VecDeque::pop_front);
            if let Some(err) = failure {
                return Err(err);
            }
            let part = CompletedChunk {
                part_number,
                etag: format!("etag-{}", part_number),
                size: data.len() as u64,
            };
            let mut sessions = self.sessions.lock().unwrap();
            let parts = sessions
                .get_mut(upload_id)
                .ok_or_else(|| TransferError::Permanent("no such upload".into()))?;
            parts.retain(|(p, _)| p.part_number != part_number);
            parts.push((part.clone(), data));
            Ok(part)
        }

        async fn finish(
            &self,
            _key: &str,
            upload_id: &str,
            parts: &[CompletedChunk],
        ) -> Result<(), TransferError> {
            let sessions = self.sessions.lock().unwrap();
            let stored = sessions
                .get(upload_id)
                .ok_or_else(|| TransferError::Permanent("no such upload".into()))?;
            let mut assembled = Vec::new();
            for part in parts {
                let (_, data) = stored
                    .iter()
                    .find(|(p, _)| p.part_number == part.part_number)
                    .ok_or_else(|| TransferError::Permanent("missing part".into()))?;
                assembled.extend_from_slice(data);
            }
            *self.finished.lock().unwrap() = Some(Bytes::from(assembled));
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::memory::{MemoryTarget, StaticSource};
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn config(dir: &TempDir, chunk_bytes: usize) -> IngestConfig {
        IngestConfig {
            upload_chunk_bytes: chunk_bytes,
            upload_state_file: dir.path().join(".upload-state.json"),
            ..IngestConfig::default()
        }
    }

    const PAYLOAD: &[u8] = b"{\"id\":\"A\"}\n{\"id\":\"B\"}\n{\"id\":\"C\"}\n";

    #[tokio::test]
    async fn test_stage_uploads_all_chunks() {
        let dir = TempDir::new().unwrap();
        let stager = Stager::new(StaticSource::new(PAYLOAD), MemoryTarget::default(), &config(&dir, 10));

        let response = stager.stage().await.unwrap();

        assert!(response.success);
        assert!(!response.resumed);
        assert_eq!(response.bytes_uploaded, PAYLOAD.len() as u64);
        assert_eq!(response.file_size_mb, "0.00");
        assert_eq!(response.object_key, "latest.ndjson");
        assert_eq!(response.sha256, hex::encode(Sha256::digest(PAYLOAD)));
        assert_eq!(stager.target.puts(), vec![1, 2, 3, 4]);
        assert_eq!(stager.target.finished().unwrap(), Bytes::from_static(PAYLOAD));
        assert!(!dir.path().join(".upload-state.json").exists());
        assert!(!stager.is_running());
    }

    #[tokio::test]
    async fn test_concurrent_stage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let release = Arc::new(Notify::new());
        let source = StaticSource { release: Some(release.clone()), ..StaticSource::new(PAYLOAD) };
        let stager = Stager::new(source, MemoryTarget::default(), &config(&dir, 64));

        let (first, second) = tokio::join!(stager.stage(), async {
            let second = stager.stage().await;
            release.notify_one();
            second
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(StageError::Conflict)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let target = MemoryTarget::default();
        target.fail_part(1, [
            TransferError::Transient("503".into()),
            TransferError::Transient("timeout".into()),
        ]);
        let stager = Stager::new(StaticSource::new(PAYLOAD), target, &config(&dir, 64));

        stager.stage().await.unwrap();
        assert_eq!(stager.target.puts(), vec![1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_keeps_state_for_resume() {
        let dir = TempDir::new().unwrap();
        let target = MemoryTarget::default();
        target.fail_part(2, [TransferError::Permanent("403 Forbidden".into())]);
        let stager = Stager::new(StaticSource::new(PAYLOAD), target, &config(&dir, 10));

        match stager.stage().await {
            Err(StageError::Transfer { source: TransferError::Permanent(_), attempts }) => {
                assert_eq!(attempts, 1)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stager.target.puts(), vec![1, 2]);

        let saved = UploadStateFile::new(dir.path().join(".upload-state.json")).load().await.unwrap();
        assert_eq!(saved.upload_id, "upload-1");
        assert_eq!(saved.bytes_uploaded, 10);
        assert_eq!(saved.bytes_total, PAYLOAD.len() as u64);
        assert_eq!(saved.upload_url, "mem://latest.ndjson");
        assert_eq!(saved.sha256, hex::encode(Sha256::digest(PAYLOAD)));
    }

    #[tokio::test]
    async fn test_resume_skips_acknowledged_chunks() {
        let dir = TempDir::new().unwrap();
        let state = UploadStateFile::new(dir.path().join(".upload-state.json"));
        state
            .save(&UploadState {
                upload_url: "mem://latest.ndjson".into(),
                upload_id: "previous".into(),
                object_key: "latest.ndjson".into(),
                bytes_uploaded: 20,
                bytes_total: PAYLOAD.len() as u64,
                sha256: hex::encode(Sha256::digest(PAYLOAD)),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let target = MemoryTarget::default();
        target.seed_session("previous", &[&PAYLOAD[..10], &PAYLOAD[10..20]]);
        let stager = Stager::new(StaticSource::new(PAYLOAD), target, &config(&dir, 10));

        let response = stager.stage().await.unwrap();

        assert!(response.resumed);
        assert_eq!(stager.target.puts(), vec![3, 4]);
        assert_eq!(stager.target.finished().unwrap(), Bytes::from_static(PAYLOAD));
        assert!(state.load().await.is_none());
    }

    #[tokio::test]
    async fn test_state_for_other_payload_starts_over() {
        let dir = TempDir::new().unwrap();
        let state = UploadStateFile::new(dir.path().join(".upload-state.json"));
        state
            .save(&UploadState {
                upload_url: "mem://latest.ndjson".into(),
                upload_id: "previous".into(),
                object_key: "latest.ndjson".into(),
                bytes_uploaded: 10,
                bytes_total: 999,
                sha256: hex::encode(Sha256::digest(PAYLOAD)),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let target = MemoryTarget::default();
        target.seed_session("previous", &[&PAYLOAD[..10]]);
        let stager = Stager::new(StaticSource::new(PAYLOAD), target, &config(&dir, 64));

        let response = stager.stage().await.unwrap();
        assert!(!response.resumed);
        assert_eq!(stager.target.puts(), vec![1]);
    }

    #[tokio::test]
    async fn test_changed_payload_of_same_size_starts_over() {
        const CHANGED: &[u8] = b"{\"id\":\"X\"}\n{\"id\":\"Y\"}\n{\"id\":\"Z\"}\n";
        assert_eq!(CHANGED.len(), PAYLOAD.len());

        let dir = TempDir::new().unwrap();
        let state = UploadStateFile::new(dir.path().join(".upload-state.json"));
        state
            .save(&UploadState {
                upload_url: "mem://latest.ndjson".into(),
                upload_id: "previous".into(),
                object_key: "latest.ndjson".into(),
                bytes_uploaded: 20,
                bytes_total: PAYLOAD.len() as u64,
                sha256: hex::encode(Sha256::digest(PAYLOAD)),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let target = MemoryTarget::default();
        target.seed_session("previous", &[&PAYLOAD[..10], &PAYLOAD[10..20]]);
        let stager = Stager::new(StaticSource::new(CHANGED), target, &config(&dir, 10));

        let response = stager.stage().await.unwrap();

        assert!(!response.resumed);
        assert_eq!(stager.target.puts(), vec![1, 2, 3, 4]);
        assert_eq!(stager.target.finished().unwrap(), Bytes::from_static(CHANGED));
        assert_eq!(response.sha256, hex::encode(Sha256::digest(CHANGED)));
    }

    #[tokio::test]
    async fn test_empty_dataset_fails() {
        let dir = TempDir::new().unwrap();
        let stager = Stager::new(StaticSource::new(b""), MemoryTarget::default(), &config(&dir, 64));
        assert!(matches!(stager.stage().await, Err(StageError::Empty)));
        assert!(stager.target.puts().is_empty());
    }

    #[test]
    fn test_usable_prefix_stops_at_gap_or_size_change() {
        let part = |n: i32, size: u64| CompletedChunk { part_number: n, etag: String::new(), size };

        let prefix = usable_prefix(vec![part(2, 10), part(1, 10), part(4, 10)], 10, 45);
        assert_eq!(prefix.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);

        assert!(usable_prefix(vec![part(1, 8)], 10, 45).is_empty());
        assert_eq!(usable_prefix(vec![part(1, 10), part(2, 5)], 10, 15).len(), 2);
    }

    #[test]
    fn test_transfer_error_classification() {
        assert!(!TransferError::from_status(Some(401), String::new()).is_retryable());
        assert!(!TransferError::from_status(Some(404), String::new()).is_retryable());
        assert!(TransferError::from_status(Some(500), String::new()).is_retryable());
        assert!(TransferError::from_status(None, String::new()).is_retryable());
    }
}
