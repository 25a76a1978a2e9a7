//! Two-phase sync: stage the catalog, then load it chunk by chunk
//!
//! ```text
//! idle -> fetching -> processing -> completed
//!            |            |
//!            +------------+-------> failed
//! ```
//!
//! The stager and loader are reached through [`SyncServices`], normally over
//! HTTP. Chunks run strictly one after another. A failed chunk is retried on
//! a fixed delay unless the loader reports a conflict; when retries run out
//! the failing offset is kept as `resumeOffset` so an operator can continue
//! from there.

use async_trait::async_trait;
use chrono::Utc;
use pimsync_common::types::{
    LoadResponse, StageResponse, SyncErrorEntry, SyncPhase, SyncRequest, SyncStatus,
};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::config::OrchestratorConfig;
use super::retry::RetryPolicy;

/// Failure of a call to the stager or loader
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("service busy: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("service responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// A busy service or a rejected key will not change by asking again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Conflict(_) | RemoteError::Unauthorized)
    }
}

/// The stager and loader as seen by the orchestrator
#[async_trait]
pub trait SyncServices: Send + Sync {
    async fn stage(&self) -> Result<StageResponse, RemoteError>;

    async fn load(&self, offset: u64, limit: u64) -> Result<LoadResponse, RemoteError>;
}

/// Process-wide sync status.
///
/// Every mutation names the run it belongs to and is dropped if that run is
/// no longer current, so a run abandoned by [`SyncTracker::reset`] cannot
/// overwrite the state of a newer one.
#[derive(Debug, Default)]
pub struct SyncTracker {
    status: RwLock<SyncStatus>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Start a new run unless one is active. The check and the reset happen
    /// under one write lock. `Err` carries the status of the active run.
    pub fn try_begin(&self) -> Result<(Uuid, SyncStatus), SyncStatus> {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if status.is_running {
            return Err(status.clone());
        }

        let run_id = Uuid::new_v4();
        *status = SyncStatus {
            is_running: true,
            run_id: Some(run_id),
            start_time: Some(Utc::now()),
            current_phase: SyncPhase::Fetching,
            ..SyncStatus::default()
        };
        Ok((run_id, status.clone()))
    }

    /// Clear a stuck run and return to idle. Returns whether a run was active.
    pub fn reset(&self) -> bool {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        let was_running = status.is_running;
        *status = SyncStatus::default();
        was_running
    }

    fn update(&self, run_id: Uuid, f: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if status.run_id == Some(run_id) {
            f(&mut status);
        } else {
            warn!(%run_id, "Ignoring update from a run that is no longer current");
        }
    }

    fn set_phase(&self, run_id: Uuid, phase: SyncPhase) {
        self.update(run_id, |s| s.current_phase = phase);
    }

    fn record_error(&self, run_id: Uuid, entry: SyncErrorEntry) {
        self.update(run_id, |s| s.progress.errors.push(entry));
    }

    fn finish(&self, run_id: Uuid, phase: SyncPhase) {
        self.update(run_id, |s| {
            s.is_running = false;
            s.current_phase = phase;
            s.completed_at = Some(Utc::now());
        });
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    services: Arc<dyn SyncServices>,
    tracker: Arc<SyncTracker>,
    config: OrchestratorConfig,
    started: Instant,
}

impl Orchestrator {
    pub fn new(services: Arc<dyn SyncServices>, config: OrchestratorConfig) -> Self {
        Self {
            services,
            tracker: Arc::new(SyncTracker::new()),
            config,
            started: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.tracker.snapshot()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn reset(&self) -> bool {
        let was_running = self.tracker.reset();
        if was_running {
            warn!("Sync state reset while a run was active");
        }
        was_running
    }

    /// Start a sync in the background and return its initial status.
    /// `Err` carries the status of the run already in progress.
    pub fn trigger(&self, request: SyncRequest) -> Result<SyncStatus, SyncStatus> {
        let (run_id, status) = self.tracker.try_begin()?;
        let this = self.clone();
        tokio::spawn(async move { this.execute(run_id, request).await });
        Ok(status)
    }

    /// Run a sync to the end and return the final status.
    #[cfg(test)]
    pub(crate) async fn sync(&self, request: SyncRequest) -> Result<SyncStatus, SyncStatus> {
        let (run_id, _) = self.tracker.try_begin()?;
        self.execute(run_id, request).await;
        Ok(self.snapshot())
    }

    #[instrument(skip_all, fields(%run_id))]
    async fn execute(&self, run_id: Uuid, request: SyncRequest) {
        info!("Starting full sync");
        let skip_fetch = request.skip_fetch || request.resume_from.is_some();

        if skip_fetch {
            info!("Skipping fetch phase, loading the existing blob");
        } else if !self.fetch(run_id).await {
            self.tracker.finish(run_id, SyncPhase::Failed);
            error!("Sync failed during fetch phase");
            return;
        }

        let start_offset = request.resume_from.unwrap_or(0);
        if self.process_chunks(run_id, start_offset).await {
            self.tracker.finish(run_id, SyncPhase::Completed);
            let status = self.snapshot();
            info!(
                total_records = status.progress.total_records,
                chunks = status.progress.chunks_processed,
                "Sync completed successfully"
            );
        } else {
            self.tracker.finish(run_id, SyncPhase::Failed);
            error!("Sync failed during processing phase");
        }
    }

    /// Phase 1. A single call; its timeout covers the whole extraction.
    async fn fetch(&self, run_id: Uuid) -> bool {
        self.tracker.set_phase(run_id, SyncPhase::Fetching);
        info!("Phase 1: fetching latest data");

        match self.services.stage().await {
            Ok(staged) => {
                info!(
                    bytes = staged.bytes_uploaded,
                    size_mb = %staged.file_size_mb,
                    resumed = staged.resumed,
                    "Data fetched successfully"
                );
                self.tracker.update(run_id, |s| s.progress.fetched = true);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch data");
                self.tracker.record_error(
                    run_id,
                    SyncErrorEntry {
                        phase: SyncPhase::Fetching,
                        detail: e.to_string(),
                        chunk: None,
                        offset: None,
                        attempts: 1,
                        timestamp: Utc::now(),
                    },
                );
                false
            }
        }
    }

    /// Phase 2. Returns whether every chunk succeeded.
    async fn process_chunks(&self, run_id: Uuid, start_offset: u64) -> bool {
        self.tracker.set_phase(run_id, SyncPhase::Processing);
        info!(start_offset, chunk_size = self.config.chunk_size, "Phase 2: processing data in chunks");

        let chunk_size = self.config.chunk_size;
        let policy = RetryPolicy::fixed(self.config.max_retries, self.config.retry_delay());
        let mut offset = start_offset;
        let mut chunk: u64 = 0;

        loop {
            chunk += 1;
            self.tracker.update(run_id, |s| s.progress.current_offset = offset);
            info!(chunk, offset, "Processing chunk");

            let services = &self.services;
            let result = policy
                .run("load_chunk", |_| services.load(offset, chunk_size), RemoteError::is_retryable)
                .await;

            let loaded = match result {
                Ok(loaded) => loaded,
                Err(failure) => {
                    error!(
                        chunk,
                        offset,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "Chunk failed, resume from offset {}", offset
                    );
                    self.tracker.update(run_id, |s| {
                        s.resume_offset = Some(offset);
                        s.progress.errors.push(SyncErrorEntry {
                            phase: SyncPhase::Processing,
                            detail: failure.error.to_string(),
                            chunk: Some(chunk),
                            offset: Some(offset),
                            attempts: failure.attempts,
                            timestamp: Utc::now(),
                        });
                    });
                    return false;
                }
            };

            let stats = loaded.stats;
            info!(
                chunk,
                records = stats.total_records,
                inserted = stats.inserted,
                updated = stats.updated,
                skipped = stats.skipped,
                errors = stats.errors,
                "Chunk complete"
            );
            self.tracker.update(run_id, |s| {
                let p = &mut s.progress;
                p.chunks_processed = chunk;
                p.total_records += stats.total_records;
                p.inserted += stats.inserted;
                p.updated += stats.updated;
                p.skipped += stats.skipped;
                p.record_errors += stats.errors;
                p.current_offset = loaded.next_offset;
            });

            offset = loaded.next_offset;
            // A short chunk means the end of the blob even if the loader
            // still reports more
            if !(loaded.has_more && stats.total_records == chunk_size) {
                return true;
            }
            tokio::time::sleep(self.config.chunk_pause()).await;
        }
    }
}
