//! Loader routes

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use pimsync_common::types::{LoadRequest, LoadResponse, LoaderRun, LoaderStatus, PipelineStats};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::AppError;
use crate::ingest::config::IngestConfig;
use crate::ingest::guard::RunGuard;
use crate::ingest::pipeline::{BlobSource, PipelineDriver};
use crate::ingest::upsert::ProductStore;

#[derive(Clone)]
pub struct LoaderState {
    pub driver: Arc<PipelineDriver<Arc<dyn ProductStore>>>,
    pub blob: Arc<dyn BlobSource>,
    pub object_key: Arc<str>,
    pub default_limit: u64,
    pub guard: RunGuard,
    pub last_run: Arc<RwLock<Option<LoaderRun>>>,
}

impl LoaderState {
    pub fn new(
        store: Arc<dyn ProductStore>,
        blob: Arc<dyn BlobSource>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            driver: Arc::new(PipelineDriver::new(store, config.batch_size)),
            blob,
            object_key: config.object_key.as_str().into(),
            default_limit: config.default_limit,
            guard: RunGuard::new(),
            last_run: Arc::new(RwLock::new(None)),
        }
    }
}

/// Create loader routes
pub fn loader_routes() -> Router<LoaderState> {
    Router::new()
        .route("/run", post(run))
        .route("/status", get(status))
        .route("/reset", post(reset))
}

/// Process one window of the staged catalog
///
/// POST /loader/run?offset=0&limit=10000
///
/// The window may also be given as a JSON body; query parameters win.
/// A `limit` of 0 counts as absent so every window advances.
async fn run(
    State(state): State<LoaderState>,
    Query(query): Query<LoadRequest>,
    body: Option<Json<LoadRequest>>,
) -> Result<Json<LoadResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let offset = query.offset.or(body.offset).unwrap_or(0);
    let limit = query
        .limit
        .or(body.limit)
        .filter(|&l| l > 0)
        .unwrap_or(state.default_limit);

    let permit = state
        .guard
        .try_acquire()
        .ok_or_else(|| AppError::Conflict("Processing already in progress".to_string()))?;

    info!(offset, limit, "Loader run requested");

    let task_state = state.clone();
    let stats = tokio::spawn(async move {
        let _permit = permit;
        load_window(&task_state, offset, limit).await
    })
    .await
    .map_err(|e| AppError::Internal(format!("Loader task failed: {}", e)))??;

    Ok(Json(LoadResponse {
        success: true,
        stats,
        next_offset: offset.saturating_add(limit),
        has_more: stats.total_records == limit,
    }))
}

async fn load_window(state: &LoaderState, offset: u64, limit: u64) -> Result<PipelineStats, AppError> {
    let reader = state
        .blob
        .open(&state.object_key)
        .await
        .map_err(|e| AppError::Storage(format!("{:#}", e)))?;

    let stats = state.driver.run(reader, offset, Some(limit)).await?;

    *state.last_run.write().await = Some(LoaderRun {
        offset,
        limit,
        stats,
        finished_at: Utc::now(),
    });
    Ok(stats)
}

/// GET /loader/status
async fn status(State(state): State<LoaderState>) -> Json<LoaderStatus> {
    Json(LoaderStatus {
        is_processing: state.guard.is_busy(),
        last_run: state.last_run.read().await.clone(),
    })
}

/// Clear a stuck processing flag
///
/// POST /loader/reset
async fn reset(State(state): State<LoaderState>) -> Json<Value> {
    let was_processing = state.guard.force_release();
    if was_processing {
        warn!("Loader guard released while a run was active");
    }
    Json(json!({ "success": true, "wasProcessing": was_processing }))
}
