//! Stager routes

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use pimsync_common::types::StageResponse;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::ingest::stager::{CatalogSource, Stager, TransferTarget};

pub type DynStager = Stager<Arc<dyn CatalogSource>, Arc<dyn TransferTarget>>;

#[derive(Clone)]
pub struct StagerState {
    pub stager: Arc<DynStager>,
}

impl StagerState {
    pub fn new(stager: DynStager) -> Self {
        Self { stager: Arc::new(stager) }
    }
}

/// Create stager routes
pub fn stager_routes() -> Router<StagerState> {
    Router::new()
        .route("/run", post(run))
        .route("/status", get(status))
}

/// Fetch the catalog and stage it
///
/// POST /stager/run
async fn run(State(state): State<StagerState>) -> Result<Json<StageResponse>, AppError> {
    let stager = state.stager.clone();
    // Spawned so a dropped client connection cannot cancel a transfer midway
    let response = tokio::spawn(async move { stager.stage().await })
        .await
        .map_err(|e| AppError::Internal(format!("Stage task failed: {}", e)))??;

    Ok(Json(response))
}

/// GET /stager/status
async fn status(State(state): State<StagerState>) -> Json<Value> {
    Json(json!({ "isRunning": state.stager.is_running() }))
}
