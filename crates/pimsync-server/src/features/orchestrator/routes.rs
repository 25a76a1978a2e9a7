//! Orchestrator routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pimsync_common::types::{StatusResponse, SyncRequest, SyncTriggerResponse};
use serde::Deserialize;
use serde_json::json;

use crate::ingest::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct OrchestratorState {
    pub orchestrator: Orchestrator,
}

/// Query form of a trigger, for links that can only be a URL
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    pub resume_from: Option<u64>,
    #[serde(default)]
    pub skip_fetch: bool,
}

impl From<SyncQuery> for SyncRequest {
    fn from(query: SyncQuery) -> Self {
        SyncRequest { resume_from: query.resume_from, skip_fetch: query.skip_fetch }
    }
}

/// Create orchestrator routes
pub fn orchestrator_routes() -> Router<OrchestratorState> {
    Router::new()
        .route("/status", get(status))
        .route("/sync", post(trigger_sync).get(trigger_sync_link))
        .route("/reset", post(reset))
}

/// Current sync state plus process uptime
///
/// GET /orchestrator/status
async fn status(State(state): State<OrchestratorState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.orchestrator.snapshot(),
        uptime: state.orchestrator.uptime().as_secs(),
    })
}

/// Start a full sync in the background
///
/// POST /orchestrator/sync
async fn trigger_sync(
    State(state): State<OrchestratorState>,
    body: Option<Json<SyncRequest>>,
) -> Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    start(&state, request)
}

/// GET /orchestrator/sync?key=...&resumeFrom=20000
async fn trigger_sync_link(
    State(state): State<OrchestratorState>,
    Query(query): Query<SyncQuery>,
) -> Response {
    start(&state, query.into())
}

fn start(state: &OrchestratorState, request: SyncRequest) -> Response {
    match state.orchestrator.trigger(request) {
        Ok(status) => (
            StatusCode::OK,
            Json(SyncTriggerResponse { message: "Sync started".to_string(), status }),
        )
            .into_response(),
        Err(status) => (
            StatusCode::CONFLICT,
            Json(SyncTriggerResponse {
                message: "Sync already in progress".to_string(),
                status,
            }),
        )
            .into_response(),
    }
}

/// Force the state machine back to idle
///
/// POST /orchestrator/reset
async fn reset(State(state): State<OrchestratorState>) -> Response {
    let was_running = state.orchestrator.reset();
    Json(json!({
        "success": true,
        "wasRunning": was_running,
        "status": state.orchestrator.snapshot(),
    }))
    .into_response()
}
