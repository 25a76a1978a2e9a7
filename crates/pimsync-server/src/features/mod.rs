//! Feature modules implementing the pimsync HTTP API
//!
//! Each service is a vertical slice with its own state and routes:
//!
//! - **stager**: extraction from the upstream catalog into the blob store
//! - **loader**: one offset/limit window of the staged catalog into Postgres
//! - **orchestrator**: full syncs, retry, status and reset
//!
//! A process hosts any subset of the three (see `PIMSYNC_SERVICES`); the
//! orchestrator talks to the other two over HTTP even when they share the
//! process.

pub mod loader;
pub mod orchestrator;
pub mod stager;

use axum::{routing::get, Router};

use crate::middleware::AdminKeyLayer;

/// State of every enabled service; `None` leaves its routes unmounted
#[derive(Clone, Default)]
pub struct FeatureState {
    pub stager: Option<stager::StagerState>,
    pub loader: Option<loader::LoaderState>,
    pub orchestrator: Option<orchestrator::OrchestratorState>,
}

/// Creates the API router with the enabled services mounted
///
/// - `/healthz` - liveness, no authentication
/// - `/stager` - extraction
/// - `/loader` - window processing
/// - `/orchestrator` - sync control
///
/// Everything except `/healthz` requires the admin key.
pub fn router(state: FeatureState, admin_key: &str) -> Router<()> {
    let mut protected = Router::new();

    if let Some(s) = state.stager {
        protected = protected.nest("/stager", stager::stager_routes().with_state(s));
    }
    if let Some(s) = state.loader {
        protected = protected.nest("/loader", loader::loader_routes().with_state(s));
    }
    if let Some(s) = state.orchestrator {
        protected =
            protected.nest("/orchestrator", orchestrator::orchestrator_routes().with_state(s));
    }

    Router::new()
        .route("/healthz", get(health))
        .merge(protected.layer(AdminKeyLayer::new(admin_key)))
}

async fn health() -> &'static str {
    "OK"
}
