//! pimsync server - Main entry point

use anyhow::{Context, Result};
use axum::Router;
use pimsync_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use pimsync_server::{
    config::Config,
    db,
    features::{self, loader::LoaderState, orchestrator::OrchestratorState, stager::StagerState},
    ingest::{
        orchestrator::Orchestrator,
        remote::HttpSyncServices,
        stager::{CatalogSource, Stager, TransferTarget},
        upsert::PgProductStore,
        upstream::CatalogClient,
    },
    middleware,
    storage::Storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("pimsync-server")
        .filter_directives("pimsync_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting pimsync server");

    let config = Config::load()?;
    let services = config.server.services;
    info!(
        stager = services.stager,
        loader = services.loader,
        orchestrator = services.orchestrator,
        "Configuration loaded - server will bind to {}:{}",
        config.server.host,
        config.server.port
    );

    let state = build_state(&config).await?;
    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Connect to whatever the enabled services need and build their state
async fn build_state(config: &Config) -> Result<features::FeatureState> {
    let services = config.server.services;
    let storage = services
        .needs_storage()
        .then(|| Storage::new(config.storage.clone()));

    let mut state = features::FeatureState::default();

    if let (true, Some(storage)) = (services.stager, &storage) {
        let source: Arc<dyn CatalogSource> =
            Arc::new(CatalogClient::new(config.ingest.upstream.clone())?);
        let target: Arc<dyn TransferTarget> = Arc::new(storage.clone());
        state.stager = Some(StagerState::new(Stager::new(source, target, &config.ingest)));
        info!(url = %config.ingest.upstream.url, "Stager enabled");
    }

    if let (true, Some(storage)) = (services.loader, &storage) {
        let pool = db::create_pool(&config.database)
            .await
            .context("Failed to connect to the database")?;

        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations completed");

        state.loader = Some(LoaderState::new(
            Arc::new(PgProductStore::new(pool)),
            Arc::new(storage.clone()),
            &config.ingest,
        ));
        info!(object_key = %config.ingest.object_key, "Loader enabled");
    }

    if services.orchestrator {
        let remote = HttpSyncServices::new(&config.orchestrator, config.auth.admin_key.clone())?;
        let orchestrator = Orchestrator::new(Arc::new(remote), config.orchestrator.clone());
        state.orchestrator = Some(OrchestratorState { orchestrator });
        info!(
            stager_url = %config.orchestrator.stager_url,
            loader_url = %config.orchestrator.loader_url,
            "Orchestrator enabled"
        );
    }

    Ok(state)
}

/// Create the application router with all routes and middleware
fn create_router(state: features::FeatureState, config: &Config) -> Router {
    features::router(state, &config.auth.admin_key)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
