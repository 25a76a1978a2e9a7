//! pimsync CLI - Main entry point

use clap::Parser;
use pimsync_cli::{ApiClient, Cli, Commands};
use pimsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use pimsync_common::types::SyncRequest;
use std::{process, time::Duration};
use tracing::error;

#[tokio::main]
async fn main() {
    // A local .env may carry ADMIN_KEY and PIMSYNC_SERVER_URL
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("pimsync-cli")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _log_guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> pimsync_cli::Result<()> {
    let client = ApiClient::new(cli.server_url.clone(), cli.admin_key.clone())?;
    let json = cli.json;

    match &cli.command {
        Commands::Status { expect } => {
            pimsync_cli::commands::status::run(&client, *expect, json).await
        }

        Commands::Sync {
            resume_from,
            skip_fetch,
            wait,
            interval,
        } => {
            let request = SyncRequest {
                resume_from: *resume_from,
                skip_fetch: *skip_fetch,
            };
            pimsync_cli::commands::sync::run(
                &client,
                request,
                *wait,
                Duration::from_secs(*interval),
                json,
            )
            .await
        }

        Commands::Stage => pimsync_cli::commands::stage::run(&client, json).await,

        Commands::Load { offset, limit } => {
            pimsync_cli::commands::load::run(&client, *offset, *limit, json).await
        }

        Commands::Reset { target } => {
            pimsync_cli::commands::reset::run(&client, *target, json).await
        }

        Commands::Health => pimsync_cli::commands::health::run(&client, json).await,
    }
}
