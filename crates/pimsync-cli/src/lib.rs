//! pimsync CLI Library
//!
//! Operator commands for a running pimsync deployment:
//!
//! - **Sync control**: start a full sync or resume one (`pimsync sync`)
//! - **Single steps**: run the stager or one loader window (`pimsync stage`, `pimsync load`)
//! - **Status**: orchestrator phase and progress (`pimsync status`)
//! - **Recovery**: clear stuck in-progress flags (`pimsync reset`)
//! - **Liveness**: `pimsync health`

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod client;
pub mod commands;
pub mod error;
pub mod output;

// Re-export commonly used types
pub use client::ApiClient;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand, ValueEnum};
use pimsync_common::types::SyncPhase;

/// pimsync - product catalog sync operator tool
#[derive(Parser, Debug)]
#[command(name = "pimsync")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print raw JSON responses instead of a summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL
    #[arg(long, env = "PIMSYNC_SERVER_URL", default_value = client::DEFAULT_SERVER_URL, global = true)]
    pub server_url: String,

    /// Shared admin secret sent as the x-admin-key header
    #[arg(long, env = "ADMIN_KEY", hide_env_values = true, global = true)]
    pub admin_key: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the orchestrator's sync status
    Status {
        /// Fail unless the orchestrator is in this phase
        /// (idle, fetching, processing, completed, failed)
        #[arg(long, value_name = "PHASE")]
        expect: Option<SyncPhase>,
    },

    /// Start a full sync, or resume a failed one
    Sync {
        /// Skip extraction and start loading at this line offset
        #[arg(long, value_name = "OFFSET")]
        resume_from: Option<u64>,

        /// Skip extraction and load the staged blob from the start
        #[arg(long)]
        skip_fetch: bool,

        /// Poll status until the sync reaches a terminal phase
        #[arg(short, long)]
        wait: bool,

        /// Seconds between polls when waiting
        #[arg(long, default_value_t = 10, requires = "wait")]
        interval: u64,
    },

    /// Run the extraction stager once
    Stage,

    /// Process one window of the staged catalog
    Load {
        /// Zero-based line offset of the window
        #[arg(long)]
        offset: Option<u64>,

        /// Number of lines in the window (server default when omitted)
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Clear a stuck in-progress flag
    Reset {
        /// Service to reset
        #[arg(value_enum)]
        target: ResetTarget,
    },

    /// Check that the server is up
    Health,
}

/// Services that expose a reset operation
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Loader,
    Orchestrator,
}

impl ResetTarget {
    pub fn path(self) -> &'static str {
        match self {
            ResetTarget::Loader => "/loader/reset",
            ResetTarget::Orchestrator => "/orchestrator/reset",
        }
    }
}
