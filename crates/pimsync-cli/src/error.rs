//! Error types for the pimsync CLI
//!
//! Messages are user-facing and say what to check next.

use pimsync_common::types::SyncPhase;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The admin key was missing or rejected
    #[error("Unauthorized. Set ADMIN_KEY or pass --admin-key with the server's admin secret.")]
    Unauthorized,

    /// The service is busy with another run
    #[error("{0}. Check progress with 'pimsync status' or clear a stuck flag with 'pimsync reset'.")]
    Busy(String),

    /// A waited-on sync ended in the failed phase
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    /// `status --expect` saw a different phase
    #[error("Orchestrator is in phase '{actual}', expected '{expected}'")]
    UnexpectedPhase { expected: SyncPhase, actual: SyncPhase },

    /// HTTP request failed
    #[error("Network request failed: {0}. Check that the server is running and --server-url is correct.")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Health check got no answer
    #[error("Server at {0} is not reachable. Check --server-url or PIMSYNC_SERVER_URL.")]
    Unreachable(String),
}

impl CliError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api { status, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_points_at_recovery() {
        let err = CliError::Busy("Sync already in progress".to_string());
        let msg = err.to_string();
        assert!(msg.starts_with("Sync already in progress."));
        assert!(msg.contains("pimsync reset"));
    }

    #[test]
    fn test_api_message() {
        let err = CliError::api(502, "Failed to open staged catalog");
        assert_eq!(err.to_string(), "Server returned 502: Failed to open staged catalog");
    }
}
