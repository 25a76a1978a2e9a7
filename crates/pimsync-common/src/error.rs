//! Error types shared across pimsync crates

use thiserror::Error;

/// Result type alias for pimsync operations
pub type Result<T> = std::result::Result<T, PimsyncError>;

/// Errors raised while handling the shared wire types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PimsyncError {
    #[error("Invalid sync phase '{0}', expected one of idle, fetching, processing, completed, failed")]
    InvalidPhase(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_phase_message() {
        let err = PimsyncError::InvalidPhase("paused".to_string());
        assert!(err.to_string().starts_with("Invalid sync phase 'paused'"));
    }
}
