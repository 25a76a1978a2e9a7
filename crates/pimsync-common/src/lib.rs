//! pimsync common library
//!
//! Shared types, logging and error handling for the pimsync workspace.
//!
//! - **Error Handling**: [`PimsyncError`] for wire type parsing
//! - **Logging**: tracing subscriber setup shared by the server and the CLI
//! - **Types**: wire types exchanged between the sync services and the CLI
//!
//! # Example
//!
//! ```no_run
//! use pimsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PimsyncError, Result};
