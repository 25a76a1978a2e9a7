//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function taking the API
//! client and the `--json` flag.

pub mod health;
pub mod load;
pub mod reset;
pub mod stage;
pub mod status;
pub mod sync;
