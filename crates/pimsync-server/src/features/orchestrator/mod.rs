//! Orchestrator feature module
//!
//! Starts full syncs in the background and reports their status.

pub mod routes;


pub use routes::{orchestrator_routes, OrchestratorState};
