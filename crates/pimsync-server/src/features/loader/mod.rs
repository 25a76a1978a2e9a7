//! Loader feature module
//!
//! Runs one offset/limit window of the staged catalog through the pipeline.
//! One window at a time per process.

pub mod routes;


pub use routes::{loader_routes, LoaderState};
