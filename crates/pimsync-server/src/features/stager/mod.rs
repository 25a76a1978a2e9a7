//! Stager feature module
//!
//! Triggers the extraction stage: upstream catalog to the blob store.

pub mod routes;


pub use routes::{stager_routes, StagerState};
