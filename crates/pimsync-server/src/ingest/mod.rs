//! Catalog synchronization
//!
//! # Architecture
//!
//! - **ndjson**: line framing and lenient JSON decoding
//! - **batch**: fixed-size grouping of decoded records
//! - **transform**: raw record to [`transform::NormalizedProduct`]
//! - **upsert**: change-aware persistence against a [`upsert::ProductStore`]
//! - **pipeline**: one offset/limit window of decode, batch, transform, upsert
//! - **stager**: upstream catalog to blob store with a resumable transfer
//! - **orchestrator**: stage then load in chunks, with retry and status
//!
//! `upstream`, `remote` and [`crate::storage`] are the HTTP and S3 adapters
//! behind the traits the core is written against.

pub mod batch;
pub mod config;
pub mod guard;
pub mod ndjson;
pub mod orchestrator;
pub mod pipeline;
pub mod remote;
pub mod retry;
pub mod stager;
pub mod transform;
pub mod upload_state;
pub mod upsert;
pub mod upstream;

pub use config::{IngestConfig, OrchestratorConfig};
