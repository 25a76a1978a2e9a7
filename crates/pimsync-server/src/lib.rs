//! pimsync server library
//!
//! Keeps a Postgres `products` table in step with an upstream product
//! catalog.
//!
//! # Overview
//!
//! A sync runs in two phases, each owned by its own service:
//!
//! - **Stager**: downloads the full catalog as NDJSON and writes it to an
//!   S3-compatible bucket with a resumable multipart upload
//! - **Loader**: reads one line window of the staged file, normalizes the
//!   records and upserts only what changed
//! - **Orchestrator**: runs the stager once, then walks the file with
//!   loader calls, retrying transient failures and tracking status
//!
//! One binary hosts any subset of the three (`PIMSYNC_SERVICES`).
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP surface, one router per service
//! - **SQLx**: Postgres access and migrations
//! - **aws-sdk-s3**: staging bucket
//! - **reqwest**: upstream catalog and service-to-service calls

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

pub use error::AppError;
