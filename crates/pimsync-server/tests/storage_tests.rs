//! Staging against a real S3-compatible store
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test --test storage_tests -- --ignored --nocapture
//! ```

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{init_test_tracing, TestMinio};
use pimsync_server::ingest::config::IngestConfig;
use pimsync_server::ingest::pipeline::BlobSource;
use pimsync_server::ingest::stager::{CatalogSource, Stager, TransferTarget};
use pimsync_server::storage::Storage;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

/// S3 rejects non-final parts below 5 MiB
const PART_BYTES: usize = 5 * 1024 * 1024;

struct StaticCatalog(Bytes);

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_all(&self) -> anyhow::Result<Bytes> {
        Ok(self.0.clone())
    }
}

/// Just over two parts of NDJSON
fn catalog() -> Bytes {
    let mut out = String::new();
    let mut i = 0;
    while out.len() < PART_BYTES * 2 + 1024 {
        out.push_str(&format!(
            "{{\"meta\":{{\"updatedAt\":100}},\"result\":{{\"id\":\"P{}\",\"name\":\"Product {}\"}}}}\n",
            i, i
        ));
        i += 1;
    }
    Bytes::from(out)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_stage_and_read_back() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let storage = Storage::new(minio.storage_config());
    let dir = TempDir::new().unwrap();
    let config = IngestConfig {
        upload_chunk_bytes: PART_BYTES,
        upload_state_file: dir.path().join(".upload-state.json"),
        ..IngestConfig::default()
    };
    let payload = catalog();

    let stager = Stager::new(StaticCatalog(payload.clone()), storage.clone(), &config);
    let response = stager.stage().await.unwrap();
    assert_eq!(response.bytes_uploaded, payload.len() as u64);
    assert!(!response.resumed);
    assert!(!config.upload_state_file.exists());

    let mut reader = storage.open(&config.object_key).await.unwrap();
    let mut staged = Vec::new();
    reader.read_to_end(&mut staged).await.unwrap();
    assert_eq!(staged.len(), payload.len());
    assert!(staged == payload.as_ref());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_acknowledged_parts_and_missing_session() {
    init_test_tracing();
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let storage = Storage::new(minio.storage_config());
    let key = "partial.ndjson";

    let upload_id = storage.begin(key).await.unwrap();
    let part = storage
        .put_chunk(key, &upload_id, 1, Bytes::from(vec![b'x'; PART_BYTES]))
        .await
        .unwrap();

    let parts = storage.acknowledged(key, &upload_id).await.unwrap().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].part_number, 1);
    assert_eq!(parts[0].size, part.size);

    let gone = storage.acknowledged(key, "no-such-upload").await.unwrap();
    assert!(gone.is_none());
}
