//! Decode, batch, normalize and upsert one window of the staged catalog
//!
//! Offsets count non-blank lines, not parsed records: a window starting at
//! `offset` skips that many lines without parsing them, so a malformed line
//! still occupies a position. The driver keeps no state between runs.

use async_trait::async_trait;
use futures::TryStreamExt;
use pimsync_common::types::PipelineStats;
use serde_json::Value;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{error, info, instrument};

use super::batch::RecordBatcher;
use super::ndjson::{parse_line, NdjsonCodec};
use super::transform::{normalize, NormalizedProduct};
use super::upsert::{ProductStore, UpsertEngine};

/// Where the staged catalog is read back from
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn open(&self, key: &str) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

pub struct PipelineDriver<S> {
    engine: UpsertEngine<S>,
    batch_size: usize,
}

impl<S: ProductStore> PipelineDriver<S> {
    pub fn new(store: S, batch_size: usize) -> Self {
        Self { engine: UpsertEngine::new(store), batch_size: batch_size.max(1) }
    }

    pub fn store(&self) -> &S {
        self.engine.store()
    }

    /// Process up to `limit` parsed records starting at line `offset`.
    /// `None` runs to the end of input.
    ///
    /// Only a read failure of `input` fails the run; everything else is
    /// counted in the returned stats.
    #[instrument(skip(self, input))]
    pub async fn run<R>(
        &self,
        input: R,
        offset: u64,
        limit: Option<u64>,
    ) -> std::io::Result<PipelineStats>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let mut frames = FramedRead::new(input, NdjsonCodec::new());
        let mut batcher = RecordBatcher::new(self.batch_size);
        let mut stats = PipelineStats::default();
        let mut line_number: u64 = 0;
        let mut records_processed: u64 = 0;
        let mut batches: u64 = 0;

        while let Some(line) = frames.try_next().await? {
            if line_number < offset {
                line_number += 1;
                continue;
            }
            if limit.is_some_and(|limit| records_processed >= limit) {
                break;
            }

            line_number += 1;
            match parse_line(&line, line_number) {
                Some(record) => {
                    records_processed += 1;
                    if let Some(batch) = batcher.push(record) {
                        batches += 1;
                        self.flush(batches, batch, &mut stats).await;
                    }
                }
                None => stats.errors += 1,
            }
        }

        if let Some(batch) = batcher.finish() {
            batches += 1;
            self.flush(batches, batch, &mut stats).await;
        }

        stats.duration = started.elapsed().as_millis() as u64;
        info!(
            total_records = stats.total_records,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            duration_ms = stats.duration,
            "Processing complete"
        );
        Ok(stats)
    }

    async fn flush(&self, batch_number: u64, batch: Vec<Value>, stats: &mut PipelineStats) {
        let size = batch.len() as u64;
        stats.total_records += size;

        let products: Vec<NormalizedProduct> = batch.iter().map(normalize).collect();
        match self.engine.apply(&products).await {
            Ok(outcome) => {
                stats.inserted += outcome.inserted;
                stats.updated += outcome.updated;
                stats.skipped += outcome.skipped;
                stats.errors += outcome.errors;
                info!(
                    batch = batch_number,
                    records = size,
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    skipped = outcome.skipped,
                    errors = outcome.errors,
                    "Batch applied"
                );
            }
            Err(e) => {
                error!(batch = batch_number, records = size, error = %e, "Batch failed");
                stats.errors += size;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::upsert::memory::MemoryStore;

    fn lines(ids: impl IntoIterator<Item = u32>) -> String {
        ids.into_iter()
            .map(|i| format!("{{\"meta\":{{\"updatedAt\":100}},\"result\":{{\"id\":\"P{}\"}}}}\n", i))
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_counts() {
        let driver = PipelineDriver::new(MemoryStore::default(), 2);
        let input = format!("{}\n  \n{{broken\n{}", lines(1..=3), lines(4..=4));

        let stats = driver.run(input.as_bytes(), 0, None).await.unwrap();

        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(driver.store().len(), 4);
    }

    #[tokio::test]
    async fn test_consecutive_windows_cover_input_once() {
        let driver = PipelineDriver::new(MemoryStore::default(), 2);
        let input = lines(1..=7);

        let mut offset = 0;
        let mut totals = Vec::new();
        loop {
            let stats = driver.run(input.as_bytes(), offset, Some(3)).await.unwrap();
            totals.push(stats.total_records);
            assert_eq!(stats.updated + stats.skipped, 0, "window at {} saw repeats", offset);
            offset += 3;
            if stats.total_records < 3 {
                break;
            }
        }

        assert_eq!(totals, vec![3, 3, 1]);
        assert_eq!(driver.store().len(), 7);
    }

    #[tokio::test]
    async fn test_lines_before_offset_are_not_parsed() {
        let driver = PipelineDriver::new(MemoryStore::default(), 10);
        let input = format!("{{broken\n\n{}", lines(1..=2));

        let stats = driver.run(input.as_bytes(), 1, None).await.unwrap();
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.total_records, 2);
    }

    #[tokio::test]
    async fn test_rerun_skips_unchanged_records() {
        let driver = PipelineDriver::new(MemoryStore::default(), 500);
        let input = lines(1..=5);

        driver.run(input.as_bytes(), 0, None).await.unwrap();
        let second = driver.run(input.as_bytes(), 0, None).await.unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 5);
    }

    #[tokio::test]
    async fn test_failed_lookup_counts_whole_batch() {
        let driver = PipelineDriver::new(MemoryStore { fail_lookup: true, ..Default::default() }, 2);
        let input = lines(1..=3);

        let stats = driver.run(input.as_bytes(), 0, None).await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn test_zero_limit_reads_nothing() {
        let driver = PipelineDriver::new(MemoryStore::default(), 2);
        let stats = driver.run(lines(1..=3).as_bytes(), 0, Some(0)).await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(driver.store().len(), 0);
    }
}
