//! Change-aware persistence of normalized products
//!
//! For each batch the engine reads back only `(id, change_timestamp)` of the
//! rows it might touch, then splits the batch:
//!
//! - unknown id: bulk inserted in one statement
//! - stored row older than the incoming watermark: updated row by row
//! - anything else: skipped
//!
//! A failed bulk insert costs the whole insert portion; a failed update costs
//! only that record. Records without an id are never written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::transform::NormalizedProduct;

/// Rows per `IN (...)` lookup and per multi-row `INSERT`; keeps the bind count
/// well under the Postgres limit of 65535.
const STATEMENT_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),
}

/// What the engine reads back before deciding
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredProductSummary {
    pub id: String,
    pub change_timestamp: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn fetch_summaries(
        &self,
        ids: &[&str],
    ) -> Result<Vec<StoredProductSummary>, PersistenceError>;

    /// Insert all rows or none
    async fn insert_many(&self, products: &[&NormalizedProduct]) -> Result<u64, PersistenceError>;

    /// Overwrite one row if its stored watermark is still older than the
    /// product's. Returns whether a row was written.
    async fn update_one(&self, product: &NormalizedProduct) -> Result<bool, PersistenceError>;
}

#[async_trait]
impl<T: ProductStore + ?Sized> ProductStore for Arc<T> {
    async fn fetch_summaries(
        &self,
        ids: &[&str],
    ) -> Result<Vec<StoredProductSummary>, PersistenceError> {
        (**self).fetch_summaries(ids).await
    }

    async fn insert_many(&self, products: &[&NormalizedProduct]) -> Result<u64, PersistenceError> {
        (**self).insert_many(products).await
    }

    async fn update_one(&self, product: &NormalizedProduct) -> Result<bool, PersistenceError> {
        (**self).update_one(product).await
    }
}

/// Per-batch counts. They always add up to the batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Decision for the valid part of a batch, as indexes into it
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpsertPlan {
    pub to_insert: Vec<usize>,
    pub to_update: Vec<usize>,
    pub skipped: Vec<usize>,
}

/// Strictly newer, with a missing timestamp ordered before every real one.
pub fn is_newer(incoming: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (incoming, stored) {
        (Some(incoming), Some(stored)) => incoming > stored,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Split `products` against what the store holds.
///
/// Products with no id are left out of every list. A repeated id is compared
/// against its earlier occurrence in the batch, so one batch never inserts the
/// same id twice.
pub fn plan(products: &[NormalizedProduct], stored: &[StoredProductSummary]) -> UpsertPlan {
    let mut known: HashMap<&str, Option<DateTime<Utc>>> = stored
        .iter()
        .map(|s| (s.id.as_str(), s.change_timestamp))
        .collect();
    let mut plan = UpsertPlan::default();

    for (index, product) in products.iter().enumerate() {
        let Some(id) = product.id.as_deref() else {
            continue;
        };

        match known.get(id) {
            None => plan.to_insert.push(index),
            Some(watermark) if is_newer(product.change_timestamp, *watermark) => {
                plan.to_update.push(index)
            }
            Some(_) => {
                plan.skipped.push(index);
                continue;
            }
        }
        known.insert(id, product.change_timestamp);
    }

    plan
}

pub struct UpsertEngine<S> {
    store: S,
}

impl<S: ProductStore> UpsertEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one batch.
    ///
    /// `Err` means the summary lookup failed and nothing was written; the
    /// caller decides how to count that batch.
    pub async fn apply(&self, batch: &[NormalizedProduct]) -> Result<UpsertOutcome, PersistenceError> {
        let mut outcome = UpsertOutcome::default();

        let ids: Vec<&str> = batch.iter().filter_map(|p| p.id.as_deref()).collect();
        let invalid = (batch.len() - ids.len()) as u64;
        if invalid > 0 {
            warn!(invalid, "Products without an id in batch");
            outcome.errors += invalid;
        }
        if ids.is_empty() {
            return Ok(outcome);
        }

        let stored = self.store.fetch_summaries(&ids).await?;
        let plan = plan(batch, &stored);
        outcome.skipped = plan.skipped.len() as u64;

        debug!(
            to_insert = plan.to_insert.len(),
            to_update = plan.to_update.len(),
            skipped = plan.skipped.len(),
            "Upsert plan"
        );

        if !plan.to_insert.is_empty() {
            let rows: Vec<&NormalizedProduct> = plan.to_insert.iter().map(|&i| &batch[i]).collect();
            match self.store.insert_many(&rows).await {
                Ok(_) => outcome.inserted += rows.len() as u64,
                Err(e) => {
                    error!(error = %e, rows = rows.len(), "Bulk insert failed");
                    outcome.errors += rows.len() as u64;
                }
            }
        }

        for &index in &plan.to_update {
            let product = &batch[index];
            match self.store.update_one(product).await {
                Ok(true) => outcome.updated += 1,
                // Someone wrote a newer version between lookup and update
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    error!(error = %e, id = ?product.id, "Update failed");
                    outcome.errors += 1;
                }
            }
        }

        Ok(outcome)
    }
}

/// Postgres implementation over the `products` table
#[derive(Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn fetch_summaries(
        &self,
        ids: &[&str],
    ) -> Result<Vec<StoredProductSummary>, PersistenceError> {
        let mut summaries = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(STATEMENT_ROWS) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("SELECT id, change_timestamp FROM products WHERE id IN (");
            let mut separated = query_builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = query_builder
                .build_query_as::<StoredProductSummary>()
                .fetch_all(&self.pool)
                .await?;
            summaries.extend(rows);
        }

        Ok(summaries)
    }

    async fn insert_many(&self, products: &[&NormalizedProduct]) -> Result<u64, PersistenceError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in products.chunks(STATEMENT_ROWS) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO products (
                    id, name, status, organization, brand, price_cents,
                    ean_gtin13, ean_gtin14, artg_id, pbs_code, snomed_mpp, category_code,
                    created_at, change_timestamp, raw
                )
                "#,
            );

            query_builder.push_values(chunk.iter(), |mut b, p| {
                b.push_bind(p.id.as_deref())
                    .push_bind(&p.name)
                    .push_bind(p.status.as_deref())
                    .push_bind(p.organization.as_deref())
                    .push_bind(p.brand.as_deref())
                    .push_bind(p.price_cents)
                    .push_bind(p.ean_gtin13.as_deref())
                    .push_bind(p.ean_gtin14.as_deref())
                    .push_bind(p.artg_id.as_deref())
                    .push_bind(p.pbs_code.as_deref())
                    .push_bind(p.snomed_mpp.as_deref())
                    .push_bind(p.category_code.as_deref())
                    .push_bind(p.created_at)
                    .push_bind(p.change_timestamp)
                    .push_bind(sqlx::types::Json(&p.raw));
            });

            inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn update_one(&self, p: &NormalizedProduct) -> Result<bool, PersistenceError> {
        let Some(id) = p.id.as_deref() else {
            return Err(PersistenceError::Store("product has no id".to_string()));
        };

        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = $2, status = $3, organization = $4, brand = $5, price_cents = $6,
                ean_gtin13 = $7, ean_gtin14 = $8, artg_id = $9, pbs_code = $10,
                snomed_mpp = $11, category_code = $12, created_at = $13,
                change_timestamp = $14, raw = $15, updated_at = NOW()
            WHERE id = $1
              AND (change_timestamp IS NULL OR change_timestamp < $14)
            "#,
        )
        .bind(id)
        .bind(&p.name)
        .bind(p.status.as_deref())
        .bind(p.organization.as_deref())
        .bind(p.brand.as_deref())
        .bind(p.price_cents)
        .bind(p.ean_gtin13.as_deref())
        .bind(p.ean_gtin14.as_deref())
        .bind(p.artg_id.as_deref())
        .bind(p.pbs_code.as_deref())
        .bind(p.snomed_mpp.as_deref())
        .bind(p.category_code.as_deref())
        .bind(p.created_at)
        .bind(p.change_timestamp)
        .bind(sqlx::types::Json(&p.raw))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
