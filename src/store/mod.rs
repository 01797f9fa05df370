// src/store/mod.rs
use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::{CanonicalRate, Exchange, HourlyAggregate, IndexPoint, MinuteSample, RawSample};

pub mod sqlite;

pub use sqlite::SqliteStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("decode: {0}")]
    Decode(String),
}

/// Write and lookup operations the collection core needs from persistence.
#[async_trait]
pub trait FundingStore: Send + Sync + 'static {
    /// Append canonical rates in one transaction. Returns rows written.
    async fn append_rates(&self, rates: &[CanonicalRate]) -> Result<u64, StoreError>;

    /// Audit copy of the raw payloads a venue returned.
    async fn append_originals(&self, exchange: Exchange, raws: &[RawSample]) -> Result<u64, StoreError>;

    /// Single-row insert so one failing symbol cannot block the others.
    async fn insert_minute_sample(&self, sample: &MinuteSample) -> Result<(), StoreError>;

    /// Most recent `(index, ts)` per symbol.
    async fn latest_index_points(&self) -> Result<HashMap<String, IndexPoint>, StoreError>;

    /// Samples with `start_ms <= collected_at < end_ms`, ordered by symbol then time.
    async fn minute_samples_between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<MinuteSample>, StoreError>;

    /// Upsert keyed by `(symbol, hour_timestamp)`; derived columns are overwritten.
    async fn upsert_hourly(&self, rows: &[HourlyAggregate]) -> Result<u64, StoreError>;
}
