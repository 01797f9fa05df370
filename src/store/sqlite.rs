// src/store/sqlite.rs
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::{FundingStore, StoreError};
use crate::metrics;
use crate::types::{
    CanonicalRate, Exchange, HourlyAggregate, IndexPoint, MinuteSample, RawSample,
};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---- row mapping ----

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RateRow {
    pub exchange: String,
    pub symbol: String,
    pub trading_pair: String,
    pub funding_rate: f64,
    pub collected_at: i64,
}

impl TryFrom<RateRow> for CanonicalRate {
    type Error = StoreError;

    // Percent and annualized columns are re-derived, never trusted from the row.
    fn try_from(r: RateRow) -> Result<Self, Self::Error> {
        let exchange = Exchange::from_str(&r.exchange).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(CanonicalRate::new(exchange, r.symbol, r.trading_pair, r.funding_rate, r.collected_at))
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MinuteRow {
    pub symbol: String,
    pub base_asset: String,
    pub funding_rate: f64,
    pub funding_premium: f64,
    pub funding_index: f64,
    pub mark_price: f64,
    pub underlying_price: Option<f64>,
    pub collected_at: i64,
}

impl From<MinuteRow> for MinuteSample {
    fn from(r: MinuteRow) -> Self {
        MinuteSample {
            symbol: r.symbol,
            base_asset: r.base_asset,
            funding_rate: r.funding_rate,
            funding_premium: r.funding_premium,
            cumulative_index: r.funding_index,
            mark_price: r.mark_price,
            underlying_price: r.underlying_price,
            collected_at: r.collected_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HourlyRow {
    pub symbol: String,
    pub base_asset: String,
    pub hour_timestamp: i64,
    pub avg_funding_rate: f64,
    pub avg_funding_premium: f64,
    pub avg_mark_price: f64,
    pub avg_underlying_price: Option<f64>,
    pub funding_index_start: f64,
    pub funding_index_end: f64,
    pub funding_index_delta: f64,
    pub sample_count: i64,
}

impl From<HourlyRow> for HourlyAggregate {
    fn from(r: HourlyRow) -> Self {
        HourlyAggregate {
            symbol: r.symbol,
            base_asset: r.base_asset,
            hour_timestamp: r.hour_timestamp,
            avg_funding_rate: r.avg_funding_rate,
            avg_funding_premium: r.avg_funding_premium,
            avg_mark_price: r.avg_mark_price,
            avg_underlying_price: r.avg_underlying_price,
            index_start: r.funding_index_start,
            index_end: r.funding_index_end,
            index_delta: r.funding_index_delta,
            sample_count: r.sample_count.clamp(0, u32::MAX as i64) as u32,
        }
    }
}

#[async_trait]
impl FundingStore for SqliteStore {
    async fn append_rates(&self, rates: &[CanonicalRate]) -> Result<u64, StoreError> {
        if rates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for r in rates {
            sqlx::query(
                r#"
                INSERT INTO unified_funding_rates (
                    exchange, symbol, trading_pair, funding_rate,
                    funding_rate_percent, annualized_rate, collected_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(r.exchange().as_str())
            .bind(r.symbol())
            .bind(r.trading_pair())
            .bind(r.funding_rate_decimal())
            .bind(r.funding_rate_percent())
            .bind(r.annualized_rate_percent())
            .bind(r.collected_at())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        let n = rates.len() as u64;
        metrics::rows_written("rate", n);
        tracing::debug!(rows = n, "stored canonical rates");
        Ok(n)
    }

    async fn append_originals(&self, exchange: Exchange, raws: &[RawSample]) -> Result<u64, StoreError> {
        if raws.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for raw in raws {
            let payload = serde_json::to_string(raw)?;
            sqlx::query(
                "INSERT INTO original_funding_records (exchange, trading_pair, payload, collected_at) VALUES (?, ?, ?, ?)",
            )
            .bind(exchange.as_str())
            .bind(raw.trading_pair())
            .bind(payload)
            .bind(raw.collected_at())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        let n = raws.len() as u64;
        metrics::rows_written("original", n);
        Ok(n)
    }

    async fn insert_minute_sample(&self, s: &MinuteSample) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO minute_samples (
                symbol, base_asset, funding_rate, funding_premium, funding_index,
                mark_price, underlying_price, collected_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&s.symbol)
        .bind(&s.base_asset)
        .bind(s.funding_rate)
        .bind(s.funding_premium)
        .bind(s.cumulative_index)
        .bind(s.mark_price)
        .bind(s.underlying_price)
        .bind(s.collected_at)
        .execute(&self.pool)
        .await?;
        metrics::rows_written("minute", 1);
        Ok(())
    }

    async fn latest_index_points(&self) -> Result<HashMap<String, IndexPoint>, StoreError> {
        // Per-symbol MAX rides idx_minute_symbol_time; ties at the same
        // timestamp resolve to the highest id because later rows overwrite.
        let rows: Vec<(String, f64, i64)> = sqlx::query_as(
            r#"
            SELECT m.symbol, m.funding_index, m.collected_at
            FROM minute_samples m
            JOIN (
                SELECT symbol, MAX(collected_at) AS collected_at
                FROM minute_samples
                GROUP BY symbol
            ) latest ON latest.symbol = m.symbol AND latest.collected_at = m.collected_at
            ORDER BY m.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(symbol, index, ts_ms)| (symbol, IndexPoint { index, ts_ms }))
            .collect())
    }

    async fn minute_samples_between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<MinuteSample>, StoreError> {
        let rows: Vec<MinuteRow> = sqlx::query_as(
            r#"
            SELECT symbol, base_asset, funding_rate, funding_premium, funding_index,
                   mark_price, underlying_price, collected_at
            FROM minute_samples
            WHERE collected_at >= ? AND collected_at < ?
            ORDER BY symbol, collected_at, id
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MinuteSample::from).collect())
    }

    async fn upsert_hourly(&self, rows: &[HourlyAggregate]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for h in rows {
            sqlx::query(
                r#"
                INSERT INTO hourly_aggregates (
                    symbol, base_asset, hour_timestamp,
                    avg_funding_rate, avg_funding_premium, avg_mark_price, avg_underlying_price,
                    funding_index_start, funding_index_end, funding_index_delta,
                    sample_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, hour_timestamp) DO UPDATE SET
                    base_asset = excluded.base_asset,
                    avg_funding_rate = excluded.avg_funding_rate,
                    avg_funding_premium = excluded.avg_funding_premium,
                    avg_mark_price = excluded.avg_mark_price,
                    avg_underlying_price = excluded.avg_underlying_price,
                    funding_index_start = excluded.funding_index_start,
                    funding_index_end = excluded.funding_index_end,
                    funding_index_delta = excluded.funding_index_delta,
                    sample_count = excluded.sample_count
                "#,
            )
            .bind(&h.symbol)
            .bind(&h.base_asset)
            .bind(h.hour_timestamp)
            .bind(h.avg_funding_rate)
            .bind(h.avg_funding_premium)
            .bind(h.avg_mark_price)
            .bind(h.avg_underlying_price)
            .bind(h.index_start)
            .bind(h.index_end)
            .bind(h.index_delta)
            .bind(h.sample_count as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        let n = rows.len() as u64;
        metrics::rows_written("hourly", n);
        Ok(n)
    }
}
