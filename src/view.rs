// src/view.rs
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};

use crate::store::sqlite::{HourlyRow, RateRow};
use crate::store::{SqliteStore, StoreError};
use crate::types::{CanonicalRate, Exchange, HourlyAggregate};

pub const MAX_LIMIT: i64 = 10_000;

const RATE_COLUMNS: &str = "exchange, symbol, trading_pair, funding_rate, collected_at";

#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub start_ms: i64,
    pub end_ms: i64,
    pub exchange: Option<Exchange>,
    pub symbol: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStats {
    pub exchange: String,
    pub records: i64,
    pub symbols: i64,
    pub oldest: Option<i64>,
    pub latest: Option<i64>,
}

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn into_rates(rows: Vec<RateRow>) -> Result<Vec<CanonicalRate>, StoreError> {
    rows.into_iter().map(CanonicalRate::try_from).collect()
}

/// Read-side queries. Missing data yields empty vectors, never an error.
#[derive(Debug, Clone)]
pub struct RateView {
    store: SqliteStore,
}

impl RateView {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Newest rate for `symbol` from each exchange, one row per exchange,
    /// each exchange with its own freshness.
    pub async fn latest_per_exchange(&self, symbol: &str) -> Result<Vec<CanonicalRate>, StoreError> {
        let rows: Vec<RateRow> = sqlx::query_as(&format!(
            r#"
            SELECT {cols} FROM (
                SELECT id, {cols},
                       ROW_NUMBER() OVER (
                           PARTITION BY exchange ORDER BY collected_at DESC, id DESC
                       ) AS rn
                FROM unified_funding_rates
                WHERE symbol = ?
            )
            WHERE rn = 1
            ORDER BY exchange
            "#,
            cols = RATE_COLUMNS
        ))
        .bind(symbol)
        .fetch_all(self.store.pool())
        .await?;
        into_rates(rows)
    }

    /// Newest rate per `(exchange, symbol)`, optionally for one exchange.
    pub async fn latest_per_exchange_symbol(&self, exchange: Option<Exchange>) -> Result<Vec<CanonicalRate>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {cols} FROM ( \
                SELECT id, {cols}, \
                       ROW_NUMBER() OVER (PARTITION BY exchange, symbol ORDER BY collected_at DESC, id DESC) AS rn \
                FROM unified_funding_rates",
            cols = RATE_COLUMNS
        ));
        if let Some(ex) = exchange {
            qb.push(" WHERE exchange = ").push_bind(ex.as_str());
        }
        qb.push(") WHERE rn = 1 ORDER BY exchange, symbol");
        let rows: Vec<RateRow> = qb.build_query_as().fetch_all(self.store.pool()).await?;
        into_rates(rows)
    }

    /// Rates with `start <= collected_at < end`, newest first.
    pub async fn rates_between(&self, q: &RangeQuery) -> Result<Vec<CanonicalRate>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {cols} FROM unified_funding_rates WHERE collected_at >= ",
            cols = RATE_COLUMNS
        ));
        qb.push_bind(q.start_ms).push(" AND collected_at < ").push_bind(q.end_ms);
        if let Some(ex) = q.exchange {
            qb.push(" AND exchange = ").push_bind(ex.as_str());
        }
        if let Some(sym) = &q.symbol {
            qb.push(" AND symbol = ").push_bind(sym.clone());
        }
        qb.push(" ORDER BY collected_at DESC, id DESC LIMIT ").push_bind(clamp_limit(q.limit, 1000));
        let rows: Vec<RateRow> = qb.build_query_as().fetch_all(self.store.pool()).await?;
        into_rates(rows)
    }

    /// Most recent rows with optional filters.
    pub async fn recent(
        &self,
        exchange: Option<Exchange>,
        symbol: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<CanonicalRate>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {cols} FROM unified_funding_rates WHERE 1=1",
            cols = RATE_COLUMNS
        ));
        if let Some(ex) = exchange {
            qb.push(" AND exchange = ").push_bind(ex.as_str());
        }
        if let Some(sym) = symbol {
            qb.push(" AND symbol = ").push_bind(sym.to_string());
        }
        qb.push(" ORDER BY collected_at DESC, id DESC LIMIT ").push_bind(clamp_limit(limit, 100));
        let rows: Vec<RateRow> = qb.build_query_as().fetch_all(self.store.pool()).await?;
        into_rates(rows)
    }

    /// Hourly aggregates with `start <= hour_timestamp < end`, oldest first.
    pub async fn hourly_between(
        &self,
        symbol: Option<&str>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<HourlyAggregate>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT symbol, base_asset, hour_timestamp, avg_funding_rate, avg_funding_premium, \
                    avg_mark_price, avg_underlying_price, funding_index_start, funding_index_end, \
                    funding_index_delta, sample_count \
             FROM hourly_aggregates WHERE hour_timestamp >= ",
        );
        qb.push_bind(start_ms).push(" AND hour_timestamp < ").push_bind(end_ms);
        if let Some(sym) = symbol {
            // Accept either the market name or its base asset.
            qb.push(" AND (symbol = ").push_bind(sym.to_string());
            qb.push(" OR base_asset = ").push_bind(sym.to_string()).push(")");
        }
        qb.push(" ORDER BY hour_timestamp, symbol");
        let rows: Vec<HourlyRow> = qb.build_query_as().fetch_all(self.store.pool()).await?;
        Ok(rows.into_iter().map(HourlyAggregate::from).collect())
    }

    pub async fn stats(&self) -> Result<Vec<ExchangeStats>, StoreError> {
        let rows = sqlx::query_as::<_, ExchangeStats>(
            r#"
            SELECT exchange,
                   COUNT(*)               AS records,
                   COUNT(DISTINCT symbol) AS symbols,
                   MIN(collected_at)      AS oldest,
                   MAX(collected_at)      AS latest
            FROM unified_funding_rates
            GROUP BY exchange
            ORDER BY exchange
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }
}
