// src/providers/lighter.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{VenueError, VenueFetcher, VenueHttp};
use crate::types::{DirectionalRaw, Exchange, RawSample};

/// Lookback for the latest hourly funding entry.
const LOOKBACK_SECS: i64 = 7200;

#[derive(Debug, Deserialize)]
struct OrderBooks {
    order_books: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct Market {
    market_id: u32,
    symbol: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Fundings {
    #[serde(default)]
    fundings: Vec<FundingEntry>,
}

#[derive(Debug, Deserialize)]
struct FundingEntry {
    timestamp: i64,
    rate: Value,
    #[serde(default)]
    direction: String,
}

pub struct Lighter {
    http: VenueHttp,
}

impl Lighter {
    pub fn new(http: VenueHttp) -> Self {
        Self { http }
    }

    async fn markets(&self) -> Result<Vec<Market>, VenueError> {
        let books: OrderBooks = self.http.get_json("/api/v1/orderBooks", &[]).await?;
        Ok(books.order_books)
    }

    /// Hourly entries for `market` between two unix-second bounds, oldest first.
    async fn fundings(&self, market: &Market, start_secs: i64, end_secs: i64) -> Result<Vec<FundingEntry>, VenueError> {
        let fundings: Fundings = self
            .http
            .get_json(
                "/api/v1/fundings",
                &[
                    ("market_id", market.market_id.to_string()),
                    ("resolution", "1h".into()),
                    ("start_timestamp", start_secs.to_string()),
                    ("end_timestamp", end_secs.to_string()),
                    ("count_back", "0".into()),
                ],
            )
            .await?;
        Ok(fundings.fundings)
    }

    /// Every hourly entry for `symbol` in `[start_ms, end_ms]`.
    pub async fn fetch_history(&self, symbol: &str, start_ms: i64, end_ms: i64) -> Result<Vec<RawSample>, VenueError> {
        let market = self
            .markets()
            .await?
            .into_iter()
            .find(|m| m.symbol == symbol)
            .ok_or_else(|| VenueError::Envelope { exchange: Exchange::Lighter, reason: format!("no market {symbol}") })?;
        self.http.pace().await;
        let entries = self.fundings(&market, start_ms.div_euclid(1000), end_ms.div_euclid(1000)).await?;
        tracing::info!(exchange = %Exchange::Lighter, %symbol, rows = entries.len(), "history fetched");
        Ok(entries.into_iter().map(|f| market.sample(f)).collect())
    }
}

impl Market {
    fn sample(&self, f: FundingEntry) -> RawSample {
        RawSample::Directional(DirectionalRaw {
            market_id: self.market_id,
            symbol: self.symbol.clone(),
            rate: f.rate,
            direction: f.direction,
            timestamp: f.timestamp,
        })
    }
}

#[async_trait]
impl VenueFetcher for Lighter {
    fn exchange(&self) -> Exchange {
        Exchange::Lighter
    }

    async fn fetch_current(&self) -> Result<Vec<RawSample>, VenueError> {
        let markets: Vec<Market> = self.markets().await?.into_iter().filter(|m| m.status == "active").collect();
        let now_secs = chrono::Utc::now().timestamp();

        let mut out = Vec::with_capacity(markets.len());
        for market in &markets {
            self.http.pace().await;
            match self.fundings(market, now_secs - LOOKBACK_SECS, now_secs).await.map(|f| f.into_iter().last()) {
                Ok(Some(f)) => out.push(market.sample(f)),
                Ok(None) => tracing::debug!(symbol = %market.symbol, "no recent funding entry"),
                Err(e) => tracing::warn!(symbol = %market.symbol, error = %e, "skipping market"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funding::normalize_batch;
    use crate::providers::testutil;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn takes_newest_entry_of_active_markets() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/orderBooks");
                then.status(200).json_body(json!({
                    "order_books": [
                        { "market_id": 1, "symbol": "ETH", "status": "active" },
                        { "market_id": 7, "symbol": "OLD", "status": "inactive" }
                    ]
                }));
            })
            .await;
        let fundings = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/fundings")
                    .query_param("market_id", "1")
                    .query_param("resolution", "1h");
                then.status(200).json_body(json!({
                    "fundings": [
                        { "timestamp": 1700000000, "rate": "0.0008", "direction": "long" },
                        { "timestamp": 1700003600, "rate": "0.0012", "direction": "short" }
                    ]
                }));
            })
            .await;

        let venue = Lighter::new(testutil::http(Exchange::Lighter, &server.base_url()));
        let raws = venue.fetch_current().await.unwrap();
        fundings.assert_hits_async(1).await;
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].collected_at(), 1_700_003_600_000);

        let batch = normalize_batch(Exchange::Lighter, &raws);
        let eth = &batch.rates[0];
        assert!((eth.funding_rate_decimal() + 0.000012).abs() < 1e-15);
        assert!((eth.funding_rate_percent() + 0.0012).abs() < 1e-12);
        assert!((eth.annualized_rate_percent() + 10.512).abs() < 1e-9);
    }

    #[tokio::test]
    async fn market_without_entries_is_omitted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/orderBooks");
                then.status(200).json_body(json!({
                    "order_books": [{ "market_id": 2, "symbol": "BTC", "status": "active" }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/fundings");
                then.status(200).json_body(json!({ "fundings": [] }));
            })
            .await;

        let venue = Lighter::new(testutil::http(Exchange::Lighter, &server.base_url()));
        assert!(venue.fetch_current().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_keeps_every_entry_with_its_direction() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/orderBooks");
                then.status(200).json_body(json!({
                    "order_books": [
                        { "market_id": 0, "symbol": "ETH", "status": "active" },
                        { "market_id": 1, "symbol": "BTC", "status": "active" }
                    ]
                }));
            })
            .await;
        let fundings = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/fundings")
                    .query_param("market_id", "1")
                    .query_param("start_timestamp", "1700000000")
                    .query_param("end_timestamp", "1700010800")
                    .query_param("resolution", "1h")
                    .query_param("count_back", "0");
                then.status(200).json_body(json!({
                    "fundings": [
                        { "timestamp": 1700000000, "rate": "0.0008", "direction": "long" },
                        { "timestamp": 1700003600, "rate": "0.0012", "direction": "short" },
                        { "timestamp": 1700007200, "rate": 0.0004, "direction": "Long" }
                    ]
                }));
            })
            .await;

        let venue = Lighter::new(testutil::http(Exchange::Lighter, &server.base_url()));
        let raws = venue.fetch_history("BTC", 1_700_000_000_000, 1_700_010_800_000).await.unwrap();
        fundings.assert_async().await;
        assert_eq!(raws.len(), 3);

        let batch = normalize_batch(Exchange::Lighter, &raws);
        assert!(batch.skipped.is_empty());
        let decimals: Vec<_> = batch.rates.iter().map(|r| r.funding_rate_decimal()).collect();
        for (got, want) in decimals.iter().zip([0.000008, -0.000012, 0.000004]) {
            assert!((got - want).abs() < 1e-15, "{got} vs {want}");
        }
        assert_eq!(batch.rates[1].collected_at(), 1_700_003_600_000);
    }

    #[tokio::test]
    async fn history_for_unknown_symbol_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/orderBooks");
                then.status(200).json_body(json!({ "order_books": [] }));
            })
            .await;
        let venue = Lighter::new(testutil::http(Exchange::Lighter, &server.base_url()));
        assert!(matches!(
            venue.fetch_history("DOGE", 0, 3_600_000).await,
            Err(VenueError::Envelope { exchange: Exchange::Lighter, .. })
        ));
    }

    #[tokio::test]
    async fn first_market_request_is_paced_after_order_books() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/orderBooks");
                then.status(200).json_body(json!({
                    "order_books": [{ "market_id": 2, "symbol": "BTC", "status": "active" }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/fundings");
                then.status(200).json_body(json!({ "fundings": [] }));
            })
            .await;

        let venue = Lighter::new(testutil::http(Exchange::Lighter, &server.base_url()));
        let started = std::time::Instant::now();
        venue.fetch_current().await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    }
}
