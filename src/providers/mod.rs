// src/providers/mod.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CollectorConfig;
use crate::types::{Exchange, RawSample};

pub mod fapi;
pub mod hyperliquid;
pub mod lighter;
pub mod paradex;

pub use fapi::{FapiVenue, SymbolFilter};
pub use hyperliquid::Hyperliquid;
pub use lighter::Lighter;
pub use paradex::Paradex;

#[derive(thiserror::Error, Debug)]
pub enum VenueError {
    #[error("{exchange}: HTTP {status} from {url}")]
    Status { exchange: Exchange, status: u16, url: String },
    #[error("{exchange}: malformed response: {reason}")]
    Envelope { exchange: Exchange, reason: String },
    #[error("{exchange}: transport error: {source}")]
    Http {
        exchange: Exchange,
        #[source]
        source: reqwest::Error,
    },
    #[error("{exchange}: no response within {after:?}")]
    Timeout { exchange: Exchange, after: Duration },
}

impl VenueError {
    pub fn exchange(&self) -> Exchange {
        match self {
            VenueError::Status { exchange, .. }
            | VenueError::Envelope { exchange, .. }
            | VenueError::Http { exchange, .. }
            | VenueError::Timeout { exchange, .. } => *exchange,
        }
    }

    /// Worth another attempt: throttling, server-side failures, dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            VenueError::Status { status, .. } => *status == 429 || *status >= 500,
            VenueError::Http { source, .. } => source.is_timeout() || source.is_connect() || source.is_request(),
            VenueError::Envelope { .. } | VenueError::Timeout { .. } => false,
        }
    }
}

/// One venue's current-rate endpoint, returning raw venue-shaped samples.
#[async_trait]
pub trait VenueFetcher: Send + Sync {
    fn exchange(&self) -> Exchange;
    async fn fetch_current(&self) -> Result<Vec<RawSample>, VenueError>;
}

/// JSON-over-HTTP access to one venue: base URL, request pacing, retries.
#[derive(Debug, Clone)]
pub struct VenueHttp {
    exchange: Exchange,
    client: reqwest::Client,
    base_url: String,
    pacing: Duration,
}

impl VenueHttp {
    pub fn new(exchange: Exchange, client: reqwest::Client, base_url: impl Into<String>, pacing: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { exchange, client, base_url, pacing }
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Wait out the pacing interval before the next sequential request.
    pub async fn pace(&self) {
        tokio::time::sleep(self.pacing).await;
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, VenueError> {
        let url = self.url(path);
        let url = url.as_str();
        let attempt = || async move {
            let resp = self.client.get(url).query(query).send().await.map_err(|e| self.http_err(e))?;
            self.decode(url, resp).await
        };
        attempt
            .retry(backoff())
            .when(|e: &VenueError| e.is_transient())
            .notify(|e: &VenueError, wait: Duration| {
                tracing::debug!(exchange = %self.exchange, error = %e, ?wait, "retrying venue request");
            })
            .await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, VenueError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let url = url.as_str();
        let attempt = || async move {
            let resp = self.client.post(url).json(body).send().await.map_err(|e| self.http_err(e))?;
            self.decode(url, resp).await
        };
        attempt
            .retry(backoff())
            .when(|e: &VenueError| e.is_transient())
            .notify(|e: &VenueError, wait: Duration| {
                tracing::debug!(exchange = %self.exchange, error = %e, ?wait, "retrying venue request");
            })
            .await
    }

    async fn decode<T: DeserializeOwned>(&self, url: &str, resp: reqwest::Response) -> Result<T, VenueError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(VenueError::Status { exchange: self.exchange, status: status.as_u16(), url: url.to_string() });
        }
        let body = resp.bytes().await.map_err(|e| self.http_err(e))?;
        serde_json::from_slice(&body).map_err(|e| VenueError::Envelope { exchange: self.exchange, reason: e.to_string() })
    }

    fn http_err(&self, source: reqwest::Error) -> VenueError {
        VenueError::Http { exchange: self.exchange, source }
    }
}

fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(2)
}

pub fn http_client(cfg: &CollectorConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(cfg.request_timeout())
        .user_agent(concat!("funding-collector/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub fn venue_http(cfg: &CollectorConfig, client: &reqwest::Client, exchange: Exchange) -> VenueHttp {
    VenueHttp::new(exchange, client.clone(), cfg.endpoints.base_url(exchange), cfg.pacing())
}

pub fn fetcher_for(cfg: &CollectorConfig, client: &reqwest::Client, exchange: Exchange) -> Arc<dyn VenueFetcher> {
    let http = venue_http(cfg, client, exchange);
    match exchange {
        Exchange::Hyperliquid => Arc::new(Hyperliquid::new(http)),
        Exchange::Lighter => Arc::new(Lighter::new(http)),
        Exchange::Binance => Arc::new(FapiVenue::new(http, SymbolFilter::Only(cfg.binance_symbols.clone()))),
        Exchange::Aster => Arc::new(FapiVenue::new(http, SymbolFilter::QuoteSuffix("USDT".into()))),
        Exchange::Paradex => Arc::new(Paradex::new(http)),
    }
}

/// Fetchers for every configured venue, sharing one connection pool.
pub fn build_fetchers(cfg: &CollectorConfig, venues: &[Exchange]) -> reqwest::Result<Vec<Arc<dyn VenueFetcher>>> {
    let client = http_client(cfg)?;
    Ok(venues.iter().map(|&ex| fetcher_for(cfg, &client, ex)).collect())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}


#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/x");
                then.status(404);
            })
            .await;
        let http = testutil::http(Exchange::Binance, &server.base_url());
        let err = http.get_json::<serde_json::Value>("/x", &[]).await.unwrap_err();
        assert!(matches!(err, VenueError::Status { status: 404, .. }));
        assert!(!err.is_transient());
        m.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/x");
                then.status(503);
            })
            .await;
        let http = testutil::http(Exchange::Aster, &server.base_url());
        let err = http.get_json::<serde_json::Value>("/x", &[]).await.unwrap_err();
        assert_eq!(err.exchange(), Exchange::Aster);
        m.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn malformed_body_is_an_envelope_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/x");
                then.status(200).body("not json");
            })
            .await;
        let http = testutil::http(Exchange::Lighter, &server.base_url());
        let err = http.get_json::<serde_json::Value>("/x", &[]).await.unwrap_err();
        assert!(matches!(err, VenueError::Envelope { exchange: Exchange::Lighter, .. }));
    }
}
