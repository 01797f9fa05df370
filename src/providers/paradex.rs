// src/providers/paradex.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{now_ms, VenueError, VenueFetcher, VenueHttp};
use crate::funding::indexed_sample;
use crate::metrics;
use crate::types::{Exchange, IndexedRaw, MinuteSample, PremiumRaw, RawSample};

const FUNDING_DATA: &str = "/v1/funding/data";

#[derive(Debug, Deserialize)]
struct Summary {
    results: Vec<MarketSummary>,
}

#[derive(Debug, Deserialize)]
struct MarketSummary {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    funding_rate: Value,
    #[serde(default)]
    mark_price: Option<Value>,
    #[serde(default)]
    underlying_price: Option<Value>,
    #[serde(default)]
    last_traded_price: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FundingDataPage {
    results: Vec<FundingPoint>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FundingPoint {
    /// unix seconds
    created_at: i64,
    #[serde(default)]
    market: String,
    #[serde(default)]
    funding_rate: Value,
    #[serde(default)]
    funding_premium: Value,
    #[serde(default)]
    funding_index: Value,
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Market summaries for every perpetual; one request per tick.
pub struct Paradex {
    http: VenueHttp,
}

impl Paradex {
    pub fn new(http: VenueHttp) -> Self {
        Self { http }
    }

    /// Published funding points for `market` in `[start_ms, end_ms]`,
    /// following the `next` cursor until the venue stops returning one.
    ///
    /// Each point carries the venue's own cumulative index, so no
    /// integration is needed. Unparsable points are skipped.
    pub async fn fetch_funding_data(&self, market: &str, start_ms: i64, end_ms: i64) -> Result<Vec<MinuteSample>, VenueError> {
        let base = [
            ("market", market.to_string()),
            ("start_at", start_ms.div_euclid(1000).to_string()),
            ("end_at", end_ms.div_euclid(1000).to_string()),
        ];
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let mut query = base.to_vec();
            if let Some(next) = cursor.take() {
                self.http.pace().await;
                query.push(("next", next));
            }
            let page: FundingDataPage = self.http.get_json(FUNDING_DATA, &query).await?;
            pages += 1;
            for p in page.results {
                let raw = IndexedRaw {
                    market: if p.market.is_empty() { market.to_string() } else { p.market },
                    funding_rate: p.funding_rate,
                    funding_premium: p.funding_premium,
                    funding_index: p.funding_index,
                    collected_at: p.created_at * 1000,
                };
                match indexed_sample(&raw) {
                    Ok(sample) => out.push(sample),
                    Err(e) => {
                        tracing::warn!(exchange = %Exchange::Paradex, error = %e, "skipping funding point");
                        metrics::parse_error(Exchange::Paradex);
                    }
                }
            }
            match page.next.filter(|n| !n.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(exchange = %Exchange::Paradex, %market, pages, points = out.len(), "funding data fetched");
        Ok(out)
    }
}

#[async_trait]
impl VenueFetcher for Paradex {
    fn exchange(&self) -> Exchange {
        Exchange::Paradex
    }

    async fn fetch_current(&self) -> Result<Vec<RawSample>, VenueError> {
        let summary: Summary = self.http.get_json("/v1/markets/summary", &[("market", "ALL".into())]).await?;
        let collected_at = now_ms();
        Ok(summary
            .results
            .into_iter()
            .filter(|m| m.symbol.ends_with("-PERP") && !is_blank(&m.funding_rate))
            .map(|m| {
                RawSample::Premium(PremiumRaw {
                    market: m.symbol,
                    funding_rate: m.funding_rate,
                    mark_price: m.mark_price,
                    underlying_price: m.underlying_price,
                    last_traded_price: m.last_traded_price,
                    collected_at,
                })
            })
            .collect())
    }
}
