// src/providers/fapi.rs
//! Binance-compatible USDⓈ-M futures API, shared by Binance and Aster.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{now_ms, VenueError, VenueFetcher, VenueHttp};
use crate::types::{DecimalRaw, Exchange, RawSample};

const EXCHANGE_INFO: &str = "/fapi/v1/exchangeInfo";
const FUNDING_RATE: &str = "/fapi/v1/fundingRate";
const HISTORY_PAGE: u32 = 1000;

/// Which perpetuals a venue collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolFilter {
    /// Only these trading pairs.
    Only(Vec<String>),
    /// Every pair quoted in this asset.
    QuoteSuffix(String),
}

impl SymbolFilter {
    fn admits(&self, symbol: &str) -> bool {
        match self {
            SymbolFilter::Only(list) => list.iter().any(|s| s == symbol),
            SymbolFilter::QuoteSuffix(q) => symbol.ends_with(q.as_str()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_asset: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
}

impl SymbolInfo {
    fn is_live_perpetual(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.status == "TRADING"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    funding_rate: Value,
    funding_time: i64,
}

pub struct FapiVenue {
    http: VenueHttp,
    filter: SymbolFilter,
}

impl FapiVenue {
    pub fn new(http: VenueHttp, filter: SymbolFilter) -> Self {
        Self { http, filter }
    }

    async fn live_perpetuals(&self) -> Result<Vec<SymbolInfo>, VenueError> {
        let info: ExchangeInfo = self.http.get_json(EXCHANGE_INFO, &[]).await?;
        Ok(info.symbols.into_iter().filter(SymbolInfo::is_live_perpetual).collect())
    }

    /// Every settled rate for `base_asset` in `[start_ms, end_ms]`, oldest first.
    ///
    /// Pages of up to 1000 entries; the cursor moves to one past the last
    /// returned funding time. Each sample's `collected_at` is its funding time.
    pub async fn fetch_history(&self, base_asset: &str, start_ms: i64, end_ms: i64) -> Result<Vec<RawSample>, VenueError> {
        let exchange = self.http.exchange();
        let info = self
            .live_perpetuals()
            .await?
            .into_iter()
            .find(|s| s.base_asset == base_asset)
            .ok_or_else(|| VenueError::Envelope {
                exchange,
                reason: format!("no live perpetual for {base_asset}"),
            })?;

        let mut out = Vec::new();
        let mut cursor = start_ms;
        while cursor < end_ms {
            let page: Vec<FundingEntry> = self
                .http
                .get_json(
                    FUNDING_RATE,
                    &[
                        ("symbol", info.symbol.clone()),
                        ("startTime", cursor.to_string()),
                        ("endTime", end_ms.to_string()),
                        ("limit", HISTORY_PAGE.to_string()),
                    ],
                )
                .await?;
            let Some(last) = page.last().map(|e| e.funding_time) else { break };
            out.extend(page.into_iter().map(|e| {
                RawSample::Decimal(DecimalRaw {
                    trading_pair: info.symbol.clone(),
                    base_asset: info.base_asset.clone(),
                    funding_rate: e.funding_rate,
                    funding_time: Some(e.funding_time),
                    collected_at: e.funding_time,
                })
            }));
            if last < cursor {
                break;
            }
            cursor = last + 1;
            self.http.pace().await;
        }
        tracing::info!(%exchange, symbol = %info.symbol, rows = out.len(), "history fetched");
        Ok(out)
    }
}

#[async_trait]
impl VenueFetcher for FapiVenue {
    fn exchange(&self) -> Exchange {
        self.http.exchange()
    }

    async fn fetch_current(&self) -> Result<Vec<RawSample>, VenueError> {
        let exchange = self.http.exchange();
        let symbols: Vec<SymbolInfo> = self
            .live_perpetuals()
            .await?
            .into_iter()
            .filter(|s| self.filter.admits(&s.symbol))
            .collect();
        tracing::debug!(%exchange, symbols = symbols.len(), "collecting current rates");

        let collected_at = now_ms();
        let mut out = Vec::with_capacity(symbols.len());
        for s in &symbols {
            self.http.pace().await;
            let latest: Vec<FundingEntry> = match self
                .http
                .get_json(FUNDING_RATE, &[("symbol", s.symbol.clone()), ("limit", "1".into())])
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(%exchange, symbol = %s.symbol, error = %e, "skipping symbol");
                    continue;
                }
            };
            if let Some(entry) = latest.into_iter().next() {
                out.push(RawSample::Decimal(DecimalRaw {
                    trading_pair: s.symbol.clone(),
                    base_asset: s.base_asset.clone(),
                    funding_rate: entry.funding_rate,
                    funding_time: Some(entry.funding_time),
                    collected_at,
                }));
            }
        }
        Ok(out)
    }
}
