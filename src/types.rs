// src/types.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Floor a unix-ms instant to the start of its hour.
#[inline]
pub fn floor_hour(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(HOUR_MS) * HOUR_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Hyperliquid,
    Lighter,
    Aster,
    Binance,
    Paradex,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::Hyperliquid,
        Exchange::Lighter,
        Exchange::Aster,
        Exchange::Binance,
        Exchange::Paradex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Hyperliquid => "hyperliquid",
            Exchange::Lighter => "lighter",
            Exchange::Aster => "aster",
            Exchange::Binance => "binance",
            Exchange::Paradex => "paradex",
        }
    }

    /// Every venue maps to exactly one convention; adding a venue forces a decision here.
    pub fn convention(self) -> RateConvention {
        match self {
            Exchange::Binance | Exchange::Aster => RateConvention::EightHourDecimal,
            Exchange::Hyperliquid => RateConvention::HourlyDecimal,
            Exchange::Lighter => RateConvention::PercentDirectional,
            Exchange::Paradex => RateConvention::PremiumConflating,
        }
    }

    pub fn payments_per_day(self) -> u32 {
        self.convention().payments_per_day()
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownExchange(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignRule {
    /// The rate carries its own sign.
    Intrinsic,
    /// A separate `direction` field (`long`/`short`) sets the sign.
    DirectionField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Decimal,
    Percent,
}

/// Closed set of funding conventions, one per normalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateConvention {
    EightHourDecimal,
    /// Rate is quoted per hour even when settlement runs less often.
    HourlyDecimal,
    PercentDirectional,
    /// Reported instantaneously, premium is rate-space; needs index integration.
    PremiumConflating,
}

impl RateConvention {
    /// Period the reported rate refers to; drives annualization.
    pub const fn rate_period_secs(self) -> u32 {
        match self {
            RateConvention::EightHourDecimal | RateConvention::PremiumConflating => 8 * 3600,
            RateConvention::HourlyDecimal | RateConvention::PercentDirectional => 3600,
        }
    }

    /// Period over which the venue settles; drives index integration.
    pub const fn settlement_period_secs(self) -> u32 {
        match self {
            RateConvention::EightHourDecimal | RateConvention::PremiumConflating => 8 * 3600,
            RateConvention::HourlyDecimal | RateConvention::PercentDirectional => 3600,
        }
    }

    pub const fn payments_per_day(self) -> u32 {
        86_400 / self.rate_period_secs()
    }

    pub const fn sign_rule(self) -> SignRule {
        match self {
            RateConvention::PercentDirectional => SignRule::DirectionField,
            _ => SignRule::Intrinsic,
        }
    }

    pub const fn unit(self) -> RateUnit {
        match self {
            RateConvention::PercentDirectional => RateUnit::Percent,
            _ => RateUnit::Decimal,
        }
    }

    pub const fn integrates_index(self) -> bool {
        matches!(self, RateConvention::PremiumConflating)
    }
}

/// One normalized observation. Percent and annualized values are derived from
/// the decimal rate at construction and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRate {
    exchange: Exchange,
    symbol: String,
    trading_pair: String,
    #[serde(rename = "fundingRate")]
    funding_rate_decimal: f64,
    funding_rate_percent: f64,
    #[serde(rename = "annualizedRate")]
    annualized_rate_percent: f64,
    collected_at: i64,
}

impl CanonicalRate {
    pub fn new(
        exchange: Exchange,
        symbol: impl Into<String>,
        trading_pair: impl Into<String>,
        funding_rate_decimal: f64,
        collected_at: i64,
    ) -> Self {
        let funding_rate_percent = funding_rate_decimal * 100.0;
        let annualized_rate_percent =
            funding_rate_percent * exchange.payments_per_day() as f64 * DAYS_PER_YEAR;
        Self {
            exchange,
            symbol: symbol.into(),
            trading_pair: trading_pair.into(),
            funding_rate_decimal,
            funding_rate_percent,
            annualized_rate_percent,
            collected_at,
        }
    }

    pub fn exchange(&self) -> Exchange { self.exchange }
    pub fn symbol(&self) -> &str { &self.symbol }
    pub fn trading_pair(&self) -> &str { &self.trading_pair }
    pub fn funding_rate_decimal(&self) -> f64 { self.funding_rate_decimal }
    pub fn funding_rate_percent(&self) -> f64 { self.funding_rate_percent }
    pub fn annualized_rate_percent(&self) -> f64 { self.annualized_rate_percent }
    pub fn collected_at(&self) -> i64 { self.collected_at }
}

// ---- raw venue payloads ----
//
// Numeric fields stay as decoded JSON so malformed values surface as
// per-instrument parse errors in the normalizer, not envelope failures.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSample {
    Decimal(DecimalRaw),
    Directional(DirectionalRaw),
    Premium(PremiumRaw),
}

impl RawSample {
    pub fn trading_pair(&self) -> &str {
        match self {
            RawSample::Decimal(r) => &r.trading_pair,
            RawSample::Directional(r) => &r.symbol,
            RawSample::Premium(r) => &r.market,
        }
    }

    pub fn collected_at(&self) -> i64 {
        match self {
            RawSample::Decimal(r) => r.collected_at,
            RawSample::Directional(r) => r.timestamp.saturating_mul(1000),
            RawSample::Premium(r) => r.collected_at,
        }
    }
}

/// Binance-style and Hyperliquid-style decimal rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecimalRaw {
    pub trading_pair: String,
    pub base_asset: String,
    pub funding_rate: Value,
    #[serde(default)]
    pub funding_time: Option<i64>,
    pub collected_at: i64,
}

/// Percent-quoted rate with an explicit direction flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalRaw {
    pub market_id: u32,
    pub symbol: String,
    pub rate: Value,
    pub direction: String,
    /// unix seconds
    pub timestamp: i64,
}

/// Market summary where the reported funding rate is the instantaneous premium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumRaw {
    pub market: String,
    pub funding_rate: Value,
    #[serde(default)]
    pub mark_price: Option<Value>,
    #[serde(default)]
    pub underlying_price: Option<Value>,
    #[serde(default)]
    pub last_traded_price: Option<Value>,
    pub collected_at: i64,
}

/// Historical point from a venue that publishes its own cumulative index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRaw {
    pub market: String,
    pub funding_rate: Value,
    pub funding_premium: Value,
    pub funding_index: Value,
    pub collected_at: i64,
}

/// Parsed premium observation, input to the index integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PremiumObservation {
    pub symbol: String,
    pub base_asset: String,
    pub funding_rate: f64,
    pub funding_premium: f64,
    pub mark_price: f64,
    pub underlying_price: Option<f64>,
    pub collected_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexPoint {
    pub index: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinuteSample {
    pub symbol: String,
    pub base_asset: String,
    pub funding_rate: f64,
    pub funding_premium: f64,
    pub cumulative_index: f64,
    pub mark_price: f64,
    pub underlying_price: Option<f64>,
    pub collected_at: i64,
}

impl MinuteSample {
    pub fn index_point(&self) -> IndexPoint {
        IndexPoint { index: self.cumulative_index, ts_ms: self.collected_at }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyAggregate {
    pub symbol: String,
    pub base_asset: String,
    pub hour_timestamp: i64,
    pub avg_funding_rate: f64,
    pub avg_funding_premium: f64,
    pub avg_mark_price: f64,
    pub avg_underlying_price: Option<f64>,
    pub index_start: f64,
    pub index_end: f64,
    pub index_delta: f64,
    pub sample_count: u32,
}
