// src/config.rs
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::types::Exchange;

/// Upstream rate-limit floor between sequential requests to one venue.
pub const MIN_PACING_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "d_database_url")]         pub database_url: String,
    #[serde(default = "d_rate_interval")]        pub rate_interval_secs: u64,
    #[serde(default = "d_minute_interval")]      pub minute_interval_secs: u64,
    #[serde(default = "d_aggregate_interval")]   pub aggregate_interval_secs: u64,
    #[serde(default = "d_collection_timeout")]   pub collection_timeout_ms: u64,
    #[serde(default = "d_request_timeout")]      pub request_timeout_ms: u64,
    #[serde(default = "d_pacing_ms")]            pub pacing_ms: u64,
    #[serde(default = "d_min_samples")]          pub min_hourly_samples: u32,
    #[serde(default = "d_venues")]               pub venues: Vec<Exchange>,
    #[serde(default = "d_minute_venues")]        pub minute_venues: Vec<Exchange>,
    #[serde(default = "d_binance_symbols")]      pub binance_symbols: Vec<String>,
    #[serde(default = "d_bind")]                 pub bind: String,
    #[serde(default)]                            pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoints {
    #[serde(default = "d_hyperliquid_url")]      pub hyperliquid: String,
    #[serde(default = "d_lighter_url")]          pub lighter: String,
    #[serde(default = "d_aster_url")]            pub aster: String,
    #[serde(default = "d_binance_url")]          pub binance: String,
    #[serde(default = "d_paradex_url")]          pub paradex: String,
}

fn d_database_url() -> String { "sqlite://funding.db?mode=rwc".into() }
fn d_rate_interval() -> u64 { 3600 }
fn d_minute_interval() -> u64 { 60 }
fn d_aggregate_interval() -> u64 { 3600 }
fn d_collection_timeout() -> u64 { 30_000 }
fn d_request_timeout() -> u64 { 10_000 }
fn d_pacing_ms() -> u64 { MIN_PACING_MS }
fn d_min_samples() -> u32 { crate::aggregate::DEFAULT_MIN_SAMPLES }
fn d_venues() -> Vec<Exchange> { Exchange::ALL.to_vec() }
fn d_minute_venues() -> Vec<Exchange> { vec![Exchange::Paradex] }
fn d_bind() -> String { "0.0.0.0:8787".into() }
fn d_hyperliquid_url() -> String { "https://api.hyperliquid.xyz".into() }
fn d_lighter_url() -> String { "https://mainnet.zklighter.elliot.ai".into() }
fn d_aster_url() -> String { "https://fapi.asterdex.com".into() }
fn d_binance_url() -> String { "https://fapi.binance.com".into() }
fn d_paradex_url() -> String { "https://api.prod.paradex.trade".into() }
fn d_binance_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT",
        "ADAUSDT", "DOGEUSDT", "AVAXUSDT", "DOTUSDT", "MATICUSDT",
        "LINKUSDT", "UNIUSDT", "ATOMUSDT", "LTCUSDT", "ETCUSDT",
        "NEARUSDT", "APTUSDT", "ARBUSDT", "OPUSDT", "INJUSDT",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[inline]
pub fn ms(d: u64) -> Duration { Duration::from_millis(d) }

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            hyperliquid: d_hyperliquid_url(),
            lighter: d_lighter_url(),
            aster: d_aster_url(),
            binance: d_binance_url(),
            paradex: d_paradex_url(),
        }
    }
}

impl Endpoints {
    pub fn base_url(&self, exchange: Exchange) -> &str {
        match exchange {
            Exchange::Hyperliquid => &self.hyperliquid,
            Exchange::Lighter => &self.lighter,
            Exchange::Aster => &self.aster,
            Exchange::Binance => &self.binance,
            Exchange::Paradex => &self.paradex,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            database_url: d_database_url(),
            rate_interval_secs: d_rate_interval(),
            minute_interval_secs: d_minute_interval(),
            aggregate_interval_secs: d_aggregate_interval(),
            collection_timeout_ms: d_collection_timeout(),
            request_timeout_ms: d_request_timeout(),
            pacing_ms: d_pacing_ms(),
            min_hourly_samples: d_min_samples(),
            venues: d_venues(),
            minute_venues: d_minute_venues(),
            binance_symbols: d_binance_symbols(),
            bind: d_bind(),
            endpoints: Endpoints::default(),
        }
    }
}

impl CollectorConfig {
    /// Read `path` (if given and present), then apply `DATABASE_URL` /
    /// `FUNDING_BIND` from the environment or a `.env` file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading {}", p.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing {}", p.display()))?
            }
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                cfg.database_url = url;
            }
        }
        if let Ok(bind) = std::env::var("FUNDING_BIND") {
            if !bind.trim().is_empty() {
                cfg.bind = bind;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ex) = self.minute_venues.iter().find(|e| !e.convention().integrates_index()) {
            anyhow::bail!("{ex} does not report a premium and cannot be sampled per minute");
        }
        if self.min_hourly_samples == 0 {
            anyhow::bail!("min_hourly_samples must be at least 1");
        }
        if self.rate_interval_secs == 0 || self.minute_interval_secs == 0 || self.aggregate_interval_secs == 0 {
            anyhow::bail!("tick intervals must be non-zero");
        }
        Ok(())
    }

    /// Pacing between sequential requests, never below the 100 ms floor.
    pub fn pacing(&self) -> Duration { ms(self.pacing_ms.max(MIN_PACING_MS)) }
    pub fn collection_timeout(&self) -> Duration { ms(self.collection_timeout_ms) }
    pub fn request_timeout(&self) -> Duration { ms(self.request_timeout_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = CollectorConfig::from_toml("").unwrap();
        assert_eq!(cfg.min_hourly_samples, 30);
        assert_eq!(cfg.pacing_ms, 100);
        assert_eq!(cfg.venues.len(), 5);
        assert_eq!(cfg.minute_venues, vec![Exchange::Paradex]);
        assert_eq!(cfg.binance_symbols.len(), 20);
        assert_eq!(cfg.endpoints.base_url(Exchange::Binance), "https://fapi.binance.com");
    }

    #[test]
    fn overrides_and_pacing_floor() {
        let cfg = CollectorConfig::from_toml(
            r#"
            pacing_ms = 10
            min_hourly_samples = 45
            venues = ["binance", "lighter"]

            [endpoints]
            binance = "http://127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pacing(), Duration::from_millis(100));
        assert_eq!(cfg.min_hourly_samples, 45);
        assert_eq!(cfg.venues, vec![Exchange::Binance, Exchange::Lighter]);
        assert_eq!(cfg.endpoints.binance, "http://127.0.0.1:9000");
        assert_eq!(cfg.endpoints.paradex, "https://api.prod.paradex.trade");
    }

    #[test]
    fn rejects_minute_sampling_of_non_premium_venue() {
        assert!(CollectorConfig::from_toml(r#"minute_venues = ["binance"]"#).is_err());
    }

    #[test]
    fn rejects_unknown_venue() {
        assert!(CollectorConfig::from_toml(r#"venues = ["kraken"]"#).is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        std::fs::write(&path, "minute_interval_secs = 30\n").unwrap();
        let cfg = CollectorConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.minute_interval_secs, 30);
    }
}
