// src/funding.rs
use serde_json::Value;

use crate::metrics;
use crate::types::{
    CanonicalRate, Exchange, IndexedRaw, MinuteSample, PremiumObservation, PremiumRaw, RateConvention, RateUnit,
    RawSample, SignRule,
};

/// Per-instrument normalization failure. Never aborts a batch.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{pair}: field `{field}` is missing")]
    Missing { pair: String, field: &'static str },
    #[error("{pair}: field `{field}` is not a finite number: {raw}")]
    NotANumber { pair: String, field: &'static str, raw: String },
    #[error("{pair}: unknown funding direction `{direction}`")]
    Direction { pair: String, direction: String },
    #[error("{pair}: {exchange} expects a {expected} payload")]
    ShapeMismatch { exchange: Exchange, pair: String, expected: &'static str },
}

fn number(pair: &str, field: &'static str, v: &Value) -> Result<f64, ParseError> {
    let parsed = match v {
        Value::Null => return Err(ParseError::Missing { pair: pair.to_string(), field }),
        Value::String(s) if s.trim().is_empty() => {
            return Err(ParseError::Missing { pair: pair.to_string(), field })
        }
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(x) if x.is_finite() => Ok(x),
        _ => Err(ParseError::NotANumber { pair: pair.to_string(), field, raw: v.to_string() }),
    }
}

fn optional_number(pair: &str, field: &'static str, v: Option<&Value>) -> Result<Option<f64>, ParseError> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => number(pair, field, v).map(Some),
    }
}

/// Apply the convention's sign rule and unit to a reported value.
fn signed_decimal(
    conv: RateConvention,
    pair: &str,
    value: f64,
    direction: Option<&str>,
) -> Result<f64, ParseError> {
    let signed = match conv.sign_rule() {
        SignRule::Intrinsic => value,
        SignRule::DirectionField => match direction.map(str::trim) {
            Some(d) if d.eq_ignore_ascii_case("short") => -value,
            Some(d) if d.eq_ignore_ascii_case("long") => value,
            other => {
                return Err(ParseError::Direction {
                    pair: pair.to_string(),
                    direction: other.unwrap_or_default().to_string(),
                })
            }
        },
    };
    Ok(match conv.unit() {
        RateUnit::Decimal => signed,
        RateUnit::Percent => signed / 100.0,
    })
}

fn expected_shape(conv: RateConvention) -> &'static str {
    match conv {
        RateConvention::EightHourDecimal | RateConvention::HourlyDecimal => "decimal",
        RateConvention::PercentDirectional => "directional",
        RateConvention::PremiumConflating => "premium",
    }
}

/// Parse a premium-style market summary. The reported funding rate *is* the
/// premium; it stays in rate space and is never scaled by the mark price.
pub fn premium_observation(raw: &PremiumRaw) -> Result<PremiumObservation, ParseError> {
    let pair = raw.market.as_str();
    let funding_rate = number(pair, "funding_rate", &raw.funding_rate)?;
    let mark_price = optional_number(pair, "mark_price", raw.mark_price.as_ref())?.unwrap_or(0.0);
    let underlying_price = optional_number(pair, "underlying_price", raw.underlying_price.as_ref())?;
    let base_asset = pair.split('-').next().unwrap_or(pair).to_string();
    Ok(PremiumObservation {
        symbol: raw.market.clone(),
        base_asset,
        funding_rate,
        funding_premium: funding_rate,
        mark_price,
        underlying_price,
        collected_at: raw.collected_at,
    })
}

/// Parse a historical point carrying the venue's own index. No mark or
/// underlying price is published for these, so the mark is recorded as 0.
pub fn indexed_sample(raw: &IndexedRaw) -> Result<MinuteSample, ParseError> {
    let pair = raw.market.as_str();
    Ok(MinuteSample {
        symbol: raw.market.clone(),
        base_asset: pair.split('-').next().unwrap_or(pair).to_string(),
        funding_rate: number(pair, "funding_rate", &raw.funding_rate)?,
        funding_premium: number(pair, "funding_premium", &raw.funding_premium)?,
        cumulative_index: number(pair, "funding_index", &raw.funding_index)?,
        mark_price: 0.0,
        underlying_price: None,
        collected_at: raw.collected_at,
    })
}

/// Map one raw venue sample to a canonical rate.
pub fn normalize(exchange: Exchange, raw: &RawSample) -> Result<CanonicalRate, ParseError> {
    let conv = exchange.convention();
    match (conv, raw) {
        (RateConvention::EightHourDecimal | RateConvention::HourlyDecimal, RawSample::Decimal(r)) => {
            let value = number(&r.trading_pair, "funding_rate", &r.funding_rate)?;
            let decimal = signed_decimal(conv, &r.trading_pair, value, None)?;
            Ok(CanonicalRate::new(exchange, &r.base_asset, &r.trading_pair, decimal, r.collected_at))
        }
        (RateConvention::PercentDirectional, RawSample::Directional(r)) => {
            let value = number(&r.symbol, "rate", &r.rate)?;
            let decimal = signed_decimal(conv, &r.symbol, value, Some(&r.direction))?;
            Ok(CanonicalRate::new(exchange, &r.symbol, &r.symbol, decimal, raw.collected_at()))
        }
        (RateConvention::PremiumConflating, RawSample::Premium(r)) => {
            let obs = premium_observation(r)?;
            Ok(CanonicalRate::new(
                exchange,
                obs.base_asset,
                obs.symbol,
                obs.funding_rate,
                obs.collected_at,
            ))
        }
        (conv, other) => Err(ParseError::ShapeMismatch {
            exchange,
            pair: other.trading_pair().to_string(),
            expected: expected_shape(conv),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub exchange: Exchange,
    pub rates: Vec<CanonicalRate>,
    pub skipped: Vec<ParseError>,
}

pub fn normalize_batch(exchange: Exchange, raws: &[RawSample]) -> NormalizedBatch {
    let mut rates = Vec::with_capacity(raws.len());
    let mut skipped = Vec::new();
    for raw in raws {
        match normalize(exchange, raw) {
            Ok(r) => rates.push(r),
            Err(e) => {
                tracing::warn!(%exchange, error = %e, "skipping instrument");
                metrics::parse_error(exchange);
                skipped.push(e);
            }
        }
    }
    NormalizedBatch { exchange, rates, skipped }
}

#[derive(Debug, Clone, Default)]
pub struct PremiumBatch {
    pub observations: Vec<PremiumObservation>,
    pub skipped: Vec<ParseError>,
}

/// Premium observations for an index-integrating venue.
pub fn premium_batch(exchange: Exchange, raws: &[RawSample]) -> PremiumBatch {
    let mut out = PremiumBatch::default();
    for raw in raws {
        let res = match raw {
            RawSample::Premium(p) => premium_observation(p),
            other => Err(ParseError::ShapeMismatch {
                exchange,
                pair: other.trading_pair().to_string(),
                expected: "premium",
            }),
        };
        match res {
            Ok(o) => out.observations.push(o),
            Err(e) => {
                tracing::warn!(%exchange, error = %e, "skipping premium sample");
                metrics::parse_error(exchange);
                out.skipped.push(e);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecimalRaw, DirectionalRaw};
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    fn decimal(pair: &str, base: &str, rate: Value) -> RawSample {
        RawSample::Decimal(DecimalRaw {
            trading_pair: pair.into(),
            base_asset: base.into(),
            funding_rate: rate,
            funding_time: None,
            collected_at: 1_700_000_000_000,
        })
    }

    fn directional(rate: Value, direction: &str) -> RawSample {
        RawSample::Directional(DirectionalRaw {
            market_id: 1,
            symbol: "ETH".into(),
            rate,
            direction: direction.into(),
            timestamp: 1_700_000_000,
        })
    }

    fn premium(rate: &str, mark: Option<&str>) -> PremiumRaw {
        PremiumRaw {
            market: "BTC-USD-PERP".into(),
            funding_rate: json!(rate),
            mark_price: mark.map(|m| json!(m)),
            underlying_price: None,
            last_traded_price: None,
            collected_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn eight_hour_venue_annualizes_three_times_a_day() {
        let r = normalize(Exchange::Binance, &decimal("BTCUSDT", "BTC", json!("0.0001"))).unwrap();
        assert_eq!(r.symbol(), "BTC");
        assert_eq!(r.trading_pair(), "BTCUSDT");
        assert_eq!(r.funding_rate_decimal(), 0.0001);
        assert_eq!(r.funding_rate_percent(), r.funding_rate_decimal() * 100.0);
        assert_eq!(r.annualized_rate_percent(), r.funding_rate_percent() * 3.0 * 365.0);
        assert!(close(r.annualized_rate_percent(), 10.95));
    }

    #[test]
    fn hourly_venue_uses_sampling_period() {
        let r = normalize(Exchange::Hyperliquid, &decimal("SOL", "SOL", json!("-0.0000125"))).unwrap();
        assert_eq!(r.annualized_rate_percent(), r.funding_rate_percent() * 24.0 * 365.0);
        assert!(r.annualized_rate_percent() < 0.0);
        assert!(close(r.annualized_rate_percent(), -10.95));
    }

    #[test]
    fn percent_directional_short_flips_sign_and_divides() {
        let r = normalize(Exchange::Lighter, &directional(json!(0.0012), "short")).unwrap();
        assert!(close(r.funding_rate_decimal(), -0.000012));
        assert!(close(r.funding_rate_percent(), -0.0012));
        assert!(close(r.annualized_rate_percent(), -10.512));
        assert_eq!(r.funding_rate_percent(), r.funding_rate_decimal() * 100.0);
        assert_eq!(r.collected_at(), 1_700_000_000_000);
    }

    #[test]
    fn percent_directional_long_keeps_sign() {
        let r = normalize(Exchange::Lighter, &directional(json!("0.0012"), "long")).unwrap();
        assert!(close(r.funding_rate_decimal(), 0.000012));
    }

    #[test]
    fn unknown_direction_is_a_parse_error() {
        let err = normalize(Exchange::Lighter, &directional(json!(0.0012), "flat")).unwrap_err();
        assert!(matches!(err, ParseError::Direction { .. }));
    }

    #[test]
    fn premium_is_not_scaled_by_mark_price() {
        let obs = premium_observation(&premium("0.00005", Some("95000"))).unwrap();
        assert_eq!(obs.funding_premium, 0.00005);
        assert_ne!(obs.funding_premium, 4.75);
        assert_eq!(obs.mark_price, 95000.0);
        assert_eq!(obs.base_asset, "BTC");
        assert_eq!(obs.underlying_price, None);
    }

    #[test]
    fn premium_venue_rate_is_eight_hour_decimal() {
        let raw = RawSample::Premium(premium("0.00005", Some("95000")));
        let r = normalize(Exchange::Paradex, &raw).unwrap();
        assert_eq!(r.symbol(), "BTC");
        assert_eq!(r.trading_pair(), "BTC-USD-PERP");
        assert_eq!(r.funding_rate_decimal(), 0.00005);
        assert_eq!(r.annualized_rate_percent(), r.funding_rate_percent() * 3.0 * 365.0);
    }

    #[test]
    fn missing_mark_price_defaults_to_zero() {
        let obs = premium_observation(&premium("0.0001", None)).unwrap();
        assert_eq!(obs.mark_price, 0.0);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        for bad in [json!("NaN"), json!("inf"), json!("abc"), json!(true)] {
            let err = normalize(Exchange::Binance, &decimal("X", "X", bad)).unwrap_err();
            assert!(matches!(err, ParseError::NotANumber { .. }), "{err}");
        }
        let err = normalize(Exchange::Binance, &decimal("X", "X", json!(""))).unwrap_err();
        assert!(matches!(err, ParseError::Missing { .. }));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let err = normalize(Exchange::Binance, &directional(json!(1), "long")).unwrap_err();
        assert!(matches!(err, ParseError::ShapeMismatch { expected: "decimal", .. }));
    }

    #[test]
    fn batch_skips_bad_instruments_and_keeps_the_rest() {
        let raws = vec![
            decimal("BTCUSDT", "BTC", json!("0.0001")),
            decimal("ETHUSDT", "ETH", json!("NaN")),
            decimal("SOLUSDT", "SOL", json!(-0.0002)),
        ];
        let batch = normalize_batch(Exchange::Aster, &raws);
        assert_eq!(batch.rates.len(), 2);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.rates[1].symbol(), "SOL");
        for r in &batch.rates {
            assert_eq!(r.funding_rate_percent(), r.funding_rate_decimal() * 100.0);
            assert_eq!(
                r.annualized_rate_percent(),
                r.funding_rate_percent() * r.exchange().payments_per_day() as f64 * 365.0
            );
        }
    }

    #[test]
    fn premium_batch_rejects_other_shapes() {
        let raws = vec![
            RawSample::Premium(premium("0.0001", Some("100"))),
            decimal("BTCUSDT", "BTC", json!("0.0001")),
        ];
        let batch = premium_batch(Exchange::Paradex, &raws);
        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
    }

    #[test]
    fn indexed_point_keeps_the_venue_index() {
        let raw = IndexedRaw {
            market: "ETH-USD-PERP".into(),
            funding_rate: json!("0.0003"),
            funding_premium: json!("0.00012"),
            funding_index: json!("-41.5"),
            collected_at: 1_700_000_005_000,
        };
        let s = indexed_sample(&raw).unwrap();
        assert_eq!(s.base_asset, "ETH");
        assert_eq!(s.funding_rate, 0.0003);
        assert_eq!(s.funding_premium, 0.00012);
        assert_eq!(s.cumulative_index, -41.5);
        assert_eq!((s.mark_price, s.underlying_price), (0.0, None));

        let bad = IndexedRaw { funding_index: json!(""), ..raw };
        assert!(matches!(indexed_sample(&bad), Err(ParseError::Missing { field: "funding_index", .. })));
    }
}
