// src/metrics.rs
//! Prometheus counters. Without the `metrics` feature every helper is a no-op,
//! so call sites never need their own `cfg`.
#![cfg_attr(not(feature = "metrics"), allow(unused_variables))]

use crate::types::Exchange;

#[cfg(feature = "metrics")]
mod registry {
    use once_cell::sync::Lazy;
    use prometheus::{
        register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
        IntCounter, IntCounterVec,
    };

    pub static PARSE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "funding_parse_errors_total", "Instruments skipped during normalization", &["exchange"]
        ).unwrap()
    });

    pub static VENUE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "funding_venue_failures_total", "Venue branches that failed as a whole", &["exchange"]
        ).unwrap()
    });

    pub static INTEGRATION_ANOMALIES: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "funding_integration_anomalies_total", "Index steps with non-positive elapsed time", &["exchange"]
        ).unwrap()
    });

    pub static HOURS_BELOW_THRESHOLD: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "funding_hours_below_threshold_total", "Symbol-hours dropped for sparse coverage"
        ).unwrap()
    });

    pub static ROWS_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "funding_rows_written_total", "Rows written to the store", &["kind"] // rate|original|minute|hourly
        ).unwrap()
    });

    pub static TICK_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
        register_histogram_vec!(
            "funding_tick_seconds",
            "Batch run latency",
            &["kind"], // rates|minute|aggregate
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ).unwrap()
    });
}

pub fn parse_error(exchange: Exchange) {
    #[cfg(feature = "metrics")]
    registry::PARSE_ERRORS.with_label_values(&[exchange.as_str()]).inc();
}

pub fn venue_failure(exchange: Exchange) {
    #[cfg(feature = "metrics")]
    registry::VENUE_FAILURES.with_label_values(&[exchange.as_str()]).inc();
}

pub fn integration_anomaly(exchange: Exchange) {
    #[cfg(feature = "metrics")]
    registry::INTEGRATION_ANOMALIES.with_label_values(&[exchange.as_str()]).inc();
}

pub fn hour_below_threshold() {
    #[cfg(feature = "metrics")]
    registry::HOURS_BELOW_THRESHOLD.inc();
}

pub fn rows_written(kind: &str, n: u64) {
    #[cfg(feature = "metrics")]
    registry::ROWS_WRITTEN.with_label_values(&[kind]).inc_by(n);
}

pub fn observe_tick(kind: &str, secs: f64) {
    #[cfg(feature = "metrics")]
    registry::TICK_SECONDS.with_label_values(&[kind]).observe(secs);
}

/// Text exposition of the default registry.
#[cfg(feature = "metrics")]
pub fn render() -> Option<String> {
    use prometheus::Encoder;
    let mut buf = Vec::new();
    prometheus::TextEncoder::new().encode(&prometheus::gather(), &mut buf).ok()?;
    String::from_utf8(buf).ok()
}

#[cfg(not(feature = "metrics"))]
pub fn render() -> Option<String> {
    None
}
