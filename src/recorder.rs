// src/recorder.rs
use std::sync::Arc;

use crate::store::{FundingStore, StoreError};
use crate::types::MinuteSample;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidSample {
    #[error("empty symbol")]
    EmptySymbol,
    #[error("empty base asset")]
    EmptyBaseAsset,
    #[error("field `{0}` is not finite")]
    NonFinite(&'static str),
    #[error("non-positive timestamp {0}")]
    Timestamp(i64),
}

pub fn validate(s: &MinuteSample) -> Result<(), InvalidSample> {
    if s.symbol.trim().is_empty() {
        return Err(InvalidSample::EmptySymbol);
    }
    if s.base_asset.trim().is_empty() {
        return Err(InvalidSample::EmptyBaseAsset);
    }
    if s.collected_at <= 0 {
        return Err(InvalidSample::Timestamp(s.collected_at));
    }
    let fields = [
        ("funding_rate", s.funding_rate),
        ("funding_premium", s.funding_premium),
        ("cumulative_index", s.cumulative_index),
        ("mark_price", s.mark_price),
    ];
    for (name, v) in fields {
        if !v.is_finite() {
            return Err(InvalidSample::NonFinite(name));
        }
    }
    if s.underlying_price.is_some_and(|v| !v.is_finite()) {
        return Err(InvalidSample::NonFinite("underlying_price"));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct RecordReport {
    pub written: usize,
    pub invalid: Vec<(String, InvalidSample)>,
    pub failed: Vec<(String, StoreError)>,
}

impl RecordReport {
    /// Every write attempt failed; the store itself is the likely problem.
    pub fn store_down(&self) -> bool {
        self.written == 0 && !self.failed.is_empty()
    }
}

/// Append-only sink for minute samples. Symbols are written independently.
pub struct MinuteSampleRecorder<S: FundingStore> {
    store: Arc<S>,
}

impl<S: FundingStore> MinuteSampleRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn record(&self, samples: &[MinuteSample]) -> RecordReport {
        let mut report = RecordReport::default();
        for s in samples {
            if let Err(e) = validate(s) {
                tracing::warn!(symbol = %s.symbol, error = %e, "dropping invalid minute sample");
                report.invalid.push((s.symbol.clone(), e));
                continue;
            }
            match self.store.insert_minute_sample(s).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::error!(symbol = %s.symbol, error = %e, "minute sample write failed");
                    report.failed.push((s.symbol.clone(), e));
                }
            }
        }
        report
    }
}
