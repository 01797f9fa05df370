// src/aggregate.rs
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics;
use crate::store::{FundingStore, StoreError};
use crate::types::{floor_hour, HourlyAggregate, MinuteSample, HOUR_MS};

pub const DEFAULT_MIN_SAMPLES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BelowThreshold {
    pub symbol: String,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourStatus {
    /// No minute samples at all in the window.
    NoData,
    /// Samples exist but no symbol reached the coverage threshold.
    BelowThreshold,
    Published,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowAggregation {
    pub rows: Vec<HourlyAggregate>,
    pub below_threshold: Vec<BelowThreshold>,
    pub samples_seen: usize,
}

#[derive(Default)]
struct Acc {
    n: u32,
    rate: f64,
    premium: f64,
    mark: f64,
    underlying: f64,
    n_underlying: u32,
    min_index: f64,
    max_index: f64,
}

impl Acc {
    fn push(&mut self, s: &MinuteSample) {
        if self.n == 0 {
            self.min_index = s.cumulative_index;
            self.max_index = s.cumulative_index;
        } else {
            self.min_index = self.min_index.min(s.cumulative_index);
            self.max_index = self.max_index.max(s.cumulative_index);
        }
        self.n += 1;
        self.rate += s.funding_rate;
        self.premium += s.funding_premium;
        self.mark += s.mark_price;
        if let Some(u) = s.underlying_price {
            self.underlying += u;
            self.n_underlying += 1;
        }
    }
}

/// Aggregate the samples of window `[hour_start, hour_start + 1h)`.
///
/// `index_start`/`index_end` are the min/max index seen, not first/last by
/// time: the window read is not time-ordered per se and the index is monotone
/// within an hour for a same-sign premium. A sign flip inside the hour makes
/// this an approximation.
pub fn aggregate_window(hour_start: i64, samples: &[MinuteSample], min_samples: u32) -> WindowAggregation {
    let hour_end = hour_start + HOUR_MS;
    let mut groups: BTreeMap<(&str, &str), Acc> = BTreeMap::new();
    let mut samples_seen = 0;
    for s in samples.iter().filter(|s| s.collected_at >= hour_start && s.collected_at < hour_end) {
        samples_seen += 1;
        groups.entry((s.symbol.as_str(), s.base_asset.as_str())).or_default().push(s);
    }

    let mut out = WindowAggregation { samples_seen, ..Default::default() };
    for ((symbol, base_asset), acc) in groups {
        if acc.n < min_samples {
            out.below_threshold.push(BelowThreshold { symbol: symbol.to_string(), sample_count: acc.n });
            continue;
        }
        let n = acc.n as f64;
        out.rows.push(HourlyAggregate {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            hour_timestamp: hour_start,
            avg_funding_rate: acc.rate / n,
            avg_funding_premium: acc.premium / n,
            avg_mark_price: acc.mark / n,
            avg_underlying_price: (acc.n_underlying > 0).then(|| acc.underlying / acc.n_underlying as f64),
            index_start: acc.min_index,
            index_end: acc.max_index,
            index_delta: acc.max_index - acc.min_index,
            sample_count: acc.n,
        });
    }
    out
}

/// Aggregate every hour touched by `samples`, oldest hour first.
pub fn aggregate_hours(samples: &[MinuteSample], min_samples: u32) -> Vec<(i64, WindowAggregation)> {
    let mut hours: Vec<i64> = samples.iter().map(|s| floor_hour(s.collected_at)).collect();
    hours.sort_unstable();
    hours.dedup();
    hours.into_iter().map(|h| (h, aggregate_window(h, samples, min_samples))).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourReport {
    pub hour_timestamp: i64,
    pub samples_seen: usize,
    pub rows: Vec<HourlyAggregate>,
    pub below_threshold: Vec<BelowThreshold>,
}

impl HourReport {
    pub fn status(&self) -> HourStatus {
        if self.samples_seen == 0 {
            HourStatus::NoData
        } else if self.rows.is_empty() {
            HourStatus::BelowThreshold
        } else {
            HourStatus::Published
        }
    }
}

pub struct HourlyAggregator<S: FundingStore> {
    store: Arc<S>,
    min_samples: u32,
}

impl<S: FundingStore> HourlyAggregator<S> {
    pub fn new(store: Arc<S>, min_samples: u32) -> Self {
        Self { store, min_samples }
    }

    /// Aggregate and upsert one hour. Re-running overwrites, never duplicates.
    pub async fn run_hour(&self, hour_ts: i64) -> Result<HourReport, StoreError> {
        let started = Instant::now();
        let hour = floor_hour(hour_ts);
        let samples = self.store.minute_samples_between(hour, hour + HOUR_MS).await?;
        let agg = aggregate_window(hour, &samples, self.min_samples);
        let report = self.publish(hour, agg).await?;
        metrics::observe_tick("aggregate", started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Aggregate samples fetched from elsewhere (a venue history endpoint)
    /// and upsert one row set per hour they cover.
    pub async fn run_samples(&self, samples: &[MinuteSample]) -> Result<Vec<HourReport>, StoreError> {
        let mut out = Vec::new();
        for (hour, agg) in aggregate_hours(samples, self.min_samples) {
            out.push(self.publish(hour, agg).await?);
        }
        Ok(out)
    }

    async fn publish(&self, hour: i64, agg: WindowAggregation) -> Result<HourReport, StoreError> {
        self.store.upsert_hourly(&agg.rows).await?;

        for b in &agg.below_threshold {
            metrics::hour_below_threshold();
            tracing::info!(
                symbol = %b.symbol, hour, samples = b.sample_count, min = self.min_samples,
                "hour below coverage threshold, not published"
            );
        }
        let report = HourReport {
            hour_timestamp: hour,
            samples_seen: agg.samples_seen,
            rows: agg.rows,
            below_threshold: agg.below_threshold,
        };
        match report.status() {
            HourStatus::NoData => tracing::info!(hour, "no minute samples for hour"),
            status => tracing::info!(
                hour, ?status, published = report.rows.len(), dropped = report.below_threshold.len(),
                "hourly aggregation done"
            ),
        }
        Ok(report)
    }

    /// The most recent hour that has fully closed at `now_ms`.
    pub async fn run_last_closed(&self, now_ms: i64) -> Result<HourReport, StoreError> {
        self.run_hour(floor_hour(now_ms) - HOUR_MS).await
    }

    /// Every whole hour inside `[start_ms, end_ms)`.
    pub async fn run_range(&self, start_ms: i64, end_ms: i64) -> Result<Vec<HourReport>, StoreError> {
        let mut out = Vec::new();
        let mut hour = floor_hour(start_ms);
        while hour + HOUR_MS <= end_ms {
            out.push(self.run_hour(hour).await?);
            hour += HOUR_MS;
        }
        Ok(out)
    }
}
