// src/collector.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::funding::{normalize_batch, premium_batch};
use crate::index::FundingIndexIntegrator;
use crate::metrics;
use crate::providers::{VenueError, VenueFetcher};
use crate::recorder::MinuteSampleRecorder;
use crate::store::{FundingStore, StoreError};
use crate::types::{Exchange, RawSample};

#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VenueSummary {
    pub fetched: usize,
    pub stored: u64,
    pub skipped: usize,
    pub cold_starts: usize,
    pub anomalies: usize,
    pub invalid: usize,
    pub failed_writes: usize,
}

#[derive(Debug)]
pub struct VenueOutcome {
    pub exchange: Exchange,
    pub result: Result<VenueSummary, CollectError>,
}

#[derive(Debug)]
pub struct TickReport {
    pub kind: &'static str,
    pub venues: Vec<VenueOutcome>,
}

impl TickReport {
    pub fn stored(&self) -> u64 {
        self.venues.iter().filter_map(|v| v.result.as_ref().ok()).map(|s| s.stored).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &VenueOutcome> {
        self.venues.iter().filter(|v| v.result.is_err())
    }

    pub fn outcome(&self, exchange: Exchange) -> Option<&VenueOutcome> {
        self.venues.iter().find(|v| v.exchange == exchange)
    }

    fn log(&self, elapsed: Duration) {
        let failed = self.failures().count();
        tracing::info!(
            kind = self.kind, venues = self.venues.len(), failed, stored = self.stored(), ?elapsed,
            "collection tick done"
        );
    }
}

/// Drives rate and minute ticks against a set of venue fetchers.
pub struct Collector<S: FundingStore> {
    store: Arc<S>,
    fetchers: Vec<Arc<dyn VenueFetcher>>,
    minute_fetchers: Vec<Arc<dyn VenueFetcher>>,
    timeout: Duration,
    recorder: MinuteSampleRecorder<S>,
    minute_lock: Mutex<()>,
}

impl<S: FundingStore> Collector<S> {
    pub fn new(store: Arc<S>, fetchers: Vec<Arc<dyn VenueFetcher>>, timeout: Duration) -> Self {
        Self {
            recorder: MinuteSampleRecorder::new(store.clone()),
            store,
            fetchers,
            minute_fetchers: Vec::new(),
            timeout,
            minute_lock: Mutex::new(()),
        }
    }

    /// Venues sampled on the minute tick for index integration.
    pub fn with_minute_venues(mut self, fetchers: Vec<Arc<dyn VenueFetcher>>) -> Self {
        self.minute_fetchers = fetchers;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn fetch(&self, fetcher: &dyn VenueFetcher) -> Result<Vec<RawSample>, VenueError> {
        let exchange = fetcher.exchange();
        match tokio::time::timeout(self.timeout, fetcher.fetch_current()).await {
            Ok(res) => res,
            Err(_) => Err(VenueError::Timeout { exchange, after: self.timeout }),
        }
    }

    /// Normalize `raws` and persist both the audit copy and the canonical rates.
    pub async fn persist(&self, exchange: Exchange, raws: &[RawSample]) -> Result<VenueSummary, StoreError> {
        let batch = normalize_batch(exchange, raws);
        self.store.append_originals(exchange, raws).await?;
        let stored = self.store.append_rates(&batch.rates).await?;
        Ok(VenueSummary { fetched: raws.len(), stored, skipped: batch.skipped.len(), ..Default::default() })
    }

    async fn collect_venue(&self, fetcher: &dyn VenueFetcher) -> Result<VenueSummary, CollectError> {
        let raws = self.fetch(fetcher).await?;
        Ok(self.persist(fetcher.exchange(), &raws).await?)
    }

    /// Fetch every venue concurrently and store what each returns. A venue
    /// that fails or times out is reported and does not affect the others.
    pub async fn collect_rates(&self) -> TickReport {
        let started = Instant::now();
        let futs = self.fetchers.iter().map(|f| async move {
            let exchange = f.exchange();
            let result = self.collect_venue(f.as_ref()).await;
            match &result {
                Ok(s) => tracing::info!(%exchange, fetched = s.fetched, stored = s.stored, skipped = s.skipped, "venue collected"),
                Err(e) => {
                    metrics::venue_failure(exchange);
                    tracing::error!(%exchange, error = %e, "venue collection failed");
                }
            }
            VenueOutcome { exchange, result }
        });
        let report = TickReport { kind: "rates", venues: join_all(futs).await };
        report.log(started.elapsed());
        metrics::observe_tick("rates", started.elapsed().as_secs_f64());
        report
    }

    async fn sample_venue(&self, fetcher: &dyn VenueFetcher) -> Result<VenueSummary, CollectError> {
        let exchange = fetcher.exchange();
        let raws = self.fetch(fetcher).await?;
        let batch = premium_batch(exchange, &raws);
        let prior = self.store.latest_index_points().await?;
        let integrated =
            FundingIndexIntegrator::for_exchange(exchange).integrate(exchange, &batch.observations, |s| prior.get(s).copied());
        let report = self.recorder.record(&integrated.samples).await;
        let summary = VenueSummary {
            fetched: raws.len(),
            stored: report.written as u64,
            skipped: batch.skipped.len(),
            cold_starts: integrated.cold_starts,
            anomalies: integrated.anomalies,
            invalid: report.invalid.len(),
            failed_writes: report.failed.len(),
        };
        if report.store_down() {
            if let Some((_, e)) = report.failed.into_iter().next() {
                return Err(CollectError::Store(e));
            }
        }
        Ok(summary)
    }

    /// One minute tick: sample premiums, extend each symbol's index, record.
    /// Ticks never overlap; a tick that arrives early waits for the previous one.
    pub async fn collect_minute(&self) -> TickReport {
        let _guard = self.minute_lock.lock().await;
        let started = Instant::now();
        let mut venues = Vec::with_capacity(self.minute_fetchers.len());
        for f in &self.minute_fetchers {
            let exchange = f.exchange();
            let result = self.sample_venue(f.as_ref()).await;
            match &result {
                Ok(s) => tracing::info!(
                    %exchange, samples = s.stored, cold_starts = s.cold_starts, anomalies = s.anomalies,
                    failed = s.failed_writes, "minute samples recorded"
                ),
                Err(e) => {
                    metrics::venue_failure(exchange);
                    tracing::error!(%exchange, error = %e, "minute sampling failed");
                }
            }
            venues.push(VenueOutcome { exchange, result });
        }
        let report = TickReport { kind: "minute", venues };
        report.log(started.elapsed());
        metrics::observe_tick("minute", started.elapsed().as_secs_f64());
        report
    }
}
