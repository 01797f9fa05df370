// src/index/integrator.rs
use std::collections::HashMap;

use crate::metrics;
use crate::types::{Exchange, IndexPoint, MinuteSample, PremiumObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStep {
    /// No prior point for the symbol; index starts at 0.
    ColdStart,
    Integrated { elapsed_ms: i64 },
    /// Non-positive elapsed time; prior index carried forward unchanged.
    CarriedForward { elapsed_ms: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct FundingIndexIntegrator {
    pub settlement_period_secs: u32,
}

#[derive(Debug, Clone, Default)]
pub struct IntegratedBatch {
    pub samples: Vec<MinuteSample>,
    pub cold_starts: usize,
    pub anomalies: usize,
}

impl FundingIndexIntegrator {
    pub fn new(settlement_period_secs: u32) -> Self {
        Self { settlement_period_secs: settlement_period_secs.max(1) }
    }

    pub fn for_exchange(exchange: Exchange) -> Self {
        Self::new(exchange.convention().settlement_period_secs())
    }

    /// `index_new = index_prev + premium * elapsed_secs / settlement_secs`.
    ///
    /// A long gap (collection outage) is integrated linearly with the current
    /// premium; rate changes inside the gap are not reconstructed.
    pub fn step(&self, prev: Option<IndexPoint>, premium: f64, ts_ms: i64) -> (f64, IntegrationStep) {
        let Some(prev) = prev else {
            return (0.0, IntegrationStep::ColdStart);
        };
        let elapsed_ms = ts_ms - prev.ts_ms;
        if elapsed_ms <= 0 {
            return (prev.index, IntegrationStep::CarriedForward { elapsed_ms });
        }
        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        let index = prev.index + premium * elapsed_secs / self.settlement_period_secs as f64;
        (index, IntegrationStep::Integrated { elapsed_ms })
    }

    /// Integrate a tick's observations. `prior` returns the most recent stored
    /// point for a symbol; repeated symbols within the batch chain off each other.
    pub fn integrate<F>(
        &self,
        exchange: Exchange,
        observations: &[PremiumObservation],
        prior: F,
    ) -> IntegratedBatch
    where
        F: Fn(&str) -> Option<IndexPoint>,
    {
        let mut latest: HashMap<&str, IndexPoint> = HashMap::new();
        let mut out = IntegratedBatch { samples: Vec::with_capacity(observations.len()), ..Default::default() };

        for obs in observations {
            let prev = latest.get(obs.symbol.as_str()).copied().or_else(|| prior(&obs.symbol));
            let (index, step) = self.step(prev, obs.funding_premium, obs.collected_at);
            let point = IndexPoint { index, ts_ms: obs.collected_at };
            match step {
                IntegrationStep::ColdStart => {
                    out.cold_starts += 1;
                    latest.insert(obs.symbol.as_str(), point);
                }
                IntegrationStep::Integrated { .. } => {
                    latest.insert(obs.symbol.as_str(), point);
                }
                IntegrationStep::CarriedForward { elapsed_ms } => {
                    out.anomalies += 1;
                    metrics::integration_anomaly(exchange);
                    tracing::debug!(%exchange, symbol = %obs.symbol, elapsed_ms, "non-positive elapsed time, index carried forward");
                    if let Some(p) = prev {
                        latest.insert(obs.symbol.as_str(), p);
                    }
                }
            }
            out.samples.push(MinuteSample {
                symbol: obs.symbol.clone(),
                base_asset: obs.base_asset.clone(),
                funding_rate: obs.funding_rate,
                funding_premium: obs.funding_premium,
                cumulative_index: index,
                mark_price: obs.mark_price,
                underlying_price: obs.underlying_price,
                collected_at: obs.collected_at,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(symbol: &str, premium: f64, ts_ms: i64) -> PremiumObservation {
        PremiumObservation {
            symbol: symbol.into(),
            base_asset: symbol.split('-').next().unwrap().into(),
            funding_rate: premium,
            funding_premium: premium,
            mark_price: 100.0,
            underlying_price: None,
            collected_at: ts_ms,
        }
    }

    #[test]
    fn cold_start_is_zero() {
        let i = FundingIndexIntegrator::new(28_800);
        assert_eq!(i.step(None, 0.001, 5), (0.0, IntegrationStep::ColdStart));
    }

    #[test]
    fn one_hour_of_eight_hour_premium() {
        let i = FundingIndexIntegrator::for_exchange(Exchange::Paradex);
        assert_eq!(i.settlement_period_secs, 28_800);
        let prev = IndexPoint { index: 0.0, ts_ms: 0 };
        let (index, step) = i.step(Some(prev), 0.00008, 3_600_000);
        assert_eq!(step, IntegrationStep::Integrated { elapsed_ms: 3_600_000 });
        assert_eq!(index, 0.00008 * 3600.0 / 28800.0);
        assert!((index - 0.00001).abs() < 1e-18);
    }

    #[test]
    fn non_positive_elapsed_carries_index_forward() {
        let i = FundingIndexIntegrator::new(28_800);
        let prev = IndexPoint { index: 0.42, ts_ms: 10_000 };
        assert_eq!(i.step(Some(prev), 0.5, 10_000).0, 0.42);
        assert_eq!(i.step(Some(prev), 0.5, 9_000).0, 0.42);
        assert!(matches!(
            i.step(Some(prev), 0.5, 9_000).1,
            IntegrationStep::CarriedForward { elapsed_ms: -1000 }
        ));
    }

    #[test]
    fn negative_premium_decreases_index() {
        let i = FundingIndexIntegrator::new(3600);
        let prev = IndexPoint { index: 1.0, ts_ms: 0 };
        let (index, _) = i.step(Some(prev), -0.5, 3_600_000);
        assert_eq!(index, 0.5);
    }

    #[test]
    fn long_gap_is_linear() {
        let i = FundingIndexIntegrator::new(28_800);
        let prev = IndexPoint { index: 0.0, ts_ms: 0 };
        let (one_day, _) = i.step(Some(prev), 0.0001, 86_400_000);
        assert!((one_day - 0.0003).abs() < 1e-15);
    }

    #[test]
    fn batch_uses_prior_lookup_and_chains_repeats() {
        let i = FundingIndexIntegrator::new(28_800);
        let observations = vec![
            obs("BTC-USD-PERP", 0.00008, 3_600_000),
            obs("ETH-USD-PERP", 0.0001, 3_600_000),
            obs("BTC-USD-PERP", 0.00008, 7_200_000),
        ];
        let out = i.integrate(Exchange::Paradex, &observations, |s| {
            (s == "BTC-USD-PERP").then_some(IndexPoint { index: 0.0, ts_ms: 0 })
        });
        assert_eq!(out.samples.len(), 3);
        assert_eq!(out.cold_starts, 1);
        assert_eq!(out.anomalies, 0);
        assert!((out.samples[0].cumulative_index - 0.00001).abs() < 1e-18);
        assert_eq!(out.samples[1].cumulative_index, 0.0);
        assert!((out.samples[2].cumulative_index - 0.00002).abs() < 1e-18);
        assert_eq!(out.samples[2].base_asset, "BTC");
    }

    #[test]
    fn batch_counts_anomalies_for_duplicate_ticks() {
        let i = FundingIndexIntegrator::new(28_800);
        let observations = vec![obs("BTC-USD-PERP", 0.001, 1_000), obs("BTC-USD-PERP", 0.001, 1_000)];
        let out = i.integrate(Exchange::Paradex, &observations, |_| Some(IndexPoint { index: 0.3, ts_ms: 2_000 }));
        assert_eq!(out.anomalies, 2);
        assert!(out.samples.iter().all(|s| s.cumulative_index == 0.3));
    }
}
