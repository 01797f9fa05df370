// src/index/mod.rs
//! Cumulative funding index reconstruction for venues that only report an
//! instantaneous premium.
pub mod integrator;

pub use integrator::{FundingIndexIntegrator, IntegratedBatch, IntegrationStep};
