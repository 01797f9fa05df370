// src/bin/venue_probe.rs
use funding_collector::config::CollectorConfig;
use funding_collector::funding::normalize_batch;
use funding_collector::providers::{self, VenueFetcher};
use funding_collector::types::Exchange;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let exchange: Exchange = std::env::args().nth(1).as_deref().unwrap_or("binance").parse()?;
    let cfg = CollectorConfig::load(None)?;
    let client = providers::http_client(&cfg)?;
    let fetcher = providers::fetcher_for(&cfg, &client, exchange);

    let raws = fetcher.fetch_current().await?;
    let batch = normalize_batch(exchange, &raws);
    for r in &batch.rates {
        println!(
            "{} {:<16} {:>14.8}% {:>12.4}%/yr ts_ms={}",
            exchange,
            r.trading_pair(),
            r.funding_rate_percent(),
            r.annualized_rate_percent(),
            r.collected_at()
        );
    }
    println!("{} rates, {} skipped", batch.rates.len(), batch.skipped.len());
    for e in &batch.skipped {
        println!("  skipped: {e}");
    }
    Ok(())
}
