// src/bin/funding_daemon.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use funding_collector::aggregate::HourlyAggregator;
use funding_collector::api;
use funding_collector::collector::Collector;
use funding_collector::config::CollectorConfig;
use funding_collector::providers::{self, FapiVenue, Lighter, Paradex, SymbolFilter};
use funding_collector::store::SqliteStore;
use funding_collector::types::{floor_hour, Exchange, HOUR_MS};
use funding_collector::view::RateView;

#[derive(Parser, Debug)]
#[command(name = "funding_daemon", version, about = "Collect, integrate and aggregate perpetual funding rates")]
struct Cli {
    /// TOML config file; defaults apply when absent.
    #[arg(long, short, global = true, default_value = "funding.toml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Rate, minute and hourly loops plus the read API (default).
    Run,
    /// One rate tick across all configured venues.
    Collect,
    /// One minute tick.
    Minute,
    /// Aggregate the last closed hour, or every closed hour in `[from, to)`.
    Aggregate {
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
    },
    /// Fetch one instrument's history: settled rates from Binance, Aster or
    /// Lighter; hourly aggregates rebuilt from Paradex's published index.
    Backfill {
        #[arg(long)]
        exchange: Exchange,
        #[arg(long)]
        asset: String,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: Option<i64>,
    },
    /// Only the read API.
    Serve,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `BTC` → `BTC-USD-PERP`; full market names pass through.
fn paradex_market(asset: &str) -> String {
    if asset.contains('-') {
        asset.to_string()
    } else {
        format!("{asset}-USD-PERP")
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut iv = tokio::time::interval(Duration::from_secs(secs));
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

async fn serve(cfg: &CollectorConfig, store: SqliteStore) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    tracing::info!(bind = %cfg.bind, "read API listening");
    axum::serve(listener, api::router(RateView::new(store)))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = CollectorConfig::load(Some(&cli.config))?;
    let store = SqliteStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening {}", cfg.database_url))?;
    let shared = Arc::new(store.clone());

    let fetchers = providers::build_fetchers(&cfg, &cfg.venues)?;
    let minute_fetchers = providers::build_fetchers(&cfg, &cfg.minute_venues)?;
    let collector = Arc::new(
        Collector::new(shared.clone(), fetchers, cfg.collection_timeout()).with_minute_venues(minute_fetchers),
    );
    let aggregator = Arc::new(HourlyAggregator::new(shared.clone(), cfg.min_hourly_samples));

    match cli.cmd.unwrap_or(Cmd::Run) {
        Cmd::Collect => {
            let report = collector.collect_rates().await;
            if report.failures().count() == report.venues.len() && !report.venues.is_empty() {
                anyhow::bail!("every venue failed");
            }
        }
        Cmd::Minute => {
            collector.collect_minute().await;
        }
        Cmd::Aggregate { from: Some(from), to } => {
            let to = to.unwrap_or_else(|| floor_hour(now_ms()));
            let reports = aggregator.run_range(from, to).await?;
            tracing::info!(hours = reports.len(), "range aggregation done");
        }
        Cmd::Aggregate { from: None, .. } => {
            aggregator.run_last_closed(now_ms()).await?;
        }
        Cmd::Backfill { exchange, asset, from, to } => {
            let to = to.unwrap_or_else(now_ms);
            let client = providers::http_client(&cfg)?;
            let http = providers::venue_http(&cfg, &client, exchange);
            let raws = match exchange {
                Exchange::Binance | Exchange::Aster => {
                    FapiVenue::new(http, SymbolFilter::Only(vec![])).fetch_history(&asset, from, to).await?
                }
                Exchange::Lighter => Lighter::new(http).fetch_history(&asset, from, to).await?,
                Exchange::Paradex => {
                    let market = paradex_market(&asset);
                    let samples = Paradex::new(http).fetch_funding_data(&market, from, to).await?;
                    let reports = aggregator.run_samples(&samples).await?;
                    let published: usize = reports.iter().map(|r| r.rows.len()).sum();
                    tracing::info!(%exchange, %market, points = samples.len(), hours = published, "backfill done");
                    return Ok(());
                }
                Exchange::Hyperliquid => anyhow::bail!("{exchange} has no history endpoint"),
            };
            let summary = collector.persist(exchange, &raws).await?;
            tracing::info!(%exchange, %asset, stored = summary.stored, skipped = summary.skipped, "backfill done");
        }
        Cmd::Serve => serve(&cfg, store).await?,
        Cmd::Run => {
            let rates = {
                let collector = collector.clone();
                let mut iv = interval(cfg.rate_interval_secs);
                tokio::spawn(async move {
                    loop {
                        iv.tick().await;
                        collector.collect_rates().await;
                    }
                })
            };
            let minutes = {
                let collector = collector.clone();
                let mut iv = interval(cfg.minute_interval_secs);
                tokio::spawn(async move {
                    loop {
                        iv.tick().await;
                        collector.collect_minute().await;
                    }
                })
            };
            let hourly = {
                let aggregator = aggregator.clone();
                let mut iv = interval(cfg.aggregate_interval_secs);
                tokio::spawn(async move {
                    loop {
                        iv.tick().await;
                        if let Err(e) = aggregator.run_last_closed(now_ms()).await {
                            tracing::error!(error = %e, hour = floor_hour(now_ms()) - HOUR_MS, "hourly aggregation failed");
                        }
                    }
                })
            };
            let res = serve(&cfg, store).await;
            rates.abort();
            minutes.abort();
            hourly.abort();
            res?;
        }
    }
    Ok(())
}
