use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use funding_collector::api;
use funding_collector::store::{FundingStore, SqliteStore};
use funding_collector::types::{CanonicalRate, Exchange};
use funding_collector::view::RateView;

async fn app() -> axum::Router {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .append_rates(&[
            CanonicalRate::new(Exchange::Binance, "BTC", "BTCUSDT", 0.0001, 10),
            CanonicalRate::new(Exchange::Binance, "BTC", "BTCUSDT", 0.0002, 20),
            CanonicalRate::new(Exchange::Hyperliquid, "BTC", "BTC", 0.00001, 15),
        ])
        .await
        .unwrap();
    api::router(RateView::new(store))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let resp = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_is_ok() {
    let (status, body) = get(app().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn compare_returns_one_row_per_exchange() {
    let (status, body) = get(app().await, "/compare?symbol=BTC").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["exchanges"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["exchange"], "binance");
    assert_eq!(rows[0]["collectedAt"], 20);
    assert_eq!(rows[1]["exchange"], "hyperliquid");
    assert_eq!(rows[1]["collectedAt"], 15);
}

#[tokio::test]
async fn history_uses_half_open_range() {
    let (status, body) = get(app().await, "/history?startTime=10&endTime=20").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["exchange"], "all");
    let ts: Vec<_> = body["results"].as_array().unwrap().iter().map(|r| r["collectedAt"].as_i64().unwrap()).collect();
    assert_eq!(ts, vec![15, 10]);
}

#[tokio::test]
async fn rates_filter_by_exchange() {
    let (status, body) = get(app().await, "/rates?exchange=binance&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["collectedAt"], 20);
    assert_eq!(rows[0]["tradingPair"], "BTCUSDT");
}

#[tokio::test]
async fn bad_parameters_are_rejected() {
    let (status, body) = get(app().await, "/rates?exchange=kraken").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("kraken"));

    let (status, _) = get(app().await, "/history?startTime=20&endTime=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app().await, "/history?startTime=20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app().await, "/hourly?hours=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_results_are_ok() {
    let (status, body) = get(app().await, "/hourly?symbol=BTC").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, body) = get(app().await, "/latest?exchange=paradex").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(vec![]));
}

#[tokio::test]
async fn stats_summarise_each_exchange() {
    let (status, body) = get(app().await, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["exchanges"].as_array().unwrap();
    assert_eq!(rows[0]["exchange"], "binance");
    assert_eq!(rows[0]["records"], 2);
}

#[tokio::test]
async fn oversized_lookback_is_rejected() {
    let (status, body) = get(app().await, "/hourly?hours=9000000000000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("hours"));

    let (status, _) = get(app().await, "/history?hours=9000000000000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(app().await, "/hourly?hours=87600").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hours"], 87600);
}

#[tokio::test]
async fn history_accepts_iso_dates() {
    let (status, body) =
        get(app().await, "/history?startDate=1970-01-01T00:00:00.010Z&endDate=1970-01-01T00:00:00.020Z").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["startTime"], 10);
    assert_eq!(body["endTime"], 20);
    assert_eq!(body["count"], 2);

    let (status, body) = get(app().await, "/history?startTime=10&endDate=1970-01-01T00:00:00.016Z").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = get(app().await, "/history?startDate=yesterday&endDate=1970-01-01T00:00:00.020Z").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("startDate"));
}
