// src/api.rs
use std::str::FromStr;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics;
use crate::store::StoreError;
use crate::types::{Exchange, HOUR_MS};
use crate::view::{RangeQuery, RateView};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad_request: {0}")]
    BadRequest(String),
    #[error("store_unavailable: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                tracing::error!(error = %e, "read query failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_exchange(raw: Option<&str>) -> Result<Option<Exchange>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| Exchange::from_str(s).map_err(|e| ApiError::BadRequest(e.to_string())))
        .transpose()
}

/// Ten years.
const MAX_HOURS: i64 = 24 * 365 * 10;

fn positive_hours(hours: Option<i64>) -> Result<i64, ApiError> {
    match hours.unwrap_or(24) {
        h if h > 0 && h <= MAX_HOURS => Ok(h),
        h if h > MAX_HOURS => Err(ApiError::BadRequest(format!("hours must be at most {MAX_HOURS}, got {h}"))),
        h => Err(ApiError::BadRequest(format!("hours must be positive, got {h}"))),
    }
}

/// `[end - hours, end)`, or a 400 if that start falls off the timeline.
fn lookback(end_ms: i64, hours: i64) -> Result<i64, ApiError> {
    hours
        .checked_mul(HOUR_MS)
        .and_then(|span| end_ms.checked_sub(span))
        .ok_or_else(|| ApiError::BadRequest(format!("hours {hours} is out of range")))
}

fn parse_date(field: &str, raw: &str) -> Result<i64, ApiError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|d| d.timestamp_millis())
        .map_err(|e| ApiError::BadRequest(format!("{field} {raw:?} is not an ISO-8601 timestamp: {e}")))
}

/// Resolve the explicit range, epoch millis taking precedence over ISO dates.
fn explicit_range(p: &HistoryParams) -> Result<(Option<i64>, Option<i64>), ApiError> {
    let start = match (p.start_time, p.start_date.as_deref()) {
        (Some(ms), _) => Some(ms),
        (None, Some(d)) => Some(parse_date("startDate", d)?),
        (None, None) => None,
    };
    let end = match (p.end_time, p.end_date.as_deref()) {
        (Some(ms), _) => Some(ms),
        (None, Some(d)) => Some(parse_date("endDate", d)?),
        (None, None) => None,
    };
    Ok((start, end))
}

// ── Query params ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RatesParams {
    exchange: Option<String>,
    symbol: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompareParams {
    symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestParams {
    exchange: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    symbol: Option<String>,
    exchange: Option<String>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
    hours: Option<i64>,
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HourlyParams {
    symbol: Option<String>,
    hours: Option<i64>,
}

// ── Routes ───────────────────────────────────────────────────────────────

pub fn router(view: RateView) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rates", get(rates))
        .route("/compare", get(compare))
        .route("/latest", get(latest))
        .route("/history", get(history))
        .route("/hourly", get(hourly))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_text))
        .with_state(view)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": now_ms() }))
}

async fn rates(State(view): State<RateView>, Query(p): Query<RatesParams>) -> ApiResult {
    let exchange = parse_exchange(p.exchange.as_deref())?;
    let rows = view.recent(exchange, p.symbol.as_deref(), p.limit).await?;
    Ok(Json(rows).into_response())
}

async fn compare(State(view): State<RateView>, Query(p): Query<CompareParams>) -> ApiResult {
    let symbol = p.symbol.filter(|s| !s.is_empty()).unwrap_or_else(|| "BTC".to_string());
    let rows = view.latest_per_exchange(&symbol).await?;
    Ok(Json(json!({ "symbol": symbol, "exchanges": rows, "timestamp": now_ms() })).into_response())
}

async fn latest(State(view): State<RateView>, Query(p): Query<LatestParams>) -> ApiResult {
    let exchange = parse_exchange(p.exchange.as_deref())?;
    let rows = view.latest_per_exchange_symbol(exchange).await?;
    Ok(Json(rows).into_response())
}

async fn history(State(view): State<RateView>, Query(p): Query<HistoryParams>) -> ApiResult {
    let exchange = parse_exchange(p.exchange.as_deref())?;
    let now = now_ms();
    let (start_ms, end_ms, hours) = match explicit_range(&p)? {
        (Some(s), Some(e)) if s < e => (s, e, None),
        (Some(s), Some(e)) => {
            return Err(ApiError::BadRequest(format!("range start {s} must be before end {e}")));
        }
        (None, None) => {
            let h = positive_hours(p.hours)?;
            (lookback(now, h)?, now, Some(h))
        }
        _ => return Err(ApiError::BadRequest("range start and end must be given together".into())),
    };
    let q = RangeQuery { start_ms, end_ms, exchange, symbol: p.symbol.clone(), limit: p.limit };
    let rows = view.rates_between(&q).await?;
    let mut body = json!({
        "symbol": p.symbol.as_deref().unwrap_or("all"),
        "exchange": exchange.map(Exchange::as_str).unwrap_or("all"),
        "count": rows.len(),
        "startTime": start_ms,
        "endTime": end_ms,
        "results": rows,
        "timestamp": now,
    });
    if let Some(h) = hours {
        body["hours"] = json!(h);
    }
    Ok(Json(body).into_response())
}

async fn hourly(State(view): State<RateView>, Query(p): Query<HourlyParams>) -> ApiResult {
    let hours = positive_hours(p.hours)?;
    let end = now_ms();
    let rows = view.hourly_between(p.symbol.as_deref(), lookback(end, hours)?, end).await?;
    Ok(Json(json!({
        "symbol": p.symbol.as_deref().unwrap_or("all"),
        "hours": hours,
        "count": rows.len(),
        "results": rows,
    }))
    .into_response())
}

async fn stats(State(view): State<RateView>) -> ApiResult {
    let rows = view.stats().await?;
    Ok(Json(json!({ "exchanges": rows, "timestamp": now_ms() })).into_response())
}

async fn prometheus_text() -> Response {
    match metrics::render() {
        Some(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
