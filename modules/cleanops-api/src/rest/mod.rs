pub mod ingest;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::header::HeaderName,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cleanops_common::AlertSeverity;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::query::{
    Aggregation, AlertFilter, MetricType, MetricsRequest, TimeRange, DEFAULT_ALERT_LIMIT, MAX_ALERT_LIMIT,
};
use crate::AppState;

pub const SNAPSHOT_VERSION_HEADER: HeaderName = HeaderName::from_static("x-snapshot-version");

// --- Query structs ---

#[derive(Deserialize)]
pub struct DeadlineQuery {
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct PerformanceQuery {
    pipeline_id: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    /// Trailing days ending at `until`, or now. Excludes `since`.
    days: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    metric_type: MetricType,
    pipeline_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    aggregation: Aggregation,
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    severity: Option<String>,
    pipeline_id: Option<String>,
    resolved: Option<bool>,
    limit: Option<usize>,
    timeout_ms: Option<u64>,
}

// --- Helpers ---

fn deadline(timeout_ms: Option<u64>) -> Option<Instant> {
    timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms))
}

/// Runs a store replay on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("query task failed: {e}")))?
}

// --- Handlers ---

/// The dashboard view itself; its version travels in `x-snapshot-version`.
pub async fn api_snapshot(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadlineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let current = state.queries.get_snapshot(deadline(params.timeout_ms))?;
    let version = current.version.to_string();
    Ok(([(SNAPSHOT_VERSION_HEADER, version)], Json(current.snapshot.clone())))
}

pub async fn api_run_history(
    State(state): State<Arc<AppState>>,
    Path(pipeline_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let range = TimeRange::new(params.since, params.until)?;
    let deadline = deadline(params.timeout_ms);
    let queries = state.queries.clone();
    let runs = blocking(move || Ok(queries.get_run_history(&pipeline_id, &range, deadline)?)).await?;
    Ok(Json(json!({ "runs": runs, "count": runs.len() })))
}

pub async fn api_run(
    State(state): State<Arc<AppState>>,
    Path((pipeline_id, run_id)): Path<(String, String)>,
    Query(params): Query<DeadlineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let deadline = deadline(params.timeout_ms);
    let queries = state.queries.clone();
    let run = blocking(move || Ok(queries.get_run(&pipeline_id, &run_id, deadline)?)).await?;
    Ok(Json(run))
}

pub async fn api_performance(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PerformanceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let range = match params.days {
        Some(_) if params.since.is_some() => {
            return Err(ApiError::BadRequest("days and since cannot be combined".to_string()));
        }
        Some(0) => return Err(ApiError::BadRequest("days must be at least 1".to_string())),
        Some(days) => {
            let end = params.until.unwrap_or_else(Utc::now);
            TimeRange::new(Some(end - ChronoDuration::days(i64::from(days))), Some(end))?
        }
        None => TimeRange::new(params.since, params.until)?,
    };
    let deadline = deadline(params.timeout_ms);
    let queries = state.queries.clone();
    let mut report = blocking(move || {
        Ok(queries.get_performance(params.pipeline_id.as_deref(), &range, deadline)?)
    })
    .await?;
    report.analysis_period.days = params.days;
    Ok(Json(report))
}

/// Time series of one run or resource metric, bucketed by `aggregation`.
pub async fn api_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = MetricsRequest::new(
        params.metric_type,
        params.pipeline_id,
        params.start_time,
        params.end_time,
        params.aggregation,
        Utc::now(),
    )?;
    let deadline = deadline(params.timeout_ms);
    let queries = state.queries.clone();
    let series = blocking(move || Ok(queries.get_metrics(&request, deadline)?)).await?;
    Ok(Json(series))
}

pub async fn api_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let severity = params
        .severity
        .as_deref()
        .map(str::parse::<AlertSeverity>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = params.limit.unwrap_or(DEFAULT_ALERT_LIMIT);
    if limit == 0 || limit > MAX_ALERT_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_ALERT_LIMIT}"
        )));
    }

    let filter = AlertFilter {
        severity,
        pipeline_id: params.pipeline_id,
        resolved: params.resolved,
        limit,
    };
    let alerts = state.queries.list_alerts(&filter, deadline(params.timeout_ms))?;
    Ok(Json(alerts))
}

/// Per-component status. The fold loop reports how far it trails the store.
pub async fn api_system_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let current = state.hub.cache().current();
    let latest_seq = state.store.latest_seq();
    let watermark = state.engine.watermark();
    let (status, fold_status) = if state.engine.is_running() {
        ("healthy", "healthy")
    } else {
        ("degraded", "stopped")
    };

    Json(json!({
        "status": status,
        "timestamp": Utc::now(),
        "components": {
            "event_store": {
                "status": "healthy",
                "latest_seq": latest_seq,
                "journaled": state.store.is_journaled(),
            },
            "fold_loop": {
                "status": fold_status,
                "watermark": watermark,
                "lag": latest_seq.saturating_sub(watermark),
            },
            "live": {
                "status": "healthy",
                "snapshot_version": current.version,
                "subscribers": state.hub.subscriber_count(),
                "awaiting_ack": state.hub.awaiting_ack_count(),
            },
            "scheduler": {
                "status": "healthy",
                "upcoming_schedules": current.snapshot.upcoming_schedules.len(),
            },
        },
        "resource_usage": current.snapshot.resource_usage,
    }))
}

pub async fn api_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let current = state.hub.cache().current();
    Json(json!({
        "status": "ok",
        "latest_seq": state.store.latest_seq(),
        "snapshot_version": current.version,
        "watermark_as_of": current.snapshot.timestamp,
        "subscribers": state.hub.subscriber_count(),
    }))
}
