pub mod error;
pub mod live;
pub mod query;
pub mod rest;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use cleanops_engine::EngineHandle;
use cleanops_events::EventStore;
use cleanops_live::SubscriptionHub;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use query::{
    Aggregation, AlertFilter, AlertList, AnalysisPeriod, MetricPoint, MetricType, MetricsRequest, MetricsSeries,
    PerformanceMetrics, PerformanceReport, QueryError, QueryService, TimeRange,
};

pub struct AppState {
    pub store: EventStore,
    pub queries: QueryService,
    pub hub: SubscriptionHub,
    pub engine: EngineHandle,
}

impl AppState {
    pub fn new(store: EventStore, hub: SubscriptionHub, engine: EngineHandle) -> Self {
        let queries = QueryService::new(store.clone(), hub.cache().clone());
        Self {
            store,
            queries,
            hub,
            engine,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(rest::api_health))
        .route("/events", post(rest::ingest::api_append_event))
        .route("/telemetry", post(rest::ingest::api_ingest_telemetry))
        .route("/dashboard/snapshot", get(rest::api_snapshot))
        .route("/dashboard/live", get(live::dashboard_live))
        .route("/pipelines/{pipeline_id}/runs", get(rest::api_run_history))
        .route("/pipelines/{pipeline_id}/runs/{run_id}", get(rest::api_run))
        .route("/monitoring/performance", get(rest::api_performance))
        .route("/monitoring/alerts", get(rest::api_alerts))
        .route("/monitoring/metrics", get(rest::api_metrics))
        .route("/monitoring/system-health", get(rest::api_system_health))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}
