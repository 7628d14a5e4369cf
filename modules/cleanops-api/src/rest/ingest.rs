use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use cleanops_common::{ResourceUsage, RunEvent};
use serde_json::json;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::AppState;

/// Validates and appends one run event. Responds with its sequence number.
pub async fn api_append_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RunEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let run_id = event.run_id.clone();
    let kind = event.kind.as_str();

    // Own task so a dropped connection cannot cut an append short.
    let appended = tokio::spawn(async move { store.append(event).await })
        .await
        .map_err(|e| ApiError::Internal(format!("append task failed: {e}")))?;

    match appended {
        Ok(seq) => {
            info!(seq, run_id = run_id.as_str(), kind, "Event appended");
            Ok(Json(json!({ "seq": seq })))
        }
        Err(e) => {
            warn!(run_id = run_id.as_str(), kind, error = %e, "Event rejected");
            Err(e.into())
        }
    }
}

/// Hands a resource sample to the fold loop.
pub async fn api_ingest_telemetry(
    State(state): State<Arc<AppState>>,
    Json(sample): Json<ResourceUsage>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .ingest_telemetry(sample)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(json!({ "accepted": true })))
}
