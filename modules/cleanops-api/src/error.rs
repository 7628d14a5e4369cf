use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use cleanops_common::IngestError;
use cleanops_events::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::query::QueryError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => ApiError::Ingest(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::Ingest(e) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message, "kind": e.kind(), "run_id": e.run_id() })),
            )
                .into_response(),
            ApiError::Query(QueryError::DeadlineExceeded { operation }) => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": message, "kind": "DeadlineExceeded", "operation": operation })),
            )
                .into_response(),
            ApiError::Query(QueryError::RunNotFound { .. }) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Query(QueryError::InvalidRange(_)) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Unavailable(_) => {
                warn!(error = %message, "Service unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(_) => {
                warn!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error" })),
                )
                    .into_response()
            }
        }
    }
}
