//! Core types for the event store.

use cleanops_common::{CleanOpsError, IngestError, RunEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A run event as held by the store: the event plus its assigned sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: u64,
    pub event: RunEvent,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Rejected(#[from] IngestError),

    #[error("event journal failed: {0}")]
    Journal(#[from] sqlx::Error),

    #[error("event journal directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("event could not be encoded: {0}")]
    Encode(String),

    #[error("event journal corrupt at seq {seq}: {reason}")]
    Corrupt { seq: i64, reason: String },
}

impl From<StoreError> for CleanOpsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => CleanOpsError::Ingest(e),
            other => CleanOpsError::Journal(other.to_string()),
        }
    }
}
