use thiserror::Error;

use crate::types::RunStatus;

/// Why an event was refused at ingestion. Reported to the producer as-is;
/// the core never retries or drops silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("out-of-order event for run {run_id}: {reason}")]
    OutOfOrderEvent { run_id: String, reason: String },

    #[error("duplicate terminal event for run {run_id}")]
    DuplicateTerminal { run_id: String },

    #[error("stale event for run {run_id}: run is already {status}")]
    StaleEvent { run_id: String, status: RunStatus },
}

impl IngestError {
    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfOrderEvent { .. } => "OutOfOrderEvent",
            Self::DuplicateTerminal { .. } => "DuplicateTerminal",
            Self::StaleEvent { .. } => "StaleEvent",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::OutOfOrderEvent { run_id, .. }
            | Self::DuplicateTerminal { run_id }
            | Self::StaleEvent { run_id, .. } => run_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum CleanOpsError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("subscriber {subscriber_id} evicted; reconnect for a full snapshot")]
    SubscriberEvicted { subscriber_id: String },

    #[error("run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Event journal error: {0}")]
    Journal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
