//! Per-run state machine: `Pending -> Running -> {Completed, Failed}`.
//!
//! Shared by the event store (validation at append time) and the aggregator
//! (folding), so both reject exactly the same events.

use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::types::{RunEvent, RunEventKind, RunStatus};

/// Enough of a run's history to validate its next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLifecycle {
    pub pipeline_id: String,
    pub status: RunStatus,
    pub last_event_at: DateTime<Utc>,
}

impl RunLifecycle {
    /// Lifecycle after `event` has been accepted with status `next`.
    pub fn after(event: &RunEvent, next: RunStatus) -> Self {
        Self {
            pipeline_id: event.pipeline_id.clone(),
            status: next,
            last_event_at: event.timestamp,
        }
    }
}

/// Validate `event` against what is known about its run and return the
/// status the run moves to. `prior` is `None` for a run never seen.
pub fn transition(prior: Option<&RunLifecycle>, event: &RunEvent) -> Result<RunStatus, IngestError> {
    let Some(prior) = prior else {
        return match event.kind {
            RunEventKind::Started { .. } => Ok(RunStatus::Running),
            _ => Err(IngestError::OutOfOrderEvent {
                run_id: event.run_id.clone(),
                reason: format!("{} event with no open started event", event.kind.as_str()),
            }),
        };
    };

    if prior.pipeline_id != event.pipeline_id {
        return Err(IngestError::OutOfOrderEvent {
            run_id: event.run_id.clone(),
            reason: format!(
                "run belongs to pipeline {}, event names {}",
                prior.pipeline_id, event.pipeline_id
            ),
        });
    }

    if matches!(event.kind, RunEventKind::Started { .. }) {
        return Err(IngestError::StaleEvent {
            run_id: event.run_id.clone(),
            status: prior.status,
        });
    }

    if prior.status.is_terminal() {
        return Err(if event.kind.is_terminal() {
            IngestError::DuplicateTerminal {
                run_id: event.run_id.clone(),
            }
        } else {
            IngestError::StaleEvent {
                run_id: event.run_id.clone(),
                status: prior.status,
            }
        });
    }

    if event.timestamp < prior.last_event_at {
        return Err(IngestError::OutOfOrderEvent {
            run_id: event.run_id.clone(),
            reason: format!(
                "timestamp {} precedes previous event at {}",
                event.timestamp.to_rfc3339(),
                prior.last_event_at.to_rfc3339()
            ),
        });
    }

    Ok(match event.kind {
        RunEventKind::Completed { .. } => RunStatus::Completed,
        RunEventKind::Failed { .. } => RunStatus::Failed,
        _ => RunStatus::Running,
    })
}
