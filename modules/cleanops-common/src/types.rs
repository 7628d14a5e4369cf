use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::lifecycle::{self, RunLifecycle};

// --- Run events ---

/// A lifecycle fact about one pipeline run, as reported by an executor.
/// Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEventKind {
    Started {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pipeline_name: Option<String>,
    },
    Progressed {
        progress_percent: f64,
    },
    Completed {
        duration_ms: u64,
    },
    Failed {
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progressed { .. } => "progressed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl RunEvent {
    pub fn started(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            timestamp,
            kind: RunEventKind::Started { pipeline_name: None },
        }
    }

    pub fn progressed(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        progress_percent: f64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            timestamp,
            kind: RunEventKind::Progressed { progress_percent },
        }
    }

    pub fn completed(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            timestamp,
            kind: RunEventKind::Completed {
                duration_ms: duration_to_ms(duration),
            },
        }
    }

    pub fn failed(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            timestamp,
            kind: RunEventKind::Failed {
                duration_ms: duration_to_ms(duration),
                error: None,
            },
        }
    }

    pub fn with_pipeline_name(mut self, name: impl Into<String>) -> Self {
        if let RunEventKind::Started { pipeline_name } = &mut self.kind {
            *pipeline_name = Some(name.into());
        }
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        if let RunEventKind::Failed { error, .. } = &mut self.kind {
            *error = Some(message.into());
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    duration.num_milliseconds().max(0) as u64
}

// --- Run status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Completed and Failed absorb every later event.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Derived run ---

/// A pipeline run reconstructed by folding its events. Never mutated except
/// through [`PipelineRun::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline_id: String,
    pub pipeline_name: Option<String>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub progress_percent: f64,
    pub error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn pending(run_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            pipeline_name: None,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            progress_percent: 0.0,
            error: None,
            last_event_at: None,
        }
    }

    /// Lifecycle view used for validation. `None` while the run is Pending.
    pub fn lifecycle(&self) -> Option<RunLifecycle> {
        if self.status == RunStatus::Pending {
            return None;
        }
        Some(RunLifecycle {
            pipeline_id: self.pipeline_id.clone(),
            status: self.status,
            last_event_at: self.last_event_at.unwrap_or_default(),
        })
    }

    /// Fold one event into the run. A rejected event leaves the run untouched.
    pub fn apply(&mut self, event: &RunEvent) -> Result<(), IngestError> {
        let next = lifecycle::transition(self.lifecycle().as_ref(), event)?;

        match &event.kind {
            RunEventKind::Started { pipeline_name } => {
                self.pipeline_name = pipeline_name.clone();
                self.started_at = Some(event.timestamp);
            }
            RunEventKind::Progressed { progress_percent } => {
                self.progress_percent = progress_percent.clamp(0.0, 100.0);
            }
            RunEventKind::Completed { duration_ms } => {
                self.duration_ms = Some(*duration_ms);
                self.finished_at = Some(event.timestamp);
                self.progress_percent = 100.0;
            }
            RunEventKind::Failed { duration_ms, error } => {
                self.duration_ms = Some(*duration_ms);
                self.finished_at = Some(event.timestamp);
                self.error = error.clone();
            }
        }

        self.status = next;
        self.last_event_at = Some(event.timestamp);
        Ok(())
    }

    /// Rebuild a run from its events in order. Returns `None` for an empty
    /// sequence.
    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a RunEvent>,
    ) -> Result<Option<PipelineRun>, IngestError> {
        let mut run: Option<PipelineRun> = None;
        for event in events {
            let current = run.get_or_insert_with(|| {
                PipelineRun::pending(event.run_id.clone(), event.pipeline_id.clone())
            });
            current.apply(event)?;
        }
        Ok(run)
    }

    /// Reported duration: the recorded one once finished, otherwise the time
    /// elapsed between the start and the latest event.
    pub fn elapsed_ms(&self) -> u64 {
        if let Some(ms) = self.duration_ms {
            return ms;
        }
        match (self.started_at, self.last_event_at) {
            (Some(start), Some(last)) => (last - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    pub fn display_name(&self) -> &str {
        self.pipeline_name.as_deref().unwrap_or(&self.pipeline_id)
    }
}
