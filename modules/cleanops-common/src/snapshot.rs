//! The materialized dashboard view and the deltas that move it forward.
//!
//! Field names match what the dashboard UI already reads (`summary`,
//! `recent_runs`, `alerts_summary`, `resource_usage`, `upcoming_schedules`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PipelineRun, RunStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub summary: Summary,
    pub recent_runs: Vec<RecentRun>,
    pub alerts_summary: AlertsSummary,
    pub resource_usage: ResourceUsage,
    pub upcoming_schedules: Vec<UpcomingSchedule>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_pipelines: u64,
    pub active_pipelines: u64,
    pub running_pipelines: u64,
    pub failed_pipelines_24h: u64,
    pub success_rate_24h: f64,
    pub avg_execution_time_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRun {
    pub id: String,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub duration_minutes: f64,
    pub progress_percent: f64,
    pub started_at: DateTime<Utc>,
}

impl RecentRun {
    /// `None` for a run that has not started yet.
    pub fn from_run(run: &PipelineRun) -> Option<Self> {
        Some(Self {
            id: run.run_id.clone(),
            pipeline_id: run.pipeline_id.clone(),
            pipeline_name: run.display_name().to_string(),
            status: run.status,
            duration_minutes: run.elapsed_ms() as f64 / 60_000.0,
            progress_percent: run.progress_percent,
            started_at: run.started_at?,
        })
    }

    /// A running row's duration measured up to `now` instead of its last
    /// event. Finished rows are left alone.
    pub fn elapsed_to(mut self, now: DateTime<Utc>) -> Self {
        if self.status == RunStatus::Running {
            let ms = (now - self.started_at).num_milliseconds().max(0) as f64;
            self.duration_minutes = self.duration_minutes.max(ms / 60_000.0);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertsSummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl AlertsSummary {
    /// Counts unresolved alerts by severity.
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
        let mut summary = Self::default();
        for alert in alerts.into_iter().filter(|a| !a.resolved) {
            match alert.severity {
                AlertSeverity::Critical => summary.critical += 1,
                AlertSeverity::High => summary.high += 1,
                AlertSeverity::Medium => summary.medium += 1,
                AlertSeverity::Low => summary.low += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl ResourceUsage {
    /// Gauges clamped into 0..=100.
    pub fn clamped(self) -> Self {
        Self {
            cpu_percent: self.cpu_percent.clamp(0.0, 100.0),
            memory_percent: self.memory_percent.clamp(0.0, 100.0),
            disk_percent: self.disk_percent.clamp(0.0, 100.0),
        }
    }

    pub fn gauges(&self) -> [(&'static str, f64); 3] {
        [
            ("cpu", self.cpu_percent),
            ("memory", self.memory_percent),
            ("disk", self.disk_percent),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingSchedule {
    pub schedule_name: String,
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub next_run: DateTime<Utc>,
}

// --- Alerts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub pipeline_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

// --- Deltas ---

/// Summary fields that changed; `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pipelines: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pipelines: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_pipelines: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_pipelines_24h: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_execution_time_minutes: Option<f64>,
}

fn changed<T: PartialEq + Copy>(old: T, new: T) -> Option<T> {
    (old != new).then_some(new)
}

impl SummaryDelta {
    pub fn between(old: &Summary, new: &Summary) -> Self {
        Self {
            total_pipelines: changed(old.total_pipelines, new.total_pipelines),
            active_pipelines: changed(old.active_pipelines, new.active_pipelines),
            running_pipelines: changed(old.running_pipelines, new.running_pipelines),
            failed_pipelines_24h: changed(old.failed_pipelines_24h, new.failed_pipelines_24h),
            success_rate_24h: changed(old.success_rate_24h, new.success_rate_24h),
            avg_execution_time_minutes: changed(
                old.avg_execution_time_minutes,
                new.avg_execution_time_minutes,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, summary: &mut Summary) {
        if let Some(v) = self.total_pipelines {
            summary.total_pipelines = v;
        }
        if let Some(v) = self.active_pipelines {
            summary.active_pipelines = v;
        }
        if let Some(v) = self.running_pipelines {
            summary.running_pipelines = v;
        }
        if let Some(v) = self.failed_pipelines_24h {
            summary.failed_pipelines_24h = v;
        }
        if let Some(v) = self.success_rate_24h {
            summary.success_rate_24h = v;
        }
        if let Some(v) = self.avg_execution_time_minutes {
            summary.avg_execution_time_minutes = v;
        }
    }
}

/// Field-level difference between two consecutive dashboard views.
///
/// Sections left empty did not change. `recent_runs` carries upserts, not a
/// replacement list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDelta {
    /// Highest event sequence folded into this view.
    pub watermark: u64,
    /// Aggregation clock when the delta was produced.
    pub as_of: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "SummaryDelta::is_empty")]
    pub summary: SummaryDelta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_runs: Vec<RecentRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts_summary: Option<AlertsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upcoming_schedules: Option<Vec<UpcomingSchedule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Vec<Alert>>,
}

impl SnapshotDelta {
    pub fn new(watermark: u64, as_of: DateTime<Utc>) -> Self {
        Self {
            watermark,
            as_of,
            summary: SummaryDelta::default(),
            recent_runs: Vec::new(),
            alerts_summary: None,
            resource_usage: None,
            upcoming_schedules: None,
            alerts: None,
        }
    }

    /// True when no visible section changed.
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.recent_runs.is_empty()
            && self.alerts_summary.is_none()
            && self.resource_usage.is_none()
            && self.upcoming_schedules.is_none()
            && self.alerts.is_none()
    }
}

impl DashboardSnapshot {
    /// Move this view forward by one delta. Recent runs stay newest-first and
    /// capped at `recent_capacity`.
    pub fn apply(&mut self, delta: &SnapshotDelta, recent_capacity: usize) {
        self.timestamp = Some(delta.as_of);
        delta.summary.apply_to(&mut self.summary);
        for run in &delta.recent_runs {
            upsert_recent(&mut self.recent_runs, run.clone(), recent_capacity);
        }
        if let Some(alerts_summary) = delta.alerts_summary {
            self.alerts_summary = alerts_summary;
        }
        if let Some(resource_usage) = delta.resource_usage {
            self.resource_usage = resource_usage;
        }
        if let Some(schedules) = &delta.upcoming_schedules {
            self.upcoming_schedules = schedules.clone();
        }
        if let Some(alerts) = &delta.alerts {
            self.alerts = alerts.clone();
        }
    }
}

fn upsert_recent(runs: &mut Vec<RecentRun>, run: RecentRun, capacity: usize) {
    if let Some(existing) = runs.iter_mut().find(|r| r.id == run.id) {
        *existing = run;
    } else {
        let pos = runs
            .iter()
            .position(|r| r.started_at < run.started_at)
            .unwrap_or(runs.len());
        runs.insert(pos, run);
    }
    runs.truncate(capacity);
}
