//! Read-only queries over the snapshot cache and the event store.
//!
//! Snapshot reads are a pointer load. History, run, performance, and metric
//! reads replay the store; they check the caller's deadline as they go and
//! give up with `DeadlineExceeded` instead of running on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cleanops_common::{Alert, AlertSeverity, CleanOpsError, PipelineRun, RunStatus};
use cleanops_engine::{Outcome, RollingWindow, WindowTotals};
use cleanops_events::EventStore;
use cleanops_live::{SnapshotCache, VersionedSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Replayed events between deadline checks.
const DEADLINE_CHECK_INTERVAL: usize = 64;

pub const DEFAULT_ALERT_LIMIT: usize = 50;
pub const MAX_ALERT_LIMIT: usize = 100;

/// Most buckets a single metrics request may ask for.
pub const MAX_METRIC_POINTS: i64 = 2_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("run {run_id} not found in pipeline {pipeline_id}")]
    RunNotFound { pipeline_id: String, run_id: String },

    #[error("invalid time range: {0}")]
    InvalidRange(String),
}

impl From<QueryError> for CleanOpsError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::DeadlineExceeded { operation } => CleanOpsError::DeadlineExceeded { operation },
            QueryError::RunNotFound { run_id, .. } => CleanOpsError::RunNotFound { run_id },
            QueryError::InvalidRange(reason) => CleanOpsError::Anyhow(anyhow::anyhow!(reason)),
        }
    }
}

fn check_deadline(deadline: Option<Instant>, operation: &'static str) -> Result<(), QueryError> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(QueryError::DeadlineExceeded { operation }),
        _ => Ok(()),
    }
}

// --- Time ranges ---

/// Half-open `[since, until)` range over run start times. Either bound may be
/// open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Result<Self, QueryError> {
        if let (Some(s), Some(u)) = (since, until) {
            if s >= u {
                return Err(QueryError::InvalidRange(format!("since {s} is not before until {u}")));
            }
        }
        Ok(Self { since, until })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| s <= at) && self.until.map_or(true, |u| at < u)
    }
}

// --- Reports ---

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub success_rate: f64,
    pub avg_execution_time_minutes: f64,
    pub min_execution_time_minutes: f64,
    pub max_execution_time_minutes: f64,
    pub median_execution_time_minutes: f64,
}

impl PerformanceMetrics {
    /// Metrics over the finished runs in `runs`. Runs still going are not
    /// counted.
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a PipelineRun>) -> Self {
        let mut successful = 0u64;
        let mut failed = 0u64;
        let mut minutes = Vec::new();
        for run in runs {
            match run.status {
                RunStatus::Completed => successful += 1,
                RunStatus::Failed => failed += 1,
                RunStatus::Pending | RunStatus::Running => continue,
            }
            minutes.push(run.elapsed_ms() as f64 / 60_000.0);
        }

        let total = successful + failed;
        if total == 0 {
            return Self::default();
        }
        minutes.sort_by(f64::total_cmp);
        let mid = minutes.len() / 2;
        let median = if minutes.len() % 2 == 0 {
            (minutes[mid - 1] + minutes[mid]) / 2.0
        } else {
            minutes[mid]
        };

        Self {
            total_runs: total,
            successful_runs: successful,
            failed_runs: failed,
            success_rate: successful as f64 / total as f64 * 100.0,
            avg_execution_time_minutes: minutes.iter().sum::<f64>() / minutes.len() as f64,
            min_execution_time_minutes: minutes[0],
            max_execution_time_minutes: minutes[minutes.len() - 1],
            median_execution_time_minutes: median,
        }
    }
}

/// The window a performance report covers. `days` is set when the caller
/// asked for a trailing number of days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisPeriod {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub pipeline_id: Option<String>,
    pub analysis_period: AnalysisPeriod,
    pub metrics: PerformanceMetrics,
}

// --- Metrics ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    PipelineRuns,
    SuccessRate,
    ExecutionTime,
    ResourceUsage,
    ErrorCount,
}

impl MetricType {
    /// How one bucket of finished runs reads as this metric. `None` for
    /// metrics not derived from runs.
    fn from_totals(self) -> Option<fn(&WindowTotals) -> f64> {
        match self {
            MetricType::PipelineRuns => Some(|t: &WindowTotals| t.finished() as f64),
            MetricType::SuccessRate => Some(WindowTotals::success_rate),
            MetricType::ExecutionTime => Some(WindowTotals::avg_minutes),
            MetricType::ErrorCount => Some(|t: &WindowTotals| t.failed as f64),
            MetricType::ResourceUsage => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Minute,
    #[default]
    Hour,
    Day,
}

impl Aggregation {
    pub fn bucket_width(self) -> std::time::Duration {
        let secs = match self {
            Aggregation::Minute => 60,
            Aggregation::Hour => 3_600,
            Aggregation::Day => 86_400,
        };
        std::time::Duration::from_secs(secs)
    }
}

/// A validated metrics request over `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsRequest {
    pub metric_type: MetricType,
    pub pipeline_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub aggregation: Aggregation,
}

impl MetricsRequest {
    /// Missing bounds default to the 24 hours before `now`.
    pub fn new(
        metric_type: MetricType,
        pipeline_id: Option<String>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        aggregation: Aggregation,
        now: DateTime<Utc>,
    ) -> Result<Self, QueryError> {
        let end_time = end_time.unwrap_or(now);
        let start_time = start_time.unwrap_or(end_time - ChronoDuration::hours(24));
        if start_time >= end_time {
            return Err(QueryError::InvalidRange(format!(
                "start_time {start_time} is not before end_time {end_time}"
            )));
        }

        let request = Self {
            metric_type,
            pipeline_id,
            start_time,
            end_time,
            aggregation,
        };
        let width_ms = request.width_ms();
        let span_ms = (end_time - request.aligned_start()).num_milliseconds();
        let points = (span_ms + width_ms - 1) / width_ms;
        if points > MAX_METRIC_POINTS {
            return Err(QueryError::InvalidRange(format!(
                "{points} buckets requested, at most {MAX_METRIC_POINTS} allowed"
            )));
        }
        Ok(request)
    }

    fn width_ms(&self) -> i64 {
        self.aggregation.bucket_width().as_millis() as i64
    }

    /// `start_time` rounded down to its bucket boundary.
    fn aligned_start(&self) -> DateTime<Utc> {
        let ms = self.start_time.timestamp_millis();
        self.start_time - ChronoDuration::milliseconds(ms.rem_euclid(self.width_ms()))
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at < self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSeries {
    pub metric_type: MetricType,
    pub pipeline_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub aggregation: Aggregation,
    pub data: Vec<MetricPoint>,
}

#[derive(Debug, Clone)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub pipeline_id: Option<String>,
    pub resolved: Option<bool>,
    pub limit: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            severity: None,
            pipeline_id: None,
            resolved: None,
            limit: DEFAULT_ALERT_LIMIT,
        }
    }
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.severity.map_or(true, |s| alert.severity == s)
            && self
                .pipeline_id
                .as_deref()
                .map_or(true, |p| alert.pipeline_id.as_deref() == Some(p))
            && self.resolved.map_or(true, |r| alert.resolved == r)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertList {
    pub alerts: Vec<Alert>,
    /// Matching alerts before the limit was applied.
    pub total_count: usize,
    pub unresolved_count: usize,
}

// --- QueryService ---

#[derive(Clone)]
pub struct QueryService {
    store: EventStore,
    cache: Arc<SnapshotCache>,
}

impl QueryService {
    pub fn new(store: EventStore, cache: Arc<SnapshotCache>) -> Self {
        Self { store, cache }
    }

    /// The current dashboard view and its version.
    pub fn get_snapshot(&self, deadline: Option<Instant>) -> Result<Arc<VersionedSnapshot>, QueryError> {
        check_deadline(deadline, "get_snapshot")?;
        Ok(self.cache.current())
    }

    /// Runs of `pipeline_id` that started inside `range`, oldest first.
    pub fn get_run_history(
        &self,
        pipeline_id: &str,
        range: &TimeRange,
        deadline: Option<Instant>,
    ) -> Result<Vec<PipelineRun>, QueryError> {
        self.replay_runs(Some(pipeline_id), range, deadline, "get_run_history")
    }

    /// One run, rebuilt from its events.
    pub fn get_run(
        &self,
        pipeline_id: &str,
        run_id: &str,
        deadline: Option<Instant>,
    ) -> Result<PipelineRun, QueryError> {
        check_deadline(deadline, "get_run")?;
        let not_found = || QueryError::RunNotFound {
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
        };

        if self.store.pipeline_of(run_id).as_deref() != Some(pipeline_id) {
            return Err(not_found());
        }
        let events = self.store.read_by_run(run_id);
        match PipelineRun::replay(events.iter().map(|stored| &stored.event)) {
            Ok(Some(run)) => Ok(run),
            Ok(None) => Err(not_found()),
            Err(e) => {
                warn!(run_id, error = %e, "Stored events do not replay");
                Err(not_found())
            }
        }
    }

    /// Run statistics for one pipeline, or all of them, over `range`.
    pub fn get_performance(
        &self,
        pipeline_id: Option<&str>,
        range: &TimeRange,
        deadline: Option<Instant>,
    ) -> Result<PerformanceReport, QueryError> {
        let runs = self.replay_runs(pipeline_id, range, deadline, "get_performance")?;
        Ok(PerformanceReport {
            pipeline_id: pipeline_id.map(str::to_string),
            analysis_period: AnalysisPeriod {
                start_time: range.since,
                end_time: range.until,
                days: None,
            },
            metrics: PerformanceMetrics::from_runs(&runs),
        })
    }

    /// A time series of one metric, one point per aggregation bucket.
    ///
    /// Run metrics bucket finished runs by their finish time. Resource gauges
    /// are not kept historically, so `resource_usage` yields the current CPU
    /// reading as a single point when the view's clock falls in the range.
    pub fn get_metrics(&self, request: &MetricsRequest, deadline: Option<Instant>) -> Result<MetricsSeries, QueryError> {
        let data = match request.metric_type.from_totals() {
            None => {
                let current = self.get_snapshot(deadline)?;
                current
                    .snapshot
                    .timestamp
                    .filter(|at| request.contains(*at))
                    .map(|timestamp| MetricPoint {
                        timestamp,
                        value: current.snapshot.resource_usage.cpu_percent,
                    })
                    .into_iter()
                    .collect()
            }
            Some(value) => {
                let runs = self.replay_runs(
                    request.pipeline_id.as_deref(),
                    &TimeRange::default(),
                    deadline,
                    "get_metrics",
                )?;
                let span = (request.end_time - request.aligned_start())
                    .to_std()
                    .map_err(|e| QueryError::InvalidRange(e.to_string()))?;

                let mut window = RollingWindow::new(request.aggregation.bucket_width(), span);
                window.advance_to(request.end_time - ChronoDuration::milliseconds(1));
                for run in &runs {
                    let outcome = match run.status {
                        RunStatus::Completed => Outcome::Completed,
                        RunStatus::Failed => Outcome::Failed,
                        RunStatus::Pending | RunStatus::Running => continue,
                    };
                    if let Some(at) = run.finished_at.filter(|at| request.contains(*at)) {
                        window.record(at, outcome, run.elapsed_ms());
                    }
                }

                window
                    .series()
                    .into_iter()
                    .map(|point| MetricPoint {
                        timestamp: point.bucket_start,
                        value: value(&point.totals),
                    })
                    .collect()
            }
        };

        Ok(MetricsSeries {
            metric_type: request.metric_type,
            pipeline_id: request.pipeline_id.clone(),
            start_time: request.start_time,
            end_time: request.end_time,
            aggregation: request.aggregation,
            data,
        })
    }

    /// Alerts from the current view matching `filter`, newest first.
    pub fn list_alerts(&self, filter: &AlertFilter, deadline: Option<Instant>) -> Result<AlertList, QueryError> {
        let current = self.get_snapshot(deadline)?;
        let mut matching: Vec<Alert> = current
            .snapshot
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total_count = matching.len();
        let unresolved_count = matching.iter().filter(|a| !a.resolved).count();
        matching.truncate(filter.limit.min(MAX_ALERT_LIMIT));

        Ok(AlertList {
            alerts: matching,
            total_count,
            unresolved_count,
        })
    }

    fn replay_runs(
        &self,
        pipeline_id: Option<&str>,
        range: &TimeRange,
        deadline: Option<Instant>,
        operation: &'static str,
    ) -> Result<Vec<PipelineRun>, QueryError> {
        // run_id -> (first seq, run)
        let mut runs: HashMap<String, (u64, PipelineRun)> = HashMap::new();

        for (i, stored) in self.store.read_range(pipeline_id, 0).enumerate() {
            if i % DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(deadline, operation)?;
            }
            let event = &stored.event;
            let (_, run) = runs.entry(event.run_id.clone()).or_insert_with(|| {
                (
                    stored.seq,
                    PipelineRun::pending(event.run_id.clone(), event.pipeline_id.clone()),
                )
            });
            if let Err(e) = run.apply(event) {
                warn!(seq = stored.seq, error = %e, "Stored event does not replay, skipping");
            }
        }
        check_deadline(deadline, operation)?;

        let mut matching: Vec<(u64, PipelineRun)> = runs
            .into_values()
            .filter(|(_, run)| run.started_at.is_some_and(|at| range.contains(at)))
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            a.started_at.cmp(&b.started_at).then(seq_a.cmp(seq_b))
        });
        Ok(matching.into_iter().map(|(_, run)| run).collect())
    }
}
