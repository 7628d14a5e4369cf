//! Folds stored run events into the dashboard view.
//!
//! Owns every derived structure (runs, per-pipeline counters, the rolling
//! window, alerts, schedules) and the last view it emitted. Each fold or
//! clock step rebuilds the affected sections, diffs them against that view,
//! and returns a [`SnapshotDelta`] only when something visible changed.
//!
//! The aggregator has no notion of wall time: its clock only moves when an
//! event, telemetry sample, or explicit `advance_clock` says so, which keeps
//! replay deterministic.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use cleanops_common::{
    AlertRules, AlertsSummary, CleanOpsError, Config, DashboardSnapshot, FileConfig, PipelineRun,
    RecentRun, ResourceUsage, RunEventKind, RunStatus, ScheduleConfig, SnapshotDelta, Summary,
    SummaryDelta, UpcomingSchedule,
};
use cleanops_events::StoredEvent;
use tracing::{debug, warn};

use crate::alerts::AlertBook;
use crate::schedules::ScheduleBook;
use crate::window::{Outcome, RollingWindow};

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub bucket_width: StdDuration,
    pub window: StdDuration,
    pub recent_capacity: usize,
    pub alert_rules: AlertRules,
    pub schedules: Vec<ScheduleConfig>,
    pub upcoming_limit: usize,
}

impl AggregatorSettings {
    pub fn new(config: &Config, file: &FileConfig) -> Self {
        Self {
            bucket_width: StdDuration::from_secs(config.bucket_width_secs),
            window: StdDuration::from_secs(config.window_secs),
            recent_capacity: config.recent_runs_capacity,
            alert_rules: file.alerts.clone(),
            schedules: file.schedules.clone(),
            upcoming_limit: file.upcoming_limit,
        }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::new(&Config::default(), &FileConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
struct PipelineStats {
    last_started_at: Option<DateTime<Utc>>,
    running: u32,
}

pub struct Aggregator {
    recent_capacity: usize,
    window_len: Duration,
    watermark: u64,
    clock: Option<DateTime<Utc>>,
    runs: HashMap<String, PipelineRun>,
    pipelines: HashMap<String, PipelineStats>,
    window: RollingWindow,
    resources: ResourceUsage,
    alerts: AlertBook,
    schedules: ScheduleBook,
    upcoming: Option<Vec<UpcomingSchedule>>,
    /// The view as of the last emitted delta.
    published: DashboardSnapshot,
}

impl Aggregator {
    pub fn new(settings: AggregatorSettings) -> Result<Self, CleanOpsError> {
        let window_len = Duration::from_std(settings.window)
            .map_err(|e| CleanOpsError::Config(format!("window out of range: {e}")))?;
        let schedules = ScheduleBook::new(&settings.schedules, settings.upcoming_limit)?;

        Ok(Self {
            recent_capacity: settings.recent_capacity,
            window_len,
            watermark: 0,
            clock: None,
            runs: HashMap::new(),
            pipelines: HashMap::new(),
            window: RollingWindow::new(settings.bucket_width, settings.window),
            resources: ResourceUsage::default(),
            alerts: AlertBook::new(settings.alert_rules, window_len),
            schedules,
            upcoming: None,
            published: DashboardSnapshot::default(),
        })
    }

    /// Highest sequence number folded so far.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// The full current view.
    pub fn view(&self) -> DashboardSnapshot {
        self.published.clone()
    }

    /// Derived state of one run, if the aggregator still holds it.
    pub fn run(&self, run_id: &str) -> Option<&PipelineRun> {
        self.runs.get(run_id)
    }

    /// Fold one stored event. Events at or below the watermark are ignored.
    pub fn fold(&mut self, stored: &StoredEvent) -> Option<SnapshotDelta> {
        if stored.seq <= self.watermark {
            debug!(seq = stored.seq, watermark = self.watermark, "Skipping re-delivered event");
            return None;
        }
        self.watermark = stored.seq;

        let event = &stored.event;
        let mut run = self
            .runs
            .get(&event.run_id)
            .cloned()
            .unwrap_or_else(|| PipelineRun::pending(event.run_id.clone(), event.pipeline_id.clone()));
        if let Err(e) = run.apply(event) {
            warn!(seq = stored.seq, error = %e, "Event rejected by run state machine, skipping");
            return None;
        }

        self.tick_clock(event.timestamp);

        let stats = self.pipelines.entry(event.pipeline_id.clone()).or_default();
        match &event.kind {
            RunEventKind::Started { .. } => {
                stats.running += 1;
                stats.last_started_at = stats.last_started_at.max(Some(event.timestamp));
            }
            RunEventKind::Progressed { .. } => {}
            RunEventKind::Completed { .. } | RunEventKind::Failed { .. } => {
                stats.running = stats.running.saturating_sub(1);
                let outcome = if run.status == RunStatus::Completed {
                    Outcome::Completed
                } else {
                    Outcome::Failed
                };
                self.window
                    .record(event.timestamp, outcome, run.duration_ms.unwrap_or(0));
                self.alerts.on_run_finished(&run, event.timestamp);
                self.alerts.on_window(&self.window.totals(), event.timestamp);
            }
        }

        let clock = self.clock;
        let touched = RecentRun::from_run(&run).map(|row| match clock {
            Some(clock) => row.elapsed_to(clock),
            None => row,
        });
        self.runs.insert(run.run_id.clone(), run);
        self.emit(touched.into_iter().collect())
    }

    /// Replace the resource gauges with a telemetry sample taken at `at`.
    pub fn ingest_telemetry(&mut self, sample: ResourceUsage, at: DateTime<Utc>) -> Option<SnapshotDelta> {
        self.tick_clock(at);
        self.resources = sample.clamped();
        self.alerts.on_resources(&self.resources, at);
        self.emit(Vec::new())
    }

    /// Move the clock to `now`: expire window buckets, finished runs and
    /// resolved alerts older than the window, refresh schedules, and bring
    /// the durations of listed running runs up to the clock.
    pub fn advance_clock(&mut self, now: DateTime<Utc>) -> Option<SnapshotDelta> {
        self.tick_clock(now);
        let clock = self.clock?;

        let cutoff = clock - self.window_len;
        let before = self.runs.len();
        self.runs.retain(|_, run| {
            !(run.status.is_terminal() && run.finished_at.is_some_and(|at| at <= cutoff))
        });
        if self.runs.len() != before {
            debug!(pruned = before - self.runs.len(), "Pruned finished runs outside the window");
        }

        self.alerts.on_window(&self.window.totals(), clock);
        self.alerts.prune(clock);

        let running: Vec<RecentRun> = self
            .published
            .recent_runs
            .iter()
            .filter(|row| row.status == RunStatus::Running)
            .filter_map(|row| self.runs.get(&row.id))
            .filter_map(RecentRun::from_run)
            .map(|row| row.elapsed_to(clock))
            .collect();
        self.emit(running)
    }

    fn tick_clock(&mut self, at: DateTime<Utc>) {
        let clock = self.clock.map_or(at, |c| c.max(at));
        self.clock = Some(clock);
        if self.window.advance_to(clock) {
            self.alerts.on_window(&self.window.totals(), clock);
        }

        // Later entries are no sooner than the first, so they stay valid
        // until the clock reaches it.
        let stale = self
            .upcoming
            .as_ref()
            .map_or(true, |list| list.first().is_some_and(|next| next.next_run <= clock));
        if stale {
            self.upcoming = Some(self.schedules.upcoming(clock));
        }
    }

    fn summary(&self) -> Summary {
        let totals = self.window.totals();
        let window_start = self.clock.map(|c| c - self.window_len);
        let active = self
            .pipelines
            .values()
            .filter(|p| match (p.last_started_at, window_start) {
                (Some(started), Some(start)) => started > start,
                _ => false,
            })
            .count();

        Summary {
            total_pipelines: self.pipelines.len() as u64,
            active_pipelines: active as u64,
            running_pipelines: self.pipelines.values().filter(|p| p.running > 0).count() as u64,
            failed_pipelines_24h: totals.failed,
            success_rate_24h: totals.success_rate(),
            avg_execution_time_minutes: totals.avg_minutes(),
        }
    }

    /// Would `run` change the published recent-runs list?
    fn changes_recent(&self, run: &RecentRun) -> bool {
        let recent = &self.published.recent_runs;
        if let Some(existing) = recent.iter().find(|r| r.id == run.id) {
            return existing != run;
        }
        recent.len() < self.recent_capacity
            || recent.last().is_some_and(|oldest| run.started_at > oldest.started_at)
    }

    fn emit(&mut self, touched: Vec<RecentRun>) -> Option<SnapshotDelta> {
        let as_of = self.clock.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let mut delta = SnapshotDelta::new(self.watermark, as_of);

        delta.summary = SummaryDelta::between(&self.published.summary, &self.summary());

        delta.recent_runs = touched
            .into_iter()
            .filter(|r| self.changes_recent(r))
            .collect();

        let alerts = self.alerts.list();
        if alerts != self.published.alerts {
            let counts = AlertsSummary::from_alerts(&alerts);
            if counts != self.published.alerts_summary {
                delta.alerts_summary = Some(counts);
            }
            delta.alerts = Some(alerts);
        }

        if self.resources != self.published.resource_usage {
            delta.resource_usage = Some(self.resources);
        }

        if let Some(upcoming) = &self.upcoming {
            if *upcoming != self.published.upcoming_schedules {
                delta.upcoming_schedules = Some(upcoming.clone());
            }
        }

        if delta.is_empty() {
            return None;
        }
        self.published.apply(&delta, self.recent_capacity);
        Some(delta)
    }
}
