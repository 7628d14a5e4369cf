//! Alert book: threshold rules over runs, the rolling window, and resource
//! gauges.
//!
//! Alerts are keyed by rule and subject (`pipeline-failed:<pipeline>`,
//! `long-run:<pipeline>`, `error-rate`, `resource:<gauge>`). At most one
//! unresolved alert exists per key. Everything here is driven by folded
//! events and telemetry, so replaying the log rebuilds the same book.

use chrono::{DateTime, Duration, Utc};
use cleanops_common::{Alert, AlertRules, AlertSeverity, PipelineRun, ResourceUsage, RunStatus};

use crate::window::WindowTotals;

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    alert: Alert,
}

#[derive(Debug, Clone)]
pub struct AlertBook {
    rules: AlertRules,
    retention: Duration,
    /// Oldest first.
    entries: Vec<Entry>,
    raised: u64,
}

impl AlertBook {
    pub fn new(rules: AlertRules, retention: Duration) -> Self {
        Self {
            rules,
            retention,
            entries: Vec::new(),
            raised: 0,
        }
    }

    fn open_mut(&mut self, key: &str) -> Option<&mut Alert> {
        self.entries
            .iter_mut()
            .find(|e| e.key == key && !e.alert.resolved)
            .map(|e| &mut e.alert)
    }

    /// Raise `key`, or update the severity and text of its open alert.
    fn raise(
        &mut self,
        key: String,
        severity: AlertSeverity,
        title: String,
        description: String,
        pipeline_id: Option<String>,
        at: DateTime<Utc>,
    ) {
        if let Some(open) = self.open_mut(&key) {
            open.severity = severity;
            open.title = title;
            open.description = description;
            return;
        }

        self.raised += 1;
        let alert = Alert {
            id: format!("{key}#{}", self.raised),
            title,
            description,
            severity,
            pipeline_id,
            created_at: at,
            resolved: false,
            resolved_at: None,
        };
        tracing::info!(alert_id = %alert.id, severity = ?severity, "Alert raised");
        self.entries.push(Entry { key, alert });
    }

    fn resolve(&mut self, key: &str, at: DateTime<Utc>) {
        if let Some(open) = self.open_mut(key) {
            open.resolved = true;
            open.resolved_at = Some(at);
            tracing::info!(alert_id = %open.id, "Alert resolved");
        }
    }

    /// Apply the per-run rules to a run that just reached a terminal state.
    pub fn on_run_finished(&mut self, run: &PipelineRun, at: DateTime<Utc>) {
        let pipeline = run.pipeline_id.clone();
        let failed_key = format!("pipeline-failed:{pipeline}");
        let long_key = format!("long-run:{pipeline}");

        match run.status {
            RunStatus::Failed => {
                let reason = run.error.as_deref().unwrap_or("no error reported");
                self.raise(
                    failed_key,
                    AlertSeverity::High,
                    format!("{} failed", run.display_name()),
                    format!("Run {} failed: {reason}", run.run_id),
                    Some(pipeline),
                    at,
                );
            }
            RunStatus::Completed => {
                self.resolve(&failed_key, at);

                let minutes = run.elapsed_ms() as f64 / 60_000.0;
                if minutes > self.rules.long_run_minutes {
                    self.raise(
                        long_key,
                        AlertSeverity::Medium,
                        format!("{} running long", run.display_name()),
                        format!(
                            "Run {} took {minutes:.1} minutes (threshold {} minutes)",
                            run.run_id, self.rules.long_run_minutes
                        ),
                        Some(pipeline),
                        at,
                    );
                } else {
                    self.resolve(&long_key, at);
                }
            }
            RunStatus::Pending | RunStatus::Running => {}
        }
    }

    /// Re-evaluate the window failure-rate rule.
    pub fn on_window(&mut self, totals: &WindowTotals, at: DateTime<Utc>) {
        let rate = totals.failure_rate();
        if totals.finished() >= self.rules.error_rate_min_runs && rate > self.rules.error_rate_percent {
            self.raise(
                "error-rate".to_string(),
                AlertSeverity::Critical,
                "High pipeline failure rate".to_string(),
                format!(
                    "{rate:.1}% of {} runs failed in the window (threshold {}%)",
                    totals.finished(),
                    self.rules.error_rate_percent
                ),
                None,
                at,
            );
        } else {
            self.resolve("error-rate", at);
        }
    }

    /// Re-evaluate the resource gauge rules.
    pub fn on_resources(&mut self, usage: &ResourceUsage, at: DateTime<Utc>) {
        for (gauge, value) in usage.gauges() {
            let key = format!("resource:{gauge}");
            let severity = if value >= self.rules.resource_critical_percent {
                AlertSeverity::Critical
            } else if value >= self.rules.resource_warning_percent {
                AlertSeverity::Low
            } else {
                self.resolve(&key, at);
                continue;
            };
            self.raise(
                key,
                severity,
                format!("High {gauge} usage"),
                format!("{gauge} at {value:.1}%"),
                None,
                at,
            );
        }
    }

    /// Drop alerts resolved longer ago than the retention.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.entries.retain(|e| match e.alert.resolved_at {
            Some(resolved_at) => resolved_at > cutoff,
            None => true,
        });
    }

    /// Current alerts, newest first.
    pub fn list(&self) -> Vec<Alert> {
        self.entries.iter().rev().map(|e| e.alert.clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.alert.resolved).count()
    }
}
