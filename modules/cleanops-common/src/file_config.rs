use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// TOML-backed configuration: alert thresholds and pipeline schedules.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub alerts: AlertRules,
    #[serde(default = "default_upcoming_limit")]
    pub upcoming_limit: usize,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            alerts: AlertRules::default(),
            upcoming_limit: default_upcoming_limit(),
            schedules: Vec::new(),
        }
    }
}

fn default_upcoming_limit() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AlertRules {
    /// Completed runs longer than this raise a long-run alert.
    pub long_run_minutes: f64,
    /// Window failure rate that raises the error-rate alert.
    pub error_rate_percent: f64,
    /// Finished runs required before the error-rate rule applies.
    pub error_rate_min_runs: u64,
    pub resource_warning_percent: f64,
    pub resource_critical_percent: f64,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            long_run_minutes: 45.0,
            error_rate_percent: 5.0,
            error_rate_min_runs: 10,
            resource_warning_percent: 85.0,
            resource_critical_percent: 95.0,
        }
    }
}

/// A recurring pipeline schedule. `rrule` is an RFC 5545 rule body such as
/// `FREQ=HOURLY;INTERVAL=2`, anchored at `dtstart`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    pub name: String,
    pub pipeline_id: String,
    pub pipeline_name: Option<String>,
    pub dtstart: DateTime<Utc>,
    pub rrule: String,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(FileConfig::default());
    }
    load_config(path)
}
