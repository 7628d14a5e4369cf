use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Alert thresholds and schedules live in the TOML `FileConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Event store
    pub event_journal_path: Option<PathBuf>,

    // Rolling window
    pub bucket_width_secs: u64,
    pub window_secs: u64,
    pub recent_runs_capacity: usize,

    // Fold loop
    pub tick_secs: u64,
    pub fold_batch_size: usize,

    // Subscriptions
    pub subscriber_queue_depth: usize,
    pub delta_retention: usize,
    pub ack_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            event_journal_path: None,
            bucket_width_secs: 300,
            window_secs: 24 * 3600,
            recent_runs_capacity: 10,
            tick_secs: 30,
            fold_batch_size: 512,
            subscriber_queue_depth: 64,
            delta_retention: 256,
            ack_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            api_host: std::env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port: env_or("API_PORT", defaults.api_port)?,
            event_journal_path: std::env::var("EVENT_JOURNAL_PATH").ok().map(PathBuf::from),
            bucket_width_secs: env_or("BUCKET_WIDTH_SECS", defaults.bucket_width_secs)?,
            window_secs: env_or("WINDOW_SECS", defaults.window_secs)?,
            recent_runs_capacity: env_or("RECENT_RUNS_CAPACITY", defaults.recent_runs_capacity)?,
            tick_secs: env_or("TICK_SECS", defaults.tick_secs)?,
            fold_batch_size: env_or("FOLD_BATCH_SIZE", defaults.fold_batch_size)?,
            subscriber_queue_depth: env_or(
                "SUBSCRIBER_QUEUE_DEPTH",
                defaults.subscriber_queue_depth,
            )?,
            delta_retention: env_or("DELTA_RETENTION", defaults.delta_retention)?,
            ack_timeout_secs: env_or("ACK_TIMEOUT_SECS", defaults.ack_timeout_secs)?,
        };

        config.validate()?;
        config.log_settings();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bucket_width_secs == 0 {
            anyhow::bail!("BUCKET_WIDTH_SECS must be positive");
        }
        if self.window_secs < self.bucket_width_secs {
            anyhow::bail!("WINDOW_SECS must be at least BUCKET_WIDTH_SECS");
        }
        if self.subscriber_queue_depth == 0 {
            anyhow::bail!("SUBSCRIBER_QUEUE_DEPTH must be positive");
        }
        if self.fold_batch_size == 0 || self.tick_secs == 0 {
            anyhow::bail!("FOLD_BATCH_SIZE and TICK_SECS must be positive");
        }
        Ok(())
    }

    fn log_settings(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  API: {}:{}", self.api_host, self.api_port);
        tracing::info!(
            "  EVENT_JOURNAL_PATH: {}",
            self.event_journal_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<not set, in-memory only>".to_string())
        );
        tracing::info!(
            "  window: {}s in {}s buckets, recent runs: {}",
            self.window_secs,
            self.bucket_width_secs,
            self.recent_runs_capacity
        );
        tracing::info!(
            "  subscribers: queue depth {}, delta retention {}, ack timeout {}s",
            self.subscriber_queue_depth,
            self.delta_retention,
            self.ack_timeout_secs
        );
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
