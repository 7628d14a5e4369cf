use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cleanops_api::{build_router, AppState};
use cleanops_common::{file_config::load_config_or_default, Config};
use cleanops_engine::{Aggregator, AggregatorSettings, FoldRuntime};
use cleanops_events::EventStore;
use cleanops_live::{HubSettings, SnapshotCache, SubscriptionHub};

#[derive(Parser)]
#[command(name = "cleanops-api", about = "Pipeline run status aggregation service")]
struct Cli {
    /// Alert thresholds and schedules. Defaults apply when the file is absent.
    #[arg(long, default_value = "cleanops.toml")]
    config: PathBuf,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("cleanops=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config = Config::from_env()?;
    let file_config = load_config_or_default(&cli.config)?;

    let store = match &config.event_journal_path {
        Some(path) => EventStore::open(path)
            .await
            .with_context(|| format!("Failed to open event journal {}", path.display()))?,
        None => {
            info!("EVENT_JOURNAL_PATH not set, events are kept in memory only");
            EventStore::in_memory()
        }
    };

    let aggregator = Aggregator::new(AggregatorSettings::new(&config, &file_config))?;
    let cache = Arc::new(SnapshotCache::new(config.recent_runs_capacity));
    let hub = SubscriptionHub::new(cache, HubSettings::from_config(&config));

    let (mut runtime, engine) = FoldRuntime::new(store.clone(), aggregator, hub.clone(), &config);
    runtime.catch_up_and_seed();
    runtime.spawn();
    hub.spawn_eviction_loop();

    let state = Arc::new(AppState::new(store, hub, engine));
    let app = build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("CleanOps API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
