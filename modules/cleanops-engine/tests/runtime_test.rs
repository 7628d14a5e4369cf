//! Fold loop wired to a real store, cache, and hub.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use cleanops_common::{Config, ResourceUsage, RunEvent, RunStatus};
use cleanops_engine::{Aggregator, AggregatorSettings, EngineHandle, FoldRuntime};
use cleanops_events::EventStore;
use cleanops_live::{HubSettings, SnapshotCache, SubscriptionHub};

fn wire(store: &EventStore) -> (FoldRuntime, EngineHandle, SubscriptionHub) {
    let hub = SubscriptionHub::new(Arc::new(SnapshotCache::new(10)), HubSettings::default());
    let aggregator = Aggregator::new(AggregatorSettings::default()).unwrap();
    let (runtime, handle) = FoldRuntime::new(store.clone(), aggregator, hub.clone(), &Config::default());
    (runtime, handle, hub)
}

async fn wait_for(hub: &SubscriptionHub, check: impl Fn(&cleanops_common::DashboardSnapshot) -> bool) {
    tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            if check(&hub.cache().current().snapshot) {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("snapshot never reached the expected state");
}

#[tokio::test]
async fn boot_replays_journal_and_seeds_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let start = Utc::now() - Duration::minutes(10);
    {
        let store = EventStore::open(&path).await.unwrap();
        store.append(RunEvent::started("A", "etl", start)).await.unwrap();
        store
            .append(RunEvent::completed("A", "etl", start + Duration::minutes(2), Duration::minutes(2)))
            .await
            .unwrap();
        store.append(RunEvent::started("B", "logs", start + Duration::minutes(3))).await.unwrap();
    }

    let store = EventStore::open(&path).await.unwrap();
    let (mut runtime, _handle, hub) = wire(&store);
    let seeded = runtime.catch_up_and_seed();

    assert_eq!(seeded.version, 1);
    assert_eq!(runtime.aggregator().watermark(), 3);
    let ids: Vec<&str> = seeded.snapshot.recent_runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "A"]);
    assert_eq!(seeded.snapshot.summary.running_pipelines, 1);
    assert_eq!(hub.cache().version(), 1);
}

#[tokio::test]
async fn appended_events_reach_subscribers() {
    let store = EventStore::in_memory();
    let (mut runtime, _handle, hub) = wire(&store);
    runtime.catch_up_and_seed();
    let sub = hub.subscribe(None);
    let _task = runtime.spawn();

    let now = Utc::now();
    store.append(RunEvent::started("A", "etl", now)).await.unwrap();
    store
        .append(RunEvent::completed("A", "etl", now + Duration::seconds(1), Duration::seconds(1)))
        .await
        .unwrap();

    wait_for(&hub, |s| {
        s.recent_runs
            .first()
            .is_some_and(|r| r.id == "A" && r.status == RunStatus::Completed)
    })
    .await;

    let first = sub.recv().await.unwrap();
    assert!(first.is_full());
    assert_eq!(first.version(), 1);

    let mut last = first.version();
    while let Some(message) = sub.try_recv() {
        assert!(!message.is_full());
        assert_eq!(message.version(), last + 1);
        last = message.version();
    }
    assert_eq!(last, hub.cache().version());
}

#[tokio::test]
async fn telemetry_flows_through_the_handle() {
    let store = EventStore::in_memory();
    let (mut runtime, handle, hub) = wire(&store);
    runtime.catch_up_and_seed();
    let _task = runtime.spawn();

    handle
        .ingest_telemetry(ResourceUsage {
            cpu_percent: 42.0,
            memory_percent: 64.0,
            disk_percent: 91.0,
        })
        .await
        .unwrap();

    wait_for(&hub, |s| s.resource_usage.cpu_percent == 42.0).await;
    let snapshot = hub.cache().current().snapshot.clone();
    assert_eq!(snapshot.alerts_summary.low, 1);
}
