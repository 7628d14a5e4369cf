use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cleanops_api::{Aggregation, AlertFilter, MetricType, MetricsRequest, QueryError, QueryService, TimeRange};
use cleanops_common::{Alert, AlertSeverity, DashboardSnapshot, ResourceUsage, RunEvent, RunStatus};
use cleanops_events::EventStore;
use cleanops_live::SnapshotCache;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn service(store: &EventStore) -> (QueryService, Arc<SnapshotCache>) {
    let cache = Arc::new(SnapshotCache::new(10));
    (QueryService::new(store.clone(), cache.clone()), cache)
}

async fn finished(store: &EventStore, run: &str, pipeline: &str, start: DateTime<Utc>, minutes: i64, ok: bool) {
    store.append(RunEvent::started(run, pipeline, start)).await.unwrap();
    let end = start + Duration::minutes(minutes);
    let event = if ok {
        RunEvent::completed(run, pipeline, end, Duration::minutes(minutes))
    } else {
        RunEvent::failed(run, pipeline, end, Duration::minutes(minutes)).with_error("boom")
    };
    store.append(event).await.unwrap();
}

fn alert(id: &str, severity: AlertSeverity, pipeline: Option<&str>, minutes: i64, resolved: bool) -> Alert {
    Alert {
        id: id.to_string(),
        title: id.to_string(),
        description: String::new(),
        severity,
        pipeline_id: pipeline.map(str::to_string),
        created_at: t0() + Duration::minutes(minutes),
        resolved,
        resolved_at: None,
    }
}

#[tokio::test]
async fn history_is_ordered_by_start_time_then_sequence() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    finished(&store, "B", "etl", t0() + Duration::hours(1), 2, true).await;
    // Appended later but started earlier.
    finished(&store, "C", "etl", t0() - Duration::hours(1), 2, false).await;
    // Same start as A, later sequence.
    store.append(RunEvent::started("D", "etl", t0())).await.unwrap();
    finished(&store, "X", "other", t0(), 2, true).await;

    let (queries, _) = service(&store);
    let runs = queries.get_run_history("etl", &TimeRange::default(), None).unwrap();

    let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["C", "A", "D", "B"]);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[2].status, RunStatus::Running);
}

#[tokio::test]
async fn history_range_is_half_open() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    finished(&store, "B", "etl", t0() + Duration::hours(1), 2, true).await;

    let (queries, _) = service(&store);
    let range = TimeRange::new(Some(t0()), Some(t0() + Duration::hours(1))).unwrap();
    let runs = queries.get_run_history("etl", &range, None).unwrap();

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "A");
}

#[test]
fn inverted_range_is_rejected() {
    let err = TimeRange::new(Some(t0()), Some(t0())).unwrap_err();
    assert!(matches!(err, QueryError::InvalidRange(_)));
}

#[tokio::test]
async fn expired_deadline_fails_the_query() {
    let store = EventStore::in_memory();
    for i in 0..200 {
        finished(&store, &format!("run-{i}"), "etl", t0() + Duration::minutes(i), 1, true).await;
    }
    let (queries, _) = service(&store);

    let err = queries
        .get_run_history("etl", &TimeRange::default(), Some(Instant::now()))
        .unwrap_err();
    assert_eq!(err, QueryError::DeadlineExceeded { operation: "get_run_history" });

    let err = queries
        .get_performance(None, &TimeRange::default(), Some(Instant::now()))
        .unwrap_err();
    assert_eq!(err, QueryError::DeadlineExceeded { operation: "get_performance" });

    let err = queries.get_snapshot(Some(Instant::now())).unwrap_err();
    assert_eq!(err, QueryError::DeadlineExceeded { operation: "get_snapshot" });
}

#[tokio::test]
async fn get_run_rebuilds_from_events() {
    let store = EventStore::in_memory();
    store
        .append(RunEvent::started("A", "etl", t0()).with_pipeline_name("Nightly ETL"))
        .await
        .unwrap();
    store
        .append(RunEvent::progressed("A", "etl", t0() + Duration::minutes(1), 40.0))
        .await
        .unwrap();

    let (queries, _) = service(&store);
    let run = queries.get_run("etl", "A", None).unwrap();

    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.progress_percent, 40.0);
    assert_eq!(run.display_name(), "Nightly ETL");
}

#[tokio::test]
async fn get_run_unknown_or_wrong_pipeline_is_not_found() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    let (queries, _) = service(&store);

    let err = queries.get_run("etl", "missing", None).unwrap_err();
    assert!(matches!(err, QueryError::RunNotFound { .. }));

    let err = queries.get_run("logs", "A", None).unwrap_err();
    assert_eq!(
        err,
        QueryError::RunNotFound {
            pipeline_id: "logs".to_string(),
            run_id: "A".to_string(),
        }
    );
}

#[tokio::test]
async fn performance_counts_finished_runs_only() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    finished(&store, "B", "etl", t0() + Duration::minutes(10), 4, true).await;
    finished(&store, "C", "etl", t0() + Duration::minutes(20), 6, false).await;
    store
        .append(RunEvent::started("D", "etl", t0() + Duration::minutes(30)))
        .await
        .unwrap();
    finished(&store, "E", "logs", t0(), 30, true).await;

    let (queries, _) = service(&store);
    let report = queries
        .get_performance(Some("etl"), &TimeRange::default(), None)
        .unwrap();
    let m = &report.metrics;

    assert_eq!(report.pipeline_id.as_deref(), Some("etl"));
    assert_eq!(m.total_runs, 3);
    assert_eq!(m.successful_runs, 2);
    assert_eq!(m.failed_runs, 1);
    assert!((m.success_rate - 200.0 / 3.0).abs() < 1e-9);
    assert!((m.avg_execution_time_minutes - 4.0).abs() < 1e-9);
    assert!((m.min_execution_time_minutes - 2.0).abs() < 1e-9);
    assert!((m.max_execution_time_minutes - 6.0).abs() < 1e-9);
    assert!((m.median_execution_time_minutes - 4.0).abs() < 1e-9);

    let all = queries.get_performance(None, &TimeRange::default(), None).unwrap();
    assert_eq!(all.metrics.total_runs, 4);
    // 2, 4, 6, 30 minutes
    assert!((all.metrics.median_execution_time_minutes - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn performance_with_no_runs_is_zeroed() {
    let store = EventStore::in_memory();
    let (queries, _) = service(&store);
    let report = queries
        .get_performance(Some("etl"), &TimeRange::default(), None)
        .unwrap();
    assert_eq!(report.metrics.total_runs, 0);
    assert_eq!(report.metrics.success_rate, 0.0);
}

#[test]
fn alerts_are_filtered_newest_first_and_limited() {
    let store = EventStore::in_memory();
    let (queries, cache) = service(&store);
    cache.seed(DashboardSnapshot {
        alerts: vec![
            alert("a", AlertSeverity::High, Some("etl"), 1, false),
            alert("b", AlertSeverity::Critical, None, 3, false),
            alert("c", AlertSeverity::High, Some("etl"), 2, true),
            alert("d", AlertSeverity::High, Some("logs"), 4, false),
        ],
        ..DashboardSnapshot::default()
    });

    let all = queries.list_alerts(&AlertFilter::default(), None).unwrap();
    let ids: Vec<&str> = all.alerts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "b", "c", "a"]);
    assert_eq!(all.total_count, 4);
    assert_eq!(all.unresolved_count, 3);

    let etl_high = AlertFilter {
        severity: Some(AlertSeverity::High),
        pipeline_id: Some("etl".to_string()),
        ..AlertFilter::default()
    };
    let list = queries.list_alerts(&etl_high, None).unwrap();
    let ids: Vec<&str> = list.alerts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a"]);
    assert_eq!(list.unresolved_count, 1);

    let limited = AlertFilter {
        resolved: Some(false),
        limit: 1,
        ..AlertFilter::default()
    };
    let list = queries.list_alerts(&limited, None).unwrap();
    assert_eq!(list.alerts.len(), 1);
    assert_eq!(list.alerts[0].id, "d");
    assert_eq!(list.total_count, 3);
}

fn values(series: &cleanops_api::MetricsSeries) -> Vec<f64> {
    series.data.iter().map(|p| p.value).collect()
}

fn hourly(metric: MetricType, pipeline: Option<&str>, start: DateTime<Utc>, end: DateTime<Utc>) -> MetricsRequest {
    MetricsRequest::new(
        metric,
        pipeline.map(str::to_string),
        Some(start),
        Some(end),
        Aggregation::Hour,
        end,
    )
    .unwrap()
}

#[tokio::test]
async fn metrics_bucket_finished_runs_by_finish_time() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    finished(&store, "C", "logs", t0() + Duration::minutes(30), 6, true).await;
    finished(&store, "B", "etl", t0() + Duration::minutes(70), 4, false).await;
    store
        .append(RunEvent::started("D", "etl", t0() + Duration::minutes(80)))
        .await
        .unwrap();
    let (queries, _) = service(&store);
    let end = t0() + Duration::hours(3);

    let runs = queries
        .get_metrics(&hourly(MetricType::PipelineRuns, Some("etl"), t0(), end), None)
        .unwrap();
    let stamps: Vec<_> = runs.data.iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![t0(), t0() + Duration::hours(1), t0() + Duration::hours(2)]);
    assert_eq!(values(&runs), vec![1.0, 1.0, 0.0]);

    let errors = queries
        .get_metrics(&hourly(MetricType::ErrorCount, Some("etl"), t0(), end), None)
        .unwrap();
    assert_eq!(values(&errors), vec![0.0, 1.0, 0.0]);

    let minutes = queries
        .get_metrics(&hourly(MetricType::ExecutionTime, None, t0(), end), None)
        .unwrap();
    assert_eq!(minutes.data[0].value, 4.0);

    let rate = queries
        .get_metrics(&hourly(MetricType::SuccessRate, None, t0(), end), None)
        .unwrap();
    assert_eq!(values(&rate), vec![100.0, 0.0, 0.0]);
}

#[tokio::test]
async fn metrics_range_is_half_open_and_bucket_aligned() {
    let store = EventStore::in_memory();
    finished(&store, "A", "etl", t0(), 2, true).await;
    finished(&store, "C", "logs", t0() + Duration::minutes(30), 6, true).await;
    finished(&store, "B", "etl", t0() + Duration::minutes(70), 4, false).await;
    let (queries, _) = service(&store);

    let request = hourly(
        MetricType::PipelineRuns,
        None,
        t0() + Duration::minutes(30),
        t0() + Duration::minutes(74),
    );
    let series = queries.get_metrics(&request, None).unwrap();

    // A finished before the start and B exactly at the end.
    assert_eq!(series.data.len(), 2);
    assert_eq!(series.data[0].timestamp, t0());
    assert_eq!(values(&series), vec![1.0, 0.0]);
}

#[test]
fn metrics_request_defaults_and_limits() {
    let now = t0();
    let request = MetricsRequest::new(MetricType::PipelineRuns, None, None, None, Aggregation::Hour, now).unwrap();
    assert_eq!(request.end_time, now);
    assert_eq!(request.start_time, now - Duration::hours(24));

    let err = MetricsRequest::new(
        MetricType::PipelineRuns,
        None,
        Some(now - Duration::days(3)),
        None,
        Aggregation::Minute,
        now,
    )
    .unwrap_err();
    assert!(matches!(err, QueryError::InvalidRange(_)));

    let err = MetricsRequest::new(MetricType::ErrorCount, None, Some(now), Some(now), Aggregation::Day, now)
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidRange(_)));
}

#[test]
fn resource_metric_is_the_current_reading() {
    let store = EventStore::in_memory();
    let (queries, cache) = service(&store);
    cache.seed(DashboardSnapshot {
        timestamp: Some(t0() + Duration::minutes(90)),
        resource_usage: ResourceUsage {
            cpu_percent: 42.0,
            memory_percent: 10.0,
            disk_percent: 10.0,
        },
        ..DashboardSnapshot::default()
    });

    let inside = hourly(MetricType::ResourceUsage, None, t0(), t0() + Duration::hours(2));
    let series = queries.get_metrics(&inside, None).unwrap();
    assert_eq!(series.data.len(), 1);
    assert_eq!(series.data[0].value, 42.0);

    let before = hourly(MetricType::ResourceUsage, None, t0(), t0() + Duration::hours(1));
    assert!(queries.get_metrics(&before, None).unwrap().data.is_empty());
}
