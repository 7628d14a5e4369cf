//! Lifecycle boundary tests.
//!
//! These pin down the per-run state machine shared by the store and the
//! aggregator:
//! - a run must start before it progresses or finishes
//! - terminal states absorb everything after them
//! - timestamps within a run never go backwards

use chrono::{DateTime, Duration, TimeZone, Utc};
use cleanops_common::lifecycle::{transition, RunLifecycle};
use cleanops_common::{IngestError, PipelineRun, RunEvent, RunStatus};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn lifecycle(status: RunStatus) -> RunLifecycle {
    RunLifecycle {
        pipeline_id: "etl".into(),
        status,
        last_event_at: t0(),
    }
}

// =========================================================================
// Transitions
// =========================================================================

#[test]
fn started_opens_a_run() {
    let next = transition(None, &RunEvent::started("a", "etl", t0())).unwrap();
    assert_eq!(next, RunStatus::Running);
}

#[test]
fn progressed_without_started_is_out_of_order() {
    let err = transition(None, &RunEvent::progressed("b", "etl", t0(), 10.0)).unwrap_err();
    assert!(matches!(err, IngestError::OutOfOrderEvent { ref run_id, .. } if run_id == "b"));
    assert_eq!(err.kind(), "OutOfOrderEvent");
}

#[test]
fn terminal_without_started_is_out_of_order() {
    let err = transition(None, &RunEvent::completed("b", "etl", t0(), Duration::minutes(1)))
        .unwrap_err();
    assert_eq!(err.kind(), "OutOfOrderEvent");
}

#[test]
fn second_terminal_is_duplicate() {
    let prior = lifecycle(RunStatus::Completed);
    let err = transition(
        Some(&prior),
        &RunEvent::failed("a", "etl", t0() + Duration::minutes(1), Duration::minutes(1)),
    )
    .unwrap_err();
    assert_eq!(err, IngestError::DuplicateTerminal { run_id: "a".into() });
}

#[test]
fn progress_after_terminal_is_stale() {
    let prior = lifecycle(RunStatus::Failed);
    let err = transition(
        Some(&prior),
        &RunEvent::progressed("a", "etl", t0() + Duration::minutes(1), 80.0),
    )
    .unwrap_err();
    assert_eq!(
        err,
        IngestError::StaleEvent {
            run_id: "a".into(),
            status: RunStatus::Failed
        }
    );
}

#[test]
fn restarting_a_known_run_is_stale() {
    let prior = lifecycle(RunStatus::Running);
    let err = transition(Some(&prior), &RunEvent::started("a", "etl", t0())).unwrap_err();
    assert_eq!(err.kind(), "StaleEvent");
}

#[test]
fn timestamp_regression_is_out_of_order() {
    let prior = lifecycle(RunStatus::Running);
    let err = transition(
        Some(&prior),
        &RunEvent::progressed("a", "etl", t0() - Duration::seconds(1), 20.0),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "OutOfOrderEvent");
}

#[test]
fn pipeline_mismatch_is_out_of_order() {
    let prior = lifecycle(RunStatus::Running);
    let err = transition(
        Some(&prior),
        &RunEvent::progressed("a", "other", t0(), 20.0),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "OutOfOrderEvent");
}

// =========================================================================
// Replay
// =========================================================================

#[test]
fn replay_reconstructs_completed_run() {
    let events = vec![
        RunEvent::started("a", "etl", t0()).with_pipeline_name("Customer ETL"),
        RunEvent::progressed("a", "etl", t0() + Duration::minutes(1), 50.0),
        RunEvent::completed("a", "etl", t0() + Duration::minutes(2), Duration::minutes(2)),
    ];

    let run = PipelineRun::replay(&events).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.duration_ms, Some(120_000));
    assert_eq!(run.progress_percent, 100.0);
    assert_eq!(run.pipeline_name.as_deref(), Some("Customer ETL"));
    assert_eq!(run.started_at, Some(t0()));
}

#[test]
fn replay_reconstructs_failed_run_with_error() {
    let events = vec![
        RunEvent::started("a", "etl", t0()),
        RunEvent::progressed("a", "etl", t0() + Duration::minutes(1), 30.0),
        RunEvent::failed("a", "etl", t0() + Duration::minutes(3), Duration::minutes(3))
            .with_error("connection refused"),
    ];

    let run = PipelineRun::replay(&events).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.progress_percent, 30.0);
    assert_eq!(run.error.as_deref(), Some("connection refused"));
}

#[test]
fn replay_stops_at_first_invalid_event() {
    let events = vec![
        RunEvent::started("a", "etl", t0()),
        RunEvent::completed("a", "etl", t0(), Duration::zero()),
        RunEvent::completed("a", "etl", t0(), Duration::zero()),
    ];
    let err = PipelineRun::replay(&events).unwrap_err();
    assert_eq!(err.kind(), "DuplicateTerminal");
}

#[test]
fn rejected_event_leaves_run_untouched() {
    let mut run = PipelineRun::pending("a", "etl");
    run.apply(&RunEvent::started("a", "etl", t0())).unwrap();
    let before = run.clone();

    let result = run.apply(&RunEvent::progressed("a", "etl", t0() - Duration::minutes(5), 90.0));
    assert!(result.is_err());
    assert_eq!(run, before);
}

#[test]
fn empty_replay_is_none() {
    let events: Vec<RunEvent> = Vec::new();
    assert!(PipelineRun::replay(&events).unwrap().is_none());
}
