//! Progressive-delivery flows, end to end: sync hands a new revision
//! to the rollout controller, analysis gates each step, aborts return
//! traffic to stable.

mod common;

use common::{harness, settle, wait_status, Harness};
use drift_controller::registry::ControlError;
use drift_controller::rollout::{CommandRejected, OperatorCommand};
use drift_model::{
    AnalysisSpec, Destination, MetricQuery, RolloutPhase, RolloutSpec, SyncStatusCode, Threshold,
};

const ERROR_RATE: &str = "error_rate";

fn analysis_spec(interval_seconds: u64) -> AnalysisSpec {
    AnalysisSpec {
        queries: vec![MetricQuery {
            name: "error-rate".to_string(),
            expr: ERROR_RATE.to_string(),
            threshold: Threshold::Bounds {
                min: None,
                max: Some(0.05),
            },
        }],
        min_samples: 3,
        window_seconds: 300,
        interval_seconds,
        ..AnalysisSpec::default()
    }
}

fn rollout_spec(analysis: Option<AnalysisSpec>, dwell_seconds: u64) -> RolloutSpec {
    RolloutSpec {
        steps: vec![20, 50, 100],
        dwell_seconds,
        analysis,
        max_consecutive_failures: 1,
        inconclusive_budget: 3,
    }
}

/// Register an app under progressive delivery and wait for its first
/// sync to converge.
async fn register_canary_app(
    h: &Harness,
    name: &str,
    rollout: RolloutSpec,
) -> (drift_id::AppId, Destination) {
    h.write_manifest(
        &format!("apps/{name}"),
        "workload.json",
        "workload",
        "prod",
        name,
        serde_json::json!({"replicas": 2}),
    );

    let mut new_app = h.new_app(name, &format!("apps/{name}"));
    new_app.rollout = Some(rollout);
    let destination = new_app.destination.clone();
    let app = h.registry.register(new_app).await.unwrap();

    wait_status(&h.registry, app.id, "initial convergence", |r| {
        r.sync_status.code == SyncStatusCode::Synced
    })
    .await;

    (app.id, destination)
}

fn assert_monotonic_except_abort(history: &[u8]) {
    for pair in history.windows(2) {
        if pair[1] < pair[0] {
            assert_eq!(pair[1], 0, "weight decreased to non-zero: {history:?}");
        }
    }
}

#[tokio::test]
async fn passing_analysis_walks_every_step_to_completion() {
    // Scenario: steps [20, 50, 100], consecutive pass verdicts. The
    // observed weight sequence is 20 -> 50 -> 100, final state
    // completed.
    let h = harness();
    h.metrics.set_flat(ERROR_RATE, 0.01, 5);

    let (app_id, dest) =
        register_canary_app(&h, "canary-pass", rollout_spec(Some(analysis_spec(0)), 0)).await;

    let report = wait_status(&h.registry, app_id, "rollout completion", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.phase == RolloutPhase::Completed)
    })
    .await;

    let rollout = report.rollout.unwrap();
    assert_eq!(rollout.weight, 100);
    assert!(rollout.passed_checks >= 1);

    let history = h.cluster.weight_history(&dest, "canary-pass");
    assert_eq!(history, vec![0, 20, 50, 100]);
    assert_monotonic_except_abort(&history);
}

#[tokio::test]
async fn failing_analysis_rolls_back_to_zero_weight() {
    // Scenario: the first step passes, then analysis fails at weight
    // 50. Weight goes straight to 0; no further steps execute.
    let h = harness();
    h.metrics.enqueue_flat(ERROR_RATE, 0.01, 5); // step 20 passes
    h.metrics.set_flat(ERROR_RATE, 0.9, 5); // everything after fails

    let (app_id, dest) =
        register_canary_app(&h, "canary-fail", rollout_spec(Some(analysis_spec(0)), 0)).await;

    let report = wait_status(&h.registry, app_id, "rollback", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.phase == RolloutPhase::RolledBack)
    })
    .await;

    let rollout = report.rollout.unwrap();
    assert_eq!(rollout.weight, 0);
    assert!(rollout.failed_checks >= 1);

    let history = h.cluster.weight_history(&dest, "canary-fail");
    assert_eq!(history, vec![0, 20, 50, 0]);
    assert!(!history.contains(&100), "no step beyond the failure");
    assert_monotonic_except_abort(&history);
}

#[tokio::test]
async fn missing_signal_escalates_to_rollback_never_to_pass() {
    // The provider has no data at all: every run is inconclusive.
    // Beyond the retry budget this resolves to failure, not progress.
    let h = harness();

    let (app_id, dest) = register_canary_app(
        &h,
        "canary-blind",
        rollout_spec(Some(analysis_spec(0)), 0),
    )
    .await;

    let report = wait_status(&h.registry, app_id, "fail-safe rollback", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.phase == RolloutPhase::RolledBack)
    })
    .await;

    let rollout = report.rollout.unwrap();
    assert_eq!(rollout.weight, 0);
    assert!(rollout.inconclusive_checks > 3);
    assert_eq!(rollout.passed_checks, 0);

    // Never progressed past the first step.
    let history = h.cluster.weight_history(&dest, "canary-blind");
    assert_eq!(history, vec![0, 20, 0]);
}

#[tokio::test]
async fn manual_promote_walks_steps_without_analysis() {
    // Long dwell, no analysis: only the operator moves this rollout.
    let h = harness();
    let (app_id, dest) = register_canary_app(&h, "canary-manual", rollout_spec(None, 3600)).await;

    wait_status(&h.registry, app_id, "first step pause", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.phase == RolloutPhase::Paused && ro.weight == 20)
    })
    .await;

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Promote)
        .await
        .unwrap();
    assert_eq!(state.weight, 50);
    assert_eq!(state.phase, RolloutPhase::Paused);

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Promote)
        .await
        .unwrap();
    assert_eq!(state.weight, 100);
    assert_eq!(state.phase, RolloutPhase::Paused);

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Promote)
        .await
        .unwrap();
    assert_eq!(state.phase, RolloutPhase::Completed);
    assert_eq!(state.weight, 100);

    assert_eq!(
        h.cluster.weight_history(&dest, "canary-manual"),
        vec![0, 20, 50, 100]
    );
}

#[tokio::test]
async fn abort_reaches_rolled_back_and_is_idempotent() {
    let h = harness();
    let (app_id, dest) = register_canary_app(&h, "canary-abort", rollout_spec(None, 3600)).await;

    wait_status(&h.registry, app_id, "first step pause", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.weight == 20)
    })
    .await;

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Abort)
        .await
        .unwrap();
    assert_eq!(state.phase, RolloutPhase::RolledBack);
    assert_eq!(state.weight, 0);

    // Aborting again is a no-op, not an error.
    let again = h
        .registry
        .rollout_command(app_id, OperatorCommand::Abort)
        .await
        .unwrap();
    assert_eq!(again.phase, RolloutPhase::RolledBack);
    assert_eq!(again.weight, 0);

    // Every other command now names the violated precondition.
    for command in [OperatorCommand::Pause, OperatorCommand::Resume, OperatorCommand::Promote] {
        let err = h.registry.rollout_command(app_id, command).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Rollout(CommandRejected::Finished(RolloutPhase::RolledBack))
        ));
    }

    assert_eq!(h.cluster.weight_history(&dest, "canary-abort"), vec![0, 20, 0]);
}

#[tokio::test]
async fn operator_hold_freezes_rollout_until_resume() {
    let h = harness();
    let (app_id, _dest) = register_canary_app(&h, "canary-hold", rollout_spec(None, 3600)).await;

    wait_status(&h.registry, app_id, "first step pause", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.weight == 20)
    })
    .await;

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Pause)
        .await
        .unwrap();
    assert!(state.operator_hold);

    settle().await;
    let report = h.registry.status(app_id).await.unwrap();
    assert_eq!(report.rollout.unwrap().weight, 20);

    let state = h
        .registry
        .rollout_command(app_id, OperatorCommand::Resume)
        .await
        .unwrap();
    assert!(!state.operator_hold);
}

#[tokio::test]
async fn new_revision_supersedes_inflight_rollout() {
    let h = harness();
    let (app_id, dest) = register_canary_app(&h, "canary-super", rollout_spec(None, 3600)).await;

    let report = wait_status(&h.registry, app_id, "first step pause", |r| {
        r.rollout.as_ref().is_some_and(|ro| ro.weight == 20)
    })
    .await;
    let first_canary = report.rollout.unwrap().canary_revision;

    // Push a new revision while the rollout dwells mid-flight.
    h.write_manifest(
        "apps/canary-super",
        "workload.json",
        "workload",
        "prod",
        "canary-super",
        serde_json::json!({"replicas": 4}),
    );

    let report = wait_status(&h.registry, app_id, "rollout supersede", |r| {
        r.rollout
            .as_ref()
            .is_some_and(|ro| ro.canary_revision != first_canary && ro.weight == 20)
    })
    .await;

    let rollout = report.rollout.unwrap();
    assert_eq!(rollout.step_index, 0);
    assert!(!rollout.phase.is_terminal());

    // Traffic was reset to zero before the new canary stepped again.
    let history = h.cluster.weight_history(&dest, "canary-super");
    assert_eq!(history, vec![0, 20, 0, 20]);
}

#[tokio::test]
async fn rollout_commands_require_an_active_rollout() {
    let h = harness();
    h.write_manifest(
        "apps/plain",
        "workload.json",
        "workload",
        "prod",
        "plain",
        serde_json::json!({"replicas": 1}),
    );
    let app = h.registry.register(h.new_app("plain", "apps/plain")).await.unwrap();
    wait_status(&h.registry, app.id, "initial convergence", |r| {
        r.sync_status.code == SyncStatusCode::Synced
    })
    .await;

    let err = h
        .registry
        .rollout_command(app.id, OperatorCommand::Pause)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::Rollout(CommandRejected::NoActiveRollout)
    ));
}
