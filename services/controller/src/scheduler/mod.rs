//! Sync scheduling: gating, trigger collapse, and per-app workers.
//!
//! Every application gets one worker task that owns all of its mutable
//! state. Reconciliation runs inline in that task, so the "at most one
//! running sync operation per application" invariant holds by
//! construction rather than by locking. Triggers that arrive while a
//! sync is in flight queue in the worker's pending slot and collapse to
//! the latest desired revision.

pub mod worker;

pub use worker::{AppCommand, AppStatusReport, AppWorker, AppWorkerDeps, SyncTriggered};

use chrono::{DateTime, Utc};
use drift_model::{next_window_open, windows_open, Application, SyncMode};
use serde::Serialize;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// Explicit operator trigger.
    Manual,

    /// The source moved to a new revision.
    NewRevision,

    /// Live state diverged from the last-applied state.
    Drift,
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncReason::Manual => write!(f, "manual"),
            SyncReason::NewRevision => write!(f, "new_revision"),
            SyncReason::Drift => write!(f, "drift"),
        }
    }
}

impl SyncReason {
    pub fn is_automatic(&self) -> bool {
        matches!(self, SyncReason::NewRevision | SyncReason::Drift)
    }
}

/// A trigger waiting to run. Newer triggers replace older ones; the
/// sync that eventually runs always converges to the latest revision.
#[derive(Debug, Clone)]
pub struct PendingSync {
    pub reason: SyncReason,
    pub requested_at: DateTime<Utc>,
    /// Deferred-until instant when the trigger arrived outside a sync
    /// window.
    pub not_before: Option<DateTime<Utc>>,
}

/// Gate decision for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Run at the next opportunity.
    Run,

    /// Out of window: deferred, not dropped.
    Defer { until: DateTime<Utc> },

    /// Policy forbids this trigger.
    Deny { reason: String },
}

/// Evaluate sync policy and windows for a trigger at `now`.
///
/// Policy is decided here, in one place, rather than scattered through
/// the reconciler.
pub fn evaluate_gate(app: &Application, reason: SyncReason, now: DateTime<Utc>) -> GateDecision {
    if reason.is_automatic() && app.sync_policy.mode == SyncMode::Manual {
        return GateDecision::Deny {
            reason: format!("sync mode is manual, ignoring {reason} trigger"),
        };
    }

    if !windows_open(&app.sync_windows, now) {
        return GateDecision::Defer {
            until: next_window_open(&app.sync_windows, now),
        };
    }

    GateDecision::Run
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use drift_id::AppId;
    use drift_model::{Destination, SourceRef, SyncPolicy, SyncWindow};

    fn app(mode: SyncMode, windows: Vec<SyncWindow>) -> Application {
        Application {
            id: AppId::new(),
            name: "api".to_string(),
            namespace: "default".to_string(),
            source: SourceRef {
                repo: "repo".to_string(),
                path: "apps/api".to_string(),
                target: None,
            },
            destination: Destination {
                cluster: "in-memory".to_string(),
                namespace: "prod".to_string(),
            },
            sync_policy: SyncPolicy {
                mode,
                prune: false,
                self_heal: false,
            },
            sync_windows: windows,
            rollout: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_manual_mode_denies_automatic_triggers() {
        let app = app(SyncMode::Manual, vec![]);
        let now = Utc::now();

        assert!(matches!(
            evaluate_gate(&app, SyncReason::NewRevision, now),
            GateDecision::Deny { .. }
        ));
        assert!(matches!(
            evaluate_gate(&app, SyncReason::Drift, now),
            GateDecision::Deny { .. }
        ));
        assert_eq!(evaluate_gate(&app, SyncReason::Manual, now), GateDecision::Run);
    }

    #[test]
    fn test_automatic_mode_allows_all_triggers() {
        let app = app(SyncMode::Automatic, vec![]);
        let now = Utc::now();

        for reason in [SyncReason::Manual, SyncReason::NewRevision, SyncReason::Drift] {
            assert_eq!(evaluate_gate(&app, reason, now), GateDecision::Run);
        }
    }

    #[test]
    fn test_out_of_window_trigger_deferred() {
        let window = SyncWindow {
            start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            duration_minutes: 60,
        };
        let app = app(SyncMode::Automatic, vec![window]);
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();

        let decision = evaluate_gate(&app, SyncReason::NewRevision, now);
        let GateDecision::Defer { until } = decision else {
            panic!("expected deferral, got {decision:?}");
        };
        assert_eq!(until, Utc.with_ymd_and_hms(2026, 3, 11, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_in_window_trigger_runs() {
        let window = SyncWindow {
            start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            duration_minutes: 60,
        };
        let app = app(SyncMode::Automatic, vec![window]);
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 2, 30, 0).unwrap();

        assert_eq!(evaluate_gate(&app, SyncReason::Drift, now), GateDecision::Run);
    }
}
