//! Progressive-delivery rollout configuration and state.

use chrono::{DateTime, Utc};
use drift_id::{AppId, RolloutId};
use serde::{Deserialize, Serialize};

use crate::{AnalysisRun, AnalysisSpec, Revision};

/// Operator-tunable progressive-delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    /// Traffic weights per step (0–100). Must be non-empty and strictly
    /// increasing; the final step is promoted to weight 100 on
    /// completion regardless.
    pub steps: Vec<u8>,

    /// Dwell at each step before promotion when no analysis is
    /// configured, and the minimum dwell before the first analysis run.
    pub dwell_seconds: u64,

    /// Metric analysis evaluated while paused at a step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSpec>,

    /// Consecutive failed analysis runs that trigger an abort. The
    /// default of 1 rolls back on the first failed run.
    pub max_consecutive_failures: u32,

    /// Inconclusive runs tolerated at one step before escalating to a
    /// failure. Uncertainty defaults toward caution, not progress.
    pub inconclusive_budget: u32,
}

impl Default for RolloutSpec {
    fn default() -> Self {
        Self {
            steps: vec![10, 25, 50, 100],
            dwell_seconds: 30,
            analysis: None,
            max_consecutive_failures: 1,
            inconclusive_budget: 3,
        }
    }
}

impl RolloutSpec {
    /// Validate the step sequence: non-empty, weights in 1–100,
    /// strictly increasing.
    pub fn validate(&self) -> Result<(), RolloutSpecError> {
        if self.steps.is_empty() {
            return Err(RolloutSpecError::NoSteps);
        }
        let mut prev = 0u8;
        for &w in &self.steps {
            if w == 0 || w > 100 {
                return Err(RolloutSpecError::WeightOutOfRange(w));
            }
            if w <= prev {
                return Err(RolloutSpecError::NotIncreasing);
            }
            prev = w;
        }
        Ok(())
    }
}

/// Validation errors for a rollout spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RolloutSpecError {
    #[error("rollout must define at least one step")]
    NoSteps,

    #[error("step weight {0} outside 1-100")]
    WeightOutOfRange(u8),

    #[error("step weights must be strictly increasing")]
    NotIncreasing,
}

/// Rollout state-machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// New canary revision observed; weight reset to zero.
    Initializing,
    /// Shifting traffic to the current step's weight.
    Stepping,
    /// Dwelling at a step awaiting dwell expiry or an analysis verdict.
    Paused,
    /// A step passed; advancing.
    Promoting,
    /// A step failed; returning all traffic to stable.
    Aborting,
    /// All steps passed; canary is the new stable at weight 100.
    Completed,
    /// Aborted; all traffic back on stable at weight 0.
    RolledBack,
}

impl RolloutPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutPhase::Completed | RolloutPhase::RolledBack)
    }
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RolloutPhase::Initializing => "initializing",
            RolloutPhase::Stepping => "stepping",
            RolloutPhase::Paused => "paused",
            RolloutPhase::Promoting => "promoting",
            RolloutPhase::Aborting => "aborting",
            RolloutPhase::Completed => "completed",
            RolloutPhase::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

/// Live state of one rollout. Mutated only by the rollout machine,
/// which itself runs only inside the owning application's worker task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub id: RolloutId,

    pub app_id: AppId,

    /// Revision being rolled out.
    pub canary_revision: Revision,

    /// Revision traffic falls back to on abort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_revision: Option<Revision>,

    pub phase: RolloutPhase,

    /// Index into the spec's step list.
    pub step_index: usize,

    /// Current canary traffic weight (0–100). Monotonically
    /// non-decreasing within one rollout except an abort, which resets
    /// it to exactly 0.
    pub weight: u8,

    /// Operator hold: while set, automated verdicts and dwell expiry
    /// are recorded but cause no transition.
    pub operator_hold: bool,

    /// Passed analysis runs at the current step.
    pub passed_checks: u32,

    /// Failed analysis runs at the current step.
    pub failed_checks: u32,

    /// Inconclusive analysis runs at the current step.
    pub inconclusive_checks: u32,

    /// Consecutive failed runs across the rollout.
    pub consecutive_failures: u32,

    /// Analysis runs retained for audit.
    pub analysis_history: Vec<AnalysisRun>,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl RolloutState {
    /// Fresh state for a new canary revision.
    pub fn new(app_id: AppId, canary: Revision, stable: Option<Revision>) -> Self {
        let now = Utc::now();
        Self {
            id: RolloutId::new(),
            app_id,
            canary_revision: canary,
            stable_revision: stable,
            phase: RolloutPhase::Initializing,
            step_index: 0,
            weight: 0,
            operator_hold: false,
            passed_checks: 0,
            failed_checks: 0,
            inconclusive_checks: 0,
            consecutive_failures: 0,
            analysis_history: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether the rollout is dwelling at a step (paused flag of the
    /// data model: either awaiting analysis/dwell or held by an
    /// operator).
    pub fn is_paused(&self) -> bool {
        self.phase == RolloutPhase::Paused || self.operator_hold
    }
}
