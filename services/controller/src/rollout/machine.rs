//! The rollout state machine.
//!
//! Pure and synchronous: time comes in through method arguments, side
//! effects go out as [`RolloutAction`]s for the driver to execute.
//! Weight is monotonically non-decreasing within one rollout except an
//! abort, which resets it to exactly zero. Abort is reachable from
//! every non-terminal phase and idempotent.
//!
//! ```text
//! Initializing -> Stepping(i) -> Paused -> Promoting -> Stepping(i+1) ...
//!                     |            |           |
//!                     |            |           +--(steps exhausted)--> Completed
//!                     +------------+--(fail / operator abort)--> Aborting -> RolledBack
//! ```

use chrono::{DateTime, Duration, Utc};
use drift_id::AppId;
use drift_model::{AnalysisRun, Revision, RolloutPhase, RolloutSpec, RolloutState, Verdict};
use tracing::{debug, info, warn};

use super::{CommandRejected, OperatorCommand};

/// Analysis runs retained on the state for audit.
const ANALYSIS_HISTORY_LIMIT: usize = 50;

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutAction {
    /// Shift canary traffic to this weight.
    SetWeight(u8),

    /// Run one analysis evaluation and feed the result back through
    /// [`RolloutMachine::on_analysis`].
    RunAnalysis,
}

/// State machine for one rollout of one canary revision.
pub struct RolloutMachine {
    spec: RolloutSpec,
    state: RolloutState,

    /// Weight the driver still has to apply to the cluster.
    pending_weight: Option<u8>,

    /// When dwell at the current step ends (no-analysis policy).
    dwell_until: Option<DateTime<Utc>>,

    /// When the next analysis run is due (analysis policy).
    next_analysis_at: Option<DateTime<Utc>>,
}

impl RolloutMachine {
    /// Start a rollout for a new canary revision. Weight starts at
    /// zero and is applied to the cluster before the first step.
    pub fn new(
        spec: RolloutSpec,
        app_id: AppId,
        canary: Revision,
        stable: Option<Revision>,
    ) -> Self {
        let state = RolloutState::new(app_id, canary, stable);
        info!(
            rollout = %state.id,
            canary = %state.canary_revision.short(),
            steps = ?spec.steps,
            "Rollout initializing"
        );
        Self {
            spec,
            state,
            pending_weight: Some(0),
            dwell_until: None,
            next_analysis_at: None,
        }
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.phase.is_terminal()
    }

    /// Whether the driver still owes the cluster a weight change.
    pub fn has_pending_weight(&self) -> bool {
        self.pending_weight.is_some()
    }

    /// Periodic drive. Emits the pending weight until the driver
    /// confirms it, then advances dwell- or analysis-gated progress.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<RolloutAction> {
        if let Some(weight) = self.pending_weight {
            return vec![RolloutAction::SetWeight(weight)];
        }

        match self.state.phase {
            RolloutPhase::Paused => {
                if self.state.operator_hold {
                    return Vec::new();
                }

                if self.spec.analysis.is_some() {
                    match self.next_analysis_at {
                        Some(due) if now >= due => vec![RolloutAction::RunAnalysis],
                        _ => Vec::new(),
                    }
                } else if self.dwell_until.is_some_and(|until| now >= until) {
                    self.promote(now);
                    self.emit_pending()
                } else {
                    Vec::new()
                }
            }
            // Pending weight is always set in these phases; reaching
            // here means the driver already applied it.
            RolloutPhase::Initializing | RolloutPhase::Stepping => {
                vec![RolloutAction::SetWeight(self.state.weight)]
            }
            RolloutPhase::Promoting
            | RolloutPhase::Aborting
            | RolloutPhase::Completed
            | RolloutPhase::RolledBack => Vec::new(),
        }
    }

    /// Driver confirmation that the pending weight reached the cluster.
    pub fn on_weight_applied(&mut self, now: DateTime<Utc>) {
        let Some(weight) = self.pending_weight.take() else {
            return;
        };
        self.state.weight = weight;
        self.state.updated_at = now;

        match self.state.phase {
            RolloutPhase::Initializing => self.enter_step(0, now),
            RolloutPhase::Stepping => {
                debug!(
                    rollout = %self.state.id,
                    step = self.state.step_index,
                    weight,
                    "Step weight applied, pausing"
                );
                self.state.phase = RolloutPhase::Paused;
                self.dwell_until = Some(now + Duration::seconds(self.spec.dwell_seconds as i64));
                self.next_analysis_at =
                    Some(now + Duration::seconds(self.spec.dwell_seconds as i64));
            }
            // Terminal weights (100 on completion, 0 on rollback) need
            // no further transition.
            _ => {}
        }
    }

    /// Feed one completed analysis run into the machine.
    pub fn on_analysis(&mut self, run: AnalysisRun, now: DateTime<Utc>) -> Vec<RolloutAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        let verdict = run.verdict;
        self.record_run(run);
        self.state.updated_at = now;

        if self.state.operator_hold {
            // Operator precedence: verdicts are recorded but drive
            // nothing while the hold is in place.
            debug!(rollout = %self.state.id, %verdict, "Verdict recorded under operator hold");
            return Vec::new();
        }

        let interval = self
            .spec
            .analysis
            .as_ref()
            .map(|a| a.interval_seconds)
            .unwrap_or(self.spec.dwell_seconds);

        match verdict {
            Verdict::Pass => {
                self.state.passed_checks += 1;
                self.state.consecutive_failures = 0;
                self.promote(now);
            }
            Verdict::Fail => {
                self.state.failed_checks += 1;
                self.state.consecutive_failures += 1;
                if self.state.consecutive_failures >= self.spec.max_consecutive_failures {
                    self.abort(now);
                } else {
                    self.next_analysis_at = Some(now + Duration::seconds(interval as i64));
                }
            }
            Verdict::Inconclusive => {
                self.state.inconclusive_checks += 1;
                if self.state.inconclusive_checks > self.spec.inconclusive_budget {
                    // Retry budget exhausted: uncertainty escalates to
                    // failure, never to progress.
                    warn!(
                        rollout = %self.state.id,
                        inconclusive = self.state.inconclusive_checks,
                        "Inconclusive budget exhausted, escalating to failure"
                    );
                    self.state.failed_checks += 1;
                    self.state.consecutive_failures += 1;
                    if self.state.consecutive_failures >= self.spec.max_consecutive_failures {
                        self.abort(now);
                    } else {
                        self.next_analysis_at = Some(now + Duration::seconds(interval as i64));
                    }
                } else {
                    self.next_analysis_at = Some(now + Duration::seconds(interval as i64));
                }
            }
        }

        self.emit_pending()
    }

    /// Operator command. Takes precedence over automation; returns the
    /// violated precondition otherwise.
    pub fn on_command(
        &mut self,
        command: OperatorCommand,
        now: DateTime<Utc>,
    ) -> Result<Vec<RolloutAction>, CommandRejected> {
        match command {
            OperatorCommand::Pause => {
                if self.is_terminal() {
                    return Err(CommandRejected::Finished(self.state.phase));
                }
                info!(rollout = %self.state.id, "Operator hold placed");
                self.state.operator_hold = true;
                self.state.updated_at = now;
                Ok(Vec::new())
            }
            OperatorCommand::Resume => {
                if self.is_terminal() {
                    return Err(CommandRejected::Finished(self.state.phase));
                }
                info!(rollout = %self.state.id, "Operator hold lifted");
                self.state.operator_hold = false;
                self.state.updated_at = now;
                if self.state.phase == RolloutPhase::Paused {
                    // Restart the current step's clock.
                    self.dwell_until =
                        Some(now + Duration::seconds(self.spec.dwell_seconds as i64));
                    self.next_analysis_at =
                        Some(now + Duration::seconds(self.spec.dwell_seconds as i64));
                }
                Ok(self.emit_pending())
            }
            OperatorCommand::Abort => {
                if self.state.phase == RolloutPhase::RolledBack {
                    // Aborting an aborted rollout is a no-op, not an
                    // error.
                    return Ok(Vec::new());
                }
                if self.state.phase == RolloutPhase::Completed {
                    return Err(CommandRejected::Finished(self.state.phase));
                }
                self.abort(now);
                Ok(self.emit_pending())
            }
            OperatorCommand::Promote => {
                if self.is_terminal() {
                    return Err(CommandRejected::Finished(self.state.phase));
                }
                info!(rollout = %self.state.id, step = self.state.step_index, "Manual promotion");
                self.promote(now);
                Ok(self.emit_pending())
            }
        }
    }

    // -------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------

    fn enter_step(&mut self, index: usize, now: DateTime<Utc>) {
        self.state.phase = RolloutPhase::Stepping;
        self.state.step_index = index;
        self.state.passed_checks = 0;
        self.state.failed_checks = 0;
        self.state.inconclusive_checks = 0;
        self.pending_weight = Some(self.spec.steps[index]);
        self.dwell_until = None;
        self.next_analysis_at = None;
        self.state.updated_at = now;
        debug!(
            rollout = %self.state.id,
            step = index,
            weight = self.spec.steps[index],
            "Entering step"
        );
    }

    fn promote(&mut self, now: DateTime<Utc>) {
        self.state.phase = RolloutPhase::Promoting;
        self.state.updated_at = now;

        let next = self.state.step_index + 1;
        if next >= self.spec.steps.len() {
            info!(rollout = %self.state.id, "Steps exhausted, rollout completed");
            self.state.phase = RolloutPhase::Completed;
            if self.state.weight != 100 {
                self.pending_weight = Some(100);
            }
            self.dwell_until = None;
            self.next_analysis_at = None;
        } else {
            self.enter_step(next, now);
        }
    }

    fn abort(&mut self, now: DateTime<Utc>) {
        warn!(
            rollout = %self.state.id,
            step = self.state.step_index,
            weight = self.state.weight,
            stable = ?self.state.stable_revision,
            "Aborting rollout, returning traffic to stable"
        );
        self.state.phase = RolloutPhase::Aborting;
        self.state.phase = RolloutPhase::RolledBack;
        self.pending_weight = Some(0);
        self.dwell_until = None;
        self.next_analysis_at = None;
        self.state.updated_at = now;
    }

    fn record_run(&mut self, run: AnalysisRun) {
        self.state.analysis_history.push(run);
        if self.state.analysis_history.len() > ANALYSIS_HISTORY_LIMIT {
            let excess = self.state.analysis_history.len() - ANALYSIS_HISTORY_LIMIT;
            self.state.analysis_history.drain(..excess);
        }
    }

    fn emit_pending(&self) -> Vec<RolloutAction> {
        match self.pending_weight {
            Some(weight) => vec![RolloutAction::SetWeight(weight)],
            None => Vec::new(),
        }
    }
}
