//! Per-application worker task.
//!
//! One worker owns all mutable state for one application: bookkeeping
//! hashes, sync history, rollout machine. Every external input arrives
//! through the worker's mailbox or its own loop, so reconciliation and
//! rollout transitions are serialized per application without any
//! shared locks. Suspending on I/O here never blocks other
//! applications' workers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drift_diff::{diff, ChangeSet, DiffPolicy, DriftConflict, Orphan, RetryBudget, SpecHash};
use drift_model::{
    AppHealth, Application, DesiredTree, LiveResource, ResourceId, Revision, RolloutState,
    SyncOperation, SyncPhase, SyncStatus, SyncStatusCode,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::analysis::{AnalysisEngine, MetricsProvider};
use crate::cluster::ClusterApi;
use crate::health::{assess_app, HealthRules};
use crate::reconcile::{Reconciler, ReconcilerConfig};
use crate::rollout::{CommandRejected, OperatorCommand, RolloutAction, RolloutMachine};
use crate::source::SourceStore;

use super::{evaluate_gate, GateDecision, PendingSync, SyncReason};

/// Finalized operations retained per application.
const OPERATION_HISTORY_LIMIT: usize = 50;

/// Consecutive source failures tolerated quietly before surfacing.
const SOURCE_RETRY_LIMIT: u32 = 3;

/// Window for counting source failures.
const SOURCE_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Worker mailbox depth. Commands beyond this are shed at the sender.
pub const MAILBOX_SIZE: usize = 64;

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub struct AppWorkerDeps {
    pub source: Arc<dyn SourceStore>,
    pub cluster: Arc<dyn ClusterApi>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub refresh_interval: Duration,
    pub external_timeout: Duration,
    pub reconciler: ReconcilerConfig,
    pub health: HealthRules,
}

/// Accepted trigger acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct SyncTriggered {
    pub reason: SyncReason,

    /// Set when the trigger was deferred to the next sync window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred_until: Option<chrono::DateTime<Utc>>,
}

/// A trigger the gate refused.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TriggerDenied(pub String);

/// Messages handled by the worker.
#[derive(Debug)]
pub enum AppCommand {
    /// Request a sync. Replies once the trigger is gated; the sync
    /// itself runs inside the worker loop.
    TriggerSync {
        reason: SyncReason,
        reply: oneshot::Sender<Result<SyncTriggered, TriggerDenied>>,
    },

    /// Operator rollout command.
    Rollout {
        command: OperatorCommand,
        reply: oneshot::Sender<Result<RolloutState, CommandRejected>>,
    },

    /// Stop the worker, optionally deleting all managed resources.
    Shutdown {
        cascade: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Read-only status snapshot published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct AppStatusReport {
    pub app: Application,
    pub sync_status: SyncStatus,
    pub health: AppHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<SyncOperation>,
    pub operations: Vec<SyncOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutState>,
    pub orphans: Vec<Orphan>,
    pub conflicts: Vec<DriftConflict>,
}

impl AppStatusReport {
    fn initial(app: Application) -> Self {
        Self {
            app,
            sync_status: SyncStatus::unknown(),
            health: AppHealth::from_resources(Vec::new()),
            last_operation: None,
            operations: Vec::new(),
            rollout: None,
            orphans: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// The worker itself. Constructed by the registry, consumed by `run`.
pub struct AppWorker {
    app: Application,
    deps: AppWorkerDeps,
    reconciler: Reconciler,
    analysis: AnalysisEngine,

    /// Hash this engine last applied, per resource.
    last_applied: BTreeMap<ResourceId, SpecHash>,

    /// Finalized sync operations, oldest first.
    history: VecDeque<SyncOperation>,

    /// Active rollout, if the app is under progressive delivery.
    rollout: Option<RolloutMachine>,

    /// Revision of the last successful sync.
    last_synced: Option<Revision>,

    /// Revision traffic falls back to on rollout abort.
    stable: Option<Revision>,

    /// Collapsed trigger slot.
    pending: Option<PendingSync>,

    /// Source failures within the rolling window. Retried quietly up
    /// to the limit, surfaced loudly after.
    source_retries: RetryBudget,

    sync_status: SyncStatus,
    health: AppHealth,
    orphans: Vec<Orphan>,
    conflicts: Vec<DriftConflict>,

    status_tx: watch::Sender<AppStatusReport>,
}

impl AppWorker {
    /// Build a worker and the status channel the registry hands out.
    pub fn new(app: Application, deps: AppWorkerDeps) -> (Self, watch::Receiver<AppStatusReport>) {
        let (status_tx, status_rx) = watch::channel(AppStatusReport::initial(app.clone()));
        let reconciler = Reconciler::new(deps.cluster.clone(), deps.reconciler.clone());
        let analysis = AnalysisEngine::new(deps.metrics.clone(), deps.external_timeout);

        let worker = Self {
            app,
            deps,
            reconciler,
            analysis,
            last_applied: BTreeMap::new(),
            history: VecDeque::new(),
            rollout: None,
            last_synced: None,
            stable: None,
            pending: None,
            source_retries: RetryBudget::new(SOURCE_RETRY_LIMIT, SOURCE_RETRY_WINDOW),
            sync_status: SyncStatus::unknown(),
            health: AppHealth::from_resources(Vec::new()),
            orphans: Vec::new(),
            conflicts: Vec::new(),
            status_tx,
        };
        (worker, status_rx)
    }

    /// Run until shutdown. Commands and ticks are strictly interleaved:
    /// nothing here runs concurrently with anything else for this app.
    #[instrument(skip_all, fields(app = %self.app.name, app_id = %self.app.id))]
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AppCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            refresh_secs = self.deps.refresh_interval.as_secs_f64(),
            mode = %self.app.sync_policy.mode,
            "Application worker started"
        );

        let mut refresh = tokio::time::interval(self.deps.refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Don't immediately tick on startup - wait for first interval
        refresh.tick().await;

        // Cluster change notifications shortcut the periodic refresh.
        // The stream is restartable: on lag or disconnect we simply
        // resubscribe and let the next tick re-list.
        let mut events = self.deps.cluster.watch(&self.app.destination);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Worker received shutdown signal");
                        break;
                    }
                }

                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => {
                            debug!("Worker mailbox closed");
                            break;
                        }
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(_) => self.on_tick().await,
                        Err(_) => {
                            debug!("Cluster watch lagged or closed, resubscribing");
                            events = self.deps.cluster.watch(&self.app.destination);
                        }
                    }
                }

                _ = refresh.tick() => {
                    self.on_tick().await;
                }
            }
        }

        info!(operations = self.history.len(), "Application worker stopped");
    }

    /// Handle one mailbox command. Returns false to stop the worker.
    async fn handle_command(&mut self, cmd: AppCommand) -> bool {
        match cmd {
            AppCommand::TriggerSync { reason, reply } => {
                let now = Utc::now();
                let response = match evaluate_gate(&self.app, reason, now) {
                    GateDecision::Run => {
                        self.pending = Some(PendingSync {
                            reason,
                            requested_at: now,
                            not_before: None,
                        });
                        Ok(SyncTriggered {
                            reason,
                            deferred_until: None,
                        })
                    }
                    GateDecision::Defer { until } => {
                        // Deferred, not dropped; a newer trigger for the
                        // same app supersedes it.
                        info!(%reason, until = %until, "Sync deferred to next window");
                        self.pending = Some(PendingSync {
                            reason,
                            requested_at: now,
                            not_before: Some(until),
                        });
                        Ok(SyncTriggered {
                            reason,
                            deferred_until: Some(until),
                        })
                    }
                    GateDecision::Deny { reason: why } => Err(TriggerDenied(why)),
                };
                let _ = reply.send(response);
                self.run_pending_sync().await;
                true
            }

            AppCommand::Rollout { command, reply } => {
                let result = self.handle_rollout_command(command).await;
                let _ = reply.send(result);
                self.publish_status();
                true
            }

            AppCommand::Shutdown { cascade, reply } => {
                if cascade {
                    self.cascade_delete().await;
                }
                let _ = reply.send(());
                false
            }
        }
    }

    async fn handle_rollout_command(
        &mut self,
        command: OperatorCommand,
    ) -> Result<RolloutState, CommandRejected> {
        let now = Utc::now();
        let Some(mut machine) = self.rollout.take() else {
            return Err(CommandRejected::NoActiveRollout);
        };

        let result = machine.on_command(command, now);
        match result {
            Ok(actions) => {
                self.execute_rollout_actions(&mut machine, actions).await;
                let state = machine.state().clone();
                self.finish_rollout_drive(machine);
                Ok(state)
            }
            Err(rejected) => {
                self.rollout = Some(machine);
                Err(rejected)
            }
        }
    }

    /// Periodic drive: observe, detect, and act.
    async fn on_tick(&mut self) {
        self.refresh_observation().await;
        self.run_pending_sync().await;
        self.drive_rollout().await;
        self.publish_status();
    }

    /// Fetch the source and live state, recompute status, and raise
    /// automatic triggers per policy.
    async fn refresh_observation(&mut self) {
        let now = Utc::now();

        let fetched = tokio::time::timeout(
            self.deps.external_timeout,
            self.deps.source.fetch(&self.app.source),
        )
        .await;

        let (revision, tree) = match fetched {
            Ok(Ok(ok)) => {
                self.source_retries.clear("source");
                ok
            }
            Ok(Err(err)) => {
                if self.source_retries.record_failure("source") {
                    warn!(error = %err, "Source unreachable beyond retry budget");
                } else {
                    debug!(error = %err, "Source fetch failed during refresh, will retry");
                }
                self.sync_status = SyncStatus {
                    code: SyncStatusCode::Unknown,
                    revision: self.last_synced.clone(),
                    observed_at: now,
                };
                return;
            }
            Err(_) => {
                if self.source_retries.record_failure("source") {
                    warn!("Source fetch timing out beyond retry budget");
                } else {
                    debug!("Source fetch timed out during refresh, will retry");
                }
                return;
            }
        };

        let live = match tokio::time::timeout(
            self.deps.external_timeout,
            self.deps.cluster.list(&self.app.destination),
        )
        .await
        {
            Ok(Ok(live)) => live,
            Ok(Err(err)) => {
                debug!(error = %err, "Live listing failed during refresh");
                return;
            }
            Err(_) => return,
        };

        let change_set = self.plan(&tree, &live);

        self.sync_status = SyncStatus {
            code: if change_set.is_noop() && change_set.conflicts.is_empty() {
                SyncStatusCode::Synced
            } else {
                SyncStatusCode::OutOfSync
            },
            revision: Some(revision.clone()),
            observed_at: now,
        };
        self.health = assess_app(&self.deps.health, &tree, &live, now);
        self.orphans = change_set.orphans.clone();
        self.conflicts = change_set.conflicts.clone();

        // Automatic triggers: a new revision or actionable drift. Drift
        // that self-heal would not touch (conflicts) only reports.
        if self.pending.is_none() {
            if self.last_synced.as_ref() != Some(&revision) {
                self.enqueue_auto(SyncReason::NewRevision, now);
            } else if !change_set.is_noop() {
                self.enqueue_auto(SyncReason::Drift, now);
            }
        }
    }

    fn enqueue_auto(&mut self, reason: SyncReason, now: chrono::DateTime<Utc>) {
        match evaluate_gate(&self.app, reason, now) {
            GateDecision::Run => {
                debug!(%reason, "Automatic sync trigger");
                self.pending = Some(PendingSync {
                    reason,
                    requested_at: now,
                    not_before: None,
                });
            }
            GateDecision::Defer { until } => {
                debug!(%reason, until = %until, "Automatic sync trigger deferred");
                self.pending = Some(PendingSync {
                    reason,
                    requested_at: now,
                    not_before: Some(until),
                });
            }
            GateDecision::Deny { .. } => {}
        }
    }

    /// Execute the pending trigger if its time has come.
    async fn run_pending_sync(&mut self) {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|p| p.not_before.is_none_or(|t| Utc::now() >= t));
        if !due {
            return;
        }
        let pending = self.pending.take().expect("pending checked above");
        self.run_sync(pending.reason).await;
        self.publish_status();
    }

    /// One complete sync operation: fetch, diff, apply, record.
    #[instrument(skip(self), fields(app = %self.app.name))]
    async fn run_sync(&mut self, reason: SyncReason) {
        // Always converge to the latest revision, whatever revision the
        // trigger originally saw.
        let fetched = tokio::time::timeout(
            self.deps.external_timeout,
            self.deps.source.fetch(&self.app.source),
        )
        .await;

        let (revision, tree) = match fetched {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                self.record_failed_start(reason, format!("source fetch failed: {err}"));
                return;
            }
            Err(_) => {
                self.record_failed_start(reason, "source fetch timed out".to_string());
                return;
            }
        };

        let live = match tokio::time::timeout(
            self.deps.external_timeout,
            self.deps.cluster.list(&self.app.destination),
        )
        .await
        {
            Ok(Ok(live)) => live,
            Ok(Err(err)) => {
                self.record_failed_start(reason, format!("live listing failed: {err}"));
                return;
            }
            Err(_) => {
                self.record_failed_start(reason, "live listing timed out".to_string());
                return;
            }
        };

        let change_set = self.plan(&tree, &live);
        self.orphans = change_set.orphans.clone();
        self.conflicts = change_set.conflicts.clone();

        let mut op = SyncOperation::new(self.app.id, revision.clone());
        op.start();

        info!(
            sync = %op.id,
            %reason,
            revision = %revision.short(),
            creates = change_set.creates(),
            updates = change_set.updates(),
            deletes = change_set.deletes(),
            orphans = change_set.orphans.len(),
            conflicts = change_set.conflicts.len(),
            "Sync operation running"
        );

        if change_set.is_noop() {
            op.finalize(SyncPhase::Succeeded, None);
        } else {
            let outcome = self
                .reconciler
                .apply_change_set(
                    &self.app.destination,
                    &tree,
                    &change_set,
                    &mut self.last_applied,
                )
                .await;
            op.results = outcome.results;
            op.finalize(outcome.phase, outcome.message);
        }

        let phase = op.phase;
        info!(sync = %op.id, %phase, "Sync operation finalized");
        self.record_operation(op);

        if phase == SyncPhase::Succeeded {
            self.after_successful_sync(revision);
        }
    }

    /// A sync that could not start (source or cluster unreadable) is
    /// still recorded: failures are explicit statuses, never silence.
    fn record_failed_start(&mut self, reason: SyncReason, message: String) {
        warn!(%reason, message, "Sync could not start");
        let target = self
            .last_synced
            .clone()
            .unwrap_or_else(|| Revision::new("unknown"));
        let mut op = SyncOperation::new(self.app.id, target);
        op.start();
        op.finalize(SyncPhase::Error, Some(message));
        self.record_operation(op);
    }

    fn record_operation(&mut self, op: SyncOperation) {
        self.history.push_back(op);
        while self.history.len() > OPERATION_HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    /// Bookkeeping after convergence: track the synced revision and
    /// hand the new revision to the rollout controller when the app is
    /// under progressive delivery.
    fn after_successful_sync(&mut self, revision: Revision) {
        let previous = self.last_synced.replace(revision.clone());

        let Some(rollout_spec) = &self.app.rollout else {
            // No progressive delivery: the synced revision is stable.
            self.stable = Some(revision);
            return;
        };

        let superseded = match &self.rollout {
            Some(machine) => machine.state().canary_revision != revision,
            None => true,
        };

        if superseded {
            // The last known-good revision stays stable; a superseded
            // in-flight canary never becomes the fallback.
            if self.stable.is_none() {
                self.stable = previous;
            }
            info!(
                canary = %revision.short(),
                stable = ?self.stable,
                "New revision under progressive delivery, rollout resetting"
            );
            self.rollout = Some(RolloutMachine::new(
                rollout_spec.clone(),
                self.app.id,
                revision,
                self.stable.clone(),
            ));
        }
    }

    /// Drive the active rollout one beat: emit pending weight, run due
    /// analysis, follow up on the transitions they cause.
    async fn drive_rollout(&mut self) {
        let Some(mut machine) = self.rollout.take() else {
            return;
        };

        let actions = machine.on_tick(Utc::now());
        self.execute_rollout_actions(&mut machine, actions).await;
        self.finish_rollout_drive(machine);
    }

    async fn execute_rollout_actions(
        &mut self,
        machine: &mut RolloutMachine,
        mut actions: Vec<RolloutAction>,
    ) {
        // Each executed action may cause one follow-up (weight applied
        // -> next step's weight). Bound the chain defensively.
        let mut budget = 8;
        while let Some(action) = actions.pop() {
            if budget == 0 {
                break;
            }
            budget -= 1;

            match action {
                RolloutAction::SetWeight(weight) => {
                    let applied = tokio::time::timeout(
                        self.deps.external_timeout,
                        self.deps.cluster.set_weight(
                            &self.app.destination,
                            &self.app.name,
                            weight,
                        ),
                    )
                    .await;

                    match applied {
                        Ok(Ok(())) => {
                            machine.on_weight_applied(Utc::now());
                            actions = machine.on_tick(Utc::now());
                        }
                        Ok(Err(err)) => {
                            // Retried on the next tick; the machine
                            // keeps the weight pending.
                            warn!(weight, error = %err, "Traffic shift failed");
                        }
                        Err(_) => {
                            warn!(weight, "Traffic shift timed out");
                        }
                    }
                }
                RolloutAction::RunAnalysis => {
                    let Some(spec) = self.app.rollout.as_ref().and_then(|r| r.analysis.clone())
                    else {
                        continue;
                    };
                    let run = self.analysis.run(&spec).await;
                    debug!(run = %run.id, verdict = %run.verdict, "Analysis run complete");
                    actions = machine.on_analysis(run, Utc::now());
                }
            }
        }
    }

    fn finish_rollout_drive(&mut self, machine: RolloutMachine) {
        use drift_model::RolloutPhase;

        if machine.state().phase == RolloutPhase::Completed {
            // Canary becomes the stable revision for the next rollout.
            self.stable = Some(machine.state().canary_revision.clone());
        }
        self.rollout = Some(machine);
    }

    /// Delete everything this application manages. Used on cascading
    /// deregistration; bookkeeping stays consistent even when deletes
    /// fail partway.
    async fn cascade_delete(&mut self) {
        info!(resources = self.last_applied.len(), "Cascading deletion of managed resources");

        let live = match self.deps.cluster.list(&self.app.destination).await {
            Ok(live) => live,
            Err(err) => {
                warn!(error = %err, "Cascade listing failed, deleting from bookkeeping");
                Vec::new()
            }
        };
        let live_hashes = live_hash_map(&live);

        let empty = DesiredTree::empty(Revision::new("sha256:empty"));
        let change_set = diff(
            &empty,
            &self.last_applied,
            &live_hashes,
            DiffPolicy {
                prune: true,
                self_heal: false,
            },
        );

        let mut op = SyncOperation::new(self.app.id, empty.revision().clone());
        op.start();
        let outcome = self
            .reconciler
            .apply_change_set(
                &self.app.destination,
                &empty,
                &change_set,
                &mut self.last_applied,
            )
            .await;
        op.results = outcome.results;
        op.finalize(outcome.phase, outcome.message);
        self.record_operation(op);
        self.publish_status();
    }

    fn plan(&self, tree: &DesiredTree, live: &[LiveResource]) -> ChangeSet {
        diff(
            tree,
            &self.last_applied,
            &live_hash_map(live),
            DiffPolicy {
                prune: self.app.sync_policy.prune,
                self_heal: self.app.sync_policy.self_heal,
            },
        )
    }

    fn publish_status(&self) {
        let report = AppStatusReport {
            app: self.app.clone(),
            sync_status: self.sync_status.clone(),
            health: self.health.clone(),
            last_operation: self.history.back().cloned(),
            operations: self.history.iter().cloned().collect(),
            rollout: self.rollout.as_ref().map(|m| m.state().clone()),
            orphans: self.orphans.clone(),
            conflicts: self.conflicts.clone(),
        };
        self.status_tx.send_replace(report);
    }
}

fn live_hash_map(live: &[LiveResource]) -> BTreeMap<ResourceId, SpecHash> {
    live.iter()
        .map(|l| (l.id.clone(), SpecHash::of(&l.spec)))
        .collect()
}
