//! Change-set application.
//!
//! The reconciler walks an ordered change-set and converges the cluster
//! one resource at a time. Partial progress is persisted into the
//! caller's bookkeeping resource-by-resource, so a retried operation
//! resumes instead of restarting. Transient cluster failures are
//! retried with exponential backoff up to a bounded attempt count;
//! rejections are terminal for the resource and isolated from the rest
//! of the change-set; losing the cluster entirely aborts the pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use drift_diff::{BackoffPolicy, ChangeSet, DiffOp, PlannedChange, SpecHash};
use drift_model::{
    Destination, DesiredTree, ResourceId, ResourceOutcome, ResourceResult, SyncPhase,
};
use tracing::{debug, instrument, warn};

use crate::cluster::{ClusterApi, ClusterError};

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Attempts per resource, including the first.
    pub max_attempts: u32,

    /// Backoff between attempts.
    pub backoff: BackoffPolicy,

    /// Timeout for each cluster call. A timeout counts as a transient
    /// failure.
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: BackoffPolicy::default(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Terminal phase for the enclosing sync operation.
    pub phase: SyncPhase,

    /// Per-resource results, in apply order.
    pub results: Vec<ResourceResult>,

    pub message: Option<String>,
}

/// Applies change-sets to the execution cluster.
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    config: ReconcilerConfig,
}

enum ResourceAttempt {
    Done(ResourceOutcome, u32, Option<String>),
    /// The cluster could not be reached through every retry.
    Lost(u32, String),
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: ReconcilerConfig) -> Self {
        Self { cluster, config }
    }

    /// Apply a change-set in order.
    ///
    /// `bookkeeping` maps resource identity to the hash this engine
    /// last applied; it is updated as each resource lands so partial
    /// progress survives an aborted pass.
    #[instrument(skip_all, fields(target = %change_set.target.short(), changes = change_set.changes.len()))]
    pub async fn apply_change_set(
        &self,
        dest: &Destination,
        desired: &DesiredTree,
        change_set: &ChangeSet,
        bookkeeping: &mut BTreeMap<ResourceId, SpecHash>,
    ) -> ReconcileOutcome {
        let mut results = Vec::new();
        let mut rejected = 0u32;
        let mut touched = Vec::new();

        for change in &change_set.changes {
            match self.apply_one(dest, desired, change).await {
                ResourceAttempt::Done(outcome, attempts, message) => {
                    match outcome {
                        ResourceOutcome::Applied | ResourceOutcome::Unchanged => {
                            if let Some(hash) = &change.desired_hash {
                                bookkeeping.insert(change.id.clone(), hash.clone());
                            }
                            touched.push(change.id.clone());
                        }
                        ResourceOutcome::Pruned => {
                            bookkeeping.remove(&change.id);
                        }
                        ResourceOutcome::Rejected => {
                            rejected += 1;
                        }
                    }
                    results.push(ResourceResult {
                        id: change.id.clone(),
                        outcome,
                        attempts,
                        message,
                    });
                }
                ResourceAttempt::Lost(attempts, message) => {
                    // Infrastructure-level failure: the cluster is gone,
                    // not just this resource. Abort the pass; what has
                    // already landed stays recorded.
                    warn!(
                        resource = %change.id,
                        attempts,
                        "Cluster unreachable, aborting reconciliation pass"
                    );
                    self.refresh_live_hashes(dest, &touched, bookkeeping).await;
                    return ReconcileOutcome {
                        phase: SyncPhase::Error,
                        results,
                        message: Some(message),
                    };
                }
            }
        }

        self.refresh_live_hashes(dest, &touched, bookkeeping).await;

        let (phase, message) = if rejected > 0 {
            (
                SyncPhase::Failed,
                Some(format!("{rejected} resource(s) rejected by the cluster")),
            )
        } else {
            (SyncPhase::Succeeded, None)
        };

        ReconcileOutcome {
            phase,
            results,
            message,
        }
    }

    /// Apply or delete one resource with bounded retries.
    async fn apply_one(
        &self,
        dest: &Destination,
        desired: &DesiredTree,
        change: &PlannedChange,
    ) -> ResourceAttempt {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let call = async {
                match change.op {
                    DiffOp::Create | DiffOp::Update => {
                        let Some(descriptor) = desired.get(&change.id) else {
                            // Planned against a tree that no longer has
                            // the resource; treat as rejected input.
                            return Err(ClusterError::Rejected(format!(
                                "descriptor for {} missing from desired tree",
                                change.id
                            )));
                        };
                        self.cluster.apply(dest, descriptor).await.map(Some)
                    }
                    DiffOp::Delete => self.cluster.delete(dest, &change.id).await.map(|_| None),
                }
            };

            let outcome = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ClusterError::Unavailable(format!(
                    "call timed out after {:?}",
                    self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(applied) => {
                    let outcome = match (change.op, applied) {
                        (DiffOp::Delete, _) => ResourceOutcome::Pruned,
                        (_, Some(crate::cluster::ApplyOutcome::Unchanged)) => {
                            ResourceOutcome::Unchanged
                        }
                        _ => ResourceOutcome::Applied,
                    };
                    debug!(resource = %change.id, op = %change.op, attempts, "Resource converged");
                    return ResourceAttempt::Done(outcome, attempts, None);
                }
                Err(err) if err.is_transient() => {
                    if attempts >= self.config.max_attempts {
                        return ResourceAttempt::Lost(attempts, err.to_string());
                    }
                    let delay = self.config.backoff.delay(attempts - 1);
                    debug!(
                        resource = %change.id,
                        attempts,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    // Non-transient: terminal for this resource, no retry.
                    warn!(resource = %change.id, error = %err, "Resource rejected");
                    return ResourceAttempt::Done(
                        ResourceOutcome::Rejected,
                        attempts,
                        Some(err.to_string()),
                    );
                }
            }
        }
    }

    /// Re-read live state for touched resources so the next diff cycle
    /// compares against what the cluster actually holds.
    async fn refresh_live_hashes(
        &self,
        dest: &Destination,
        touched: &[ResourceId],
        bookkeeping: &mut BTreeMap<ResourceId, SpecHash>,
    ) {
        for id in touched {
            match tokio::time::timeout(self.config.call_timeout, self.cluster.get(dest, id)).await
            {
                Ok(Ok(Some(live))) => {
                    bookkeeping.insert(id.clone(), SpecHash::of(&live.spec));
                }
                Ok(Ok(None)) => {
                    // Applied but already gone; keep the applied hash so
                    // the next diff recreates it.
                }
                Ok(Err(err)) => {
                    debug!(resource = %id, error = %err, "Live refresh failed, keeping applied hash");
                }
                Err(_) => {
                    debug!(resource = %id, "Live refresh timed out, keeping applied hash");
                }
            }
        }
    }
}
