//! Diff and convergence primitives.
//!
//! This library provides the pieces a reconciliation loop needs to
//! converge live state onto desired state:
//!
//! - **Desired state**: what the source of truth declares (a revision).
//! - **Last-applied state**: what this engine last wrote to the cluster.
//! - **Live state**: what the cluster actually reports.
//!
//! The three-way diff between them yields an ordered change-set, plus
//! orphans (left the desired tree, prune disabled) and drift conflicts
//! (modified behind our back, self-heal disabled).
//!
//! # Invariants
//!
//! - Diffing is deterministic given the same inputs
//! - A converged input produces an empty change-set (idempotence)
//! - Change ordering respects kind precedence: creates before updates
//!   before deletes, namespaces and definitions before their dependents,
//!   deletes in reverse precedence

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use drift_model::{DesiredTree, ResourceId, Revision};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A content hash for deterministic spec comparison.
///
/// Used to detect when a resource's configuration has changed, either
/// in the desired tree or behind the engine's back in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn of(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the revision of a whole desired tree: a hash over every
/// resource identity and spec in canonical order.
pub fn tree_revision<'a>(
    resources: impl IntoIterator<Item = (&'a ResourceId, &'a serde_json::Value)>,
) -> Revision {
    let mut hasher = Sha256::new();
    for (id, spec) in resources {
        hasher.update(id.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_json(spec).as_bytes());
        hasher.update(b"\n");
    }
    Revision::new(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Operation to perform on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOp {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for DiffOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffOp::Create => write!(f, "create"),
            DiffOp::Update => write!(f, "update"),
            DiffOp::Delete => write!(f, "delete"),
        }
    }
}

/// One planned change within a change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub op: DiffOp,

    pub id: ResourceId,

    /// Hash of the desired content. Absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_hash: Option<SpecHash>,
}

/// A previously-managed resource that left the desired tree while prune
/// is disabled. Left untouched, reported for operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orphan {
    pub id: ResourceId,

    /// Hash the engine last applied for this resource.
    pub last_applied: SpecHash,
}

/// Live state diverged from last-applied state outside this engine's
/// own reconciliation, and self-heal is disabled. Reported, not
/// auto-corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftConflict {
    pub id: ResourceId,

    pub last_applied: SpecHash,

    pub live: SpecHash,

    pub detected_at: DateTime<Utc>,
}

/// The ordered output of a three-way diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Revision this change-set converges toward.
    pub target: Revision,

    /// Ordered operations: creates, then updates, then deletes; kind
    /// precedence within each group, deletes in reverse precedence.
    pub changes: Vec<PlannedChange>,

    pub orphans: Vec<Orphan>,

    pub conflicts: Vec<DriftConflict>,
}

impl ChangeSet {
    /// True when there is nothing to apply. Orphans and conflicts are
    /// reports, not work.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.op == DiffOp::Create)
            .count()
    }

    pub fn updates(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.op == DiffOp::Update)
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.op == DiffOp::Delete)
            .count()
    }
}

/// Policy knobs affecting diff output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffPolicy {
    /// Emit deletes for resources that left the desired tree.
    pub prune: bool,

    /// Fold external drift into the change-set unconditionally. When
    /// false, drifted resources become conflicts instead.
    pub self_heal: bool,
}

/// Compute the three-way diff between desired, last-applied, and live
/// state.
///
/// `last_applied` and `live` are hash maps keyed by resource identity;
/// callers derive them from bookkeeping and cluster snapshots. Running
/// the diff again on unchanged inputs yields an empty change-set.
pub fn diff(
    desired: &DesiredTree,
    last_applied: &BTreeMap<ResourceId, SpecHash>,
    live: &BTreeMap<ResourceId, SpecHash>,
    policy: DiffPolicy,
) -> ChangeSet {
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    let mut orphans = Vec::new();
    let mut conflicts = Vec::new();

    for (id, descriptor) in desired.iter() {
        let desired_hash = SpecHash::of(&descriptor.spec);

        match live.get(id) {
            None => {
                creates.push(PlannedChange {
                    op: DiffOp::Create,
                    id: id.clone(),
                    desired_hash: Some(desired_hash),
                });
            }
            Some(live_hash) if *live_hash == desired_hash => {
                // Converged; nothing to do.
            }
            Some(live_hash) => {
                let drifted = last_applied
                    .get(id)
                    .is_some_and(|applied| applied != live_hash);

                if drifted && !policy.self_heal {
                    conflicts.push(DriftConflict {
                        id: id.clone(),
                        last_applied: last_applied[id].clone(),
                        live: live_hash.clone(),
                        detected_at: Utc::now(),
                    });
                } else {
                    updates.push(PlannedChange {
                        op: DiffOp::Update,
                        id: id.clone(),
                        desired_hash: Some(desired_hash),
                    });
                }
            }
        }
    }

    for (id, applied_hash) in last_applied {
        if desired.contains(id) {
            continue;
        }
        if !live.contains_key(id) {
            // Already gone from the cluster; bookkeeping cleanup only.
            continue;
        }
        if policy.prune {
            deletes.push(PlannedChange {
                op: DiffOp::Delete,
                id: id.clone(),
                desired_hash: None,
            });
        } else {
            orphans.push(Orphan {
                id: id.clone(),
                last_applied: applied_hash.clone(),
            });
        }
    }

    // Creates and updates in kind precedence; deletes in reverse, so
    // dependents go before the namespaces and definitions they live in.
    creates.sort_by(|a, b| apply_key(a).cmp(&apply_key(b)));
    updates.sort_by(|a, b| apply_key(a).cmp(&apply_key(b)));
    deletes.sort_by(|a, b| apply_key(b).cmp(&apply_key(a)));

    let mut changes = creates;
    changes.append(&mut updates);
    changes.append(&mut deletes);

    ChangeSet {
        target: desired.revision().clone(),
        changes,
        orphans,
        conflicts,
    }
}

fn apply_key(change: &PlannedChange) -> (u8, ResourceId) {
    (change.id.kind.apply_rank(), change.id.clone())
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff configuration for transient apply failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        // Add jitter
        let jitter_range = delay * self.jitter;
        let jitter = rand_jitter(jitter_range);
        let final_delay = (delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple jitter using a basic LCG (for no external deps).
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = (seed.wrapping_mul(6364136223846793005).wrapping_add(1)) as f64;
    let normalized = (random / u64::MAX as f64) * 2.0 - 1.0; // -1.0 to 1.0
    normalized * range
}

// =============================================================================
// Retry bookkeeping
// =============================================================================

/// Retry budget for failing resources.
///
/// Tracks failures per resource key within a rolling window so a
/// reconciliation pass can tell transient flapping from exhaustion.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    /// Maximum retries per resource.
    max_retries: u32,

    /// Retry window duration.
    window: Duration,

    /// Tracked failures: resource_key -> (count, first_failure_time).
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryBudget {
    /// Create a new retry budget.
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a resource.
    ///
    /// Returns true if retries are exhausted.
    pub fn record_failure(&mut self, resource_key: &str) -> bool {
        let now = Instant::now();

        let (count, first) = self
            .failures
            .entry(resource_key.to_string())
            .or_insert((0, now));

        // Reset if outside window
        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count > self.max_retries
    }

    /// Check if retries are exhausted for a resource.
    pub fn is_exhausted(&self, resource_key: &str) -> bool {
        let Some((count, first)) = self.failures.get(resource_key) else {
            return false;
        };

        let now = Instant::now();
        if now.duration_since(*first) > self.window {
            return false;
        }

        *count > self.max_retries
    }

    /// Clear failure tracking for a resource (on success).
    pub fn clear(&mut self, resource_key: &str) {
        self.failures.remove(resource_key);
    }

    /// Prune expired entries.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_model::{ResourceDescriptor, ResourceKind};

    fn rid(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, "prod", name)
    }

    fn tree(resources: &[(ResourceId, serde_json::Value)]) -> DesiredTree {
        let map: BTreeMap<_, _> = resources
            .iter()
            .map(|(id, spec)| {
                (
                    id.clone(),
                    ResourceDescriptor::new(id.clone(), spec.clone()),
                )
            })
            .collect();
        let revision = tree_revision(map.iter().map(|(id, d)| (id, &d.spec)));
        DesiredTree::new(revision, map)
    }

    #[test]
    fn test_spec_hash_deterministic() {
        let json1 = serde_json::json!({"b": 2, "a": 1});
        let json2 = serde_json::json!({"a": 1, "b": 2});

        let hash1 = SpecHash::of(&json1);
        let hash2 = SpecHash::of(&json2);

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_tree_revision_deterministic() {
        let id = rid(ResourceKind::ConfigMap, "settings");
        let t1 = tree(&[(id.clone(), serde_json::json!({"x": 1}))]);
        let t2 = tree(&[(id, serde_json::json!({"x": 1}))]);
        assert_eq!(t1.revision(), t2.revision());
    }

    #[test]
    fn test_new_resource_is_created() {
        // Scenario: desired adds a resource not in live state.
        let id = rid(ResourceKind::Workload, "api");
        let desired = tree(&[(id.clone(), serde_json::json!({"replicas": 2}))]);

        let cs = diff(
            &desired,
            &BTreeMap::new(),
            &BTreeMap::new(),
            DiffPolicy::default(),
        );

        assert_eq!(cs.changes.len(), 1);
        assert_eq!(cs.changes[0].op, DiffOp::Create);
        assert_eq!(cs.changes[0].id, id);
    }

    #[test]
    fn test_converged_tree_is_noop() {
        let id = rid(ResourceKind::Workload, "api");
        let spec = serde_json::json!({"replicas": 2});
        let desired = tree(&[(id.clone(), spec.clone())]);

        let hash = SpecHash::of(&spec);
        let mut applied = BTreeMap::new();
        applied.insert(id.clone(), hash.clone());
        let mut live = BTreeMap::new();
        live.insert(id, hash);

        let cs = diff(&desired, &applied, &live, DiffPolicy::default());
        assert!(cs.is_noop());
        assert!(cs.orphans.is_empty());
        assert!(cs.conflicts.is_empty());
    }

    #[test]
    fn test_changed_spec_is_updated() {
        let id = rid(ResourceKind::Workload, "api");
        let desired = tree(&[(id.clone(), serde_json::json!({"replicas": 3}))]);

        let old = SpecHash::of(&serde_json::json!({"replicas": 2}));
        let mut applied = BTreeMap::new();
        applied.insert(id.clone(), old.clone());
        let mut live = BTreeMap::new();
        live.insert(id.clone(), old);

        let cs = diff(&desired, &applied, &live, DiffPolicy::default());
        assert_eq!(cs.changes.len(), 1);
        assert_eq!(cs.changes[0].op, DiffOp::Update);
    }

    #[test]
    fn test_drift_without_self_heal_is_conflict() {
        let id = rid(ResourceKind::ConfigMap, "settings");
        let desired_spec = serde_json::json!({"k": "v"});
        let desired = tree(&[(id.clone(), desired_spec.clone())]);

        // We applied the desired content, but someone edited it live.
        let mut applied = BTreeMap::new();
        applied.insert(id.clone(), SpecHash::of(&desired_spec));
        let mut live = BTreeMap::new();
        live.insert(id.clone(), SpecHash::of(&serde_json::json!({"k": "hacked"})));

        let cs = diff(&desired, &applied, &live, DiffPolicy::default());
        assert!(cs.is_noop());
        assert_eq!(cs.conflicts.len(), 1);
        assert_eq!(cs.conflicts[0].id, id);
    }

    #[test]
    fn test_drift_with_self_heal_is_update() {
        let id = rid(ResourceKind::ConfigMap, "settings");
        let desired_spec = serde_json::json!({"k": "v"});
        let desired = tree(&[(id.clone(), desired_spec.clone())]);

        let mut applied = BTreeMap::new();
        applied.insert(id.clone(), SpecHash::of(&desired_spec));
        let mut live = BTreeMap::new();
        live.insert(id.clone(), SpecHash::of(&serde_json::json!({"k": "hacked"})));

        let policy = DiffPolicy {
            self_heal: true,
            ..DiffPolicy::default()
        };
        let cs = diff(&desired, &applied, &live, policy);
        assert_eq!(cs.changes.len(), 1);
        assert_eq!(cs.changes[0].op, DiffOp::Update);
        assert!(cs.conflicts.is_empty());
    }

    #[test]
    fn test_removed_resource_orphaned_without_prune() {
        // Scenario: resource removed from desired tree, prune disabled.
        let keep = rid(ResourceKind::Workload, "api");
        let gone = rid(ResourceKind::ConfigMap, "legacy");
        let keep_spec = serde_json::json!({"replicas": 1});
        let desired = tree(&[(keep.clone(), keep_spec.clone())]);

        let gone_hash = SpecHash::of(&serde_json::json!({"old": true}));
        let keep_hash = SpecHash::of(&keep_spec);
        let mut applied = BTreeMap::new();
        applied.insert(keep.clone(), keep_hash.clone());
        applied.insert(gone.clone(), gone_hash.clone());
        let mut live = BTreeMap::new();
        live.insert(keep, keep_hash);
        live.insert(gone.clone(), gone_hash);

        let cs = diff(&desired, &applied, &live, DiffPolicy::default());
        assert!(cs.is_noop());
        assert_eq!(cs.orphans.len(), 1);
        assert_eq!(cs.orphans[0].id, gone);
    }

    #[test]
    fn test_removed_resource_deleted_with_prune() {
        let gone = rid(ResourceKind::ConfigMap, "legacy");
        let desired = tree(&[]);

        let gone_hash = SpecHash::of(&serde_json::json!({"old": true}));
        let mut applied = BTreeMap::new();
        applied.insert(gone.clone(), gone_hash.clone());
        let mut live = BTreeMap::new();
        live.insert(gone.clone(), gone_hash);

        let policy = DiffPolicy {
            prune: true,
            ..DiffPolicy::default()
        };
        let cs = diff(&desired, &applied, &live, policy);
        assert_eq!(cs.changes.len(), 1);
        assert_eq!(cs.changes[0].op, DiffOp::Delete);
        assert_eq!(cs.changes[0].id, gone);
    }

    #[test]
    fn test_unmanaged_live_resources_ignored() {
        let foreign = rid(ResourceKind::Workload, "not-ours");
        let desired = tree(&[]);

        let mut live = BTreeMap::new();
        live.insert(foreign, SpecHash::of(&serde_json::json!({})));

        let policy = DiffPolicy {
            prune: true,
            ..DiffPolicy::default()
        };
        let cs = diff(&desired, &BTreeMap::new(), &live, policy);
        assert!(cs.is_noop());
        assert!(cs.orphans.is_empty());
    }

    #[test]
    fn test_creates_respect_kind_precedence() {
        let workload = rid(ResourceKind::Workload, "api");
        let ns = ResourceId::new(ResourceKind::Namespace, "", "prod");
        let cfg = rid(ResourceKind::ConfigMap, "settings");
        let desired = tree(&[
            (workload.clone(), serde_json::json!({"replicas": 1})),
            (ns.clone(), serde_json::json!({})),
            (cfg.clone(), serde_json::json!({"k": "v"})),
        ]);

        let cs = diff(
            &desired,
            &BTreeMap::new(),
            &BTreeMap::new(),
            DiffPolicy::default(),
        );

        let order: Vec<_> = cs.changes.iter().map(|c| c.id.clone()).collect();
        assert_eq!(order, vec![ns, cfg, workload]);
    }

    #[test]
    fn test_deletes_in_reverse_precedence() {
        let workload = rid(ResourceKind::Workload, "api");
        let ns = ResourceId::new(ResourceKind::Namespace, "", "prod");
        let desired = tree(&[]);

        let mut applied = BTreeMap::new();
        let mut live = BTreeMap::new();
        for id in [&workload, &ns] {
            let h = SpecHash::of(&serde_json::json!({}));
            applied.insert(id.clone(), h.clone());
            live.insert(id.clone(), h);
        }

        let policy = DiffPolicy {
            prune: true,
            ..DiffPolicy::default()
        };
        let cs = diff(&desired, &applied, &live, policy);

        let order: Vec<_> = cs.changes.iter().map(|c| c.id.clone()).collect();
        assert_eq!(order, vec![workload, ns]);
    }

    #[test]
    fn test_backoff_policy() {
        let policy = BackoffPolicy::default();

        let d0 = policy.delay(0);
        let d1 = policy.delay(1);
        let d2 = policy.delay(2);

        // Should increase exponentially (with some jitter variance)
        assert!(d0 < Duration::from_millis(200));
        assert!(d1 < Duration::from_millis(400));
        assert!(d2 < Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_max() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };

        let d10 = policy.delay(10);
        assert!(d10 <= Duration::from_secs(6)); // max + some margin
    }

    #[test]
    fn test_retry_budget() {
        let mut budget = RetryBudget::new(3, Duration::from_secs(60));

        assert!(!budget.record_failure("workload/prod/api")); // 1st
        assert!(!budget.record_failure("workload/prod/api")); // 2nd
        assert!(!budget.record_failure("workload/prod/api")); // 3rd
        assert!(budget.record_failure("workload/prod/api")); // 4th - exhausted

        assert!(budget.is_exhausted("workload/prod/api"));
        assert!(!budget.is_exhausted("workload/prod/web"));

        budget.clear("workload/prod/api");
        assert!(!budget.is_exhausted("workload/prod/api"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_resource() -> impl Strategy<Value = (ResourceId, serde_json::Value)> {
            (
                prop_oneof![
                    Just(ResourceKind::Namespace),
                    Just(ResourceKind::ConfigMap),
                    Just(ResourceKind::Service),
                    Just(ResourceKind::Workload),
                ],
                "[a-z]{1,8}",
                0u32..64,
            )
                .prop_map(|(kind, name, v)| {
                    (
                        ResourceId::new(kind, "prod", name),
                        serde_json::json!({ "value": v }),
                    )
                })
        }

        proptest! {
            /// A tree diffed against its own applied/live hashes is
            /// always a no-op, whatever the policy.
            #[test]
            fn converged_diff_is_always_noop(
                resources in proptest::collection::vec(arb_resource(), 0..12),
                prune in any::<bool>(),
                self_heal in any::<bool>(),
            ) {
                let desired = tree(&resources);
                let mut applied = BTreeMap::new();
                let mut live = BTreeMap::new();
                for (id, descriptor) in desired.iter() {
                    let h = SpecHash::of(&descriptor.spec);
                    applied.insert(id.clone(), h.clone());
                    live.insert(id.clone(), h);
                }

                let cs = diff(&desired, &applied, &live, DiffPolicy { prune, self_heal });
                prop_assert!(cs.is_noop());
                prop_assert!(cs.orphans.is_empty());
                prop_assert!(cs.conflicts.is_empty());
            }

            /// Fresh trees produce creates in kind-precedence order.
            #[test]
            fn creates_are_rank_ordered(
                resources in proptest::collection::vec(arb_resource(), 0..12),
            ) {
                let desired = tree(&resources);
                let cs = diff(
                    &desired,
                    &BTreeMap::new(),
                    &BTreeMap::new(),
                    DiffPolicy::default(),
                );

                let ranks: Vec<_> = cs
                    .changes
                    .iter()
                    .map(|c| c.id.kind.apply_rank())
                    .collect();
                let mut sorted = ranks.clone();
                sorted.sort_unstable();
                prop_assert_eq!(ranks, sorted);
            }
        }
    }
}
