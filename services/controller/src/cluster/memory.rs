//! In-memory execution cluster.
//!
//! The dev-mode and test backend. Holds live resources in memory,
//! simulates kind-specific status convergence, and supports failure
//! injection so reconciliation error paths can be exercised without a
//! real cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drift_diff::SpecHash;
use drift_model::{
    Destination, LiveResource, ObservedStatus, ResourceDescriptor, ResourceId, ResourceKind,
    ResourceQuotas,
};
use tokio::sync::broadcast;

use super::{ApplyOutcome, ClusterApi, ClusterError, ClusterEvent};

const WATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredResource {
    spec: serde_json::Value,
    created_at: DateTime<Utc>,
    applied_at: DateTime<Utc>,
}

#[derive(Default)]
struct Faults {
    /// All calls fail with `Unavailable` while set.
    unavailable: bool,

    /// Applies of these identities are rejected.
    rejected: HashSet<ResourceId>,

    /// Identities whose next N applies fail transiently.
    flaky: HashMap<ResourceId, u32>,

    /// Extra restart counts reported for workloads.
    restarts: HashMap<ResourceId, u32>,
}

struct Inner {
    resources: BTreeMap<ResourceId, StoredResource>,
    weights: HashMap<(String, String), u8>,
    weight_history: HashMap<(String, String), Vec<u8>>,
    faults: Faults,
    max_workloads: Option<u32>,
}

/// In-memory cluster backend.
pub struct InMemoryCluster {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ClusterEvent>,

    /// Simulated time for a workload to report ready after apply.
    ready_after: Duration,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                resources: BTreeMap::new(),
                weights: HashMap::new(),
                weight_history: HashMap::new(),
                faults: Faults::default(),
                max_workloads: None,
            }),
            events,
            ready_after: Duration::ZERO,
        }
    }

    /// Workloads report zero ready replicas until this long after apply.
    pub fn with_ready_after(mut self, ready_after: Duration) -> Self {
        self.ready_after = ready_after;
        self
    }

    pub fn with_max_workloads(self, max: u32) -> Self {
        self.inner.lock().expect("cluster lock").max_workloads = Some(max);
        self
    }

    // -------------------------------------------------------------
    // Failure injection (test and dev tooling)
    // -------------------------------------------------------------

    /// Make every call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().expect("cluster lock").faults.unavailable = unavailable;
    }

    /// Permanently reject applies for one identity.
    pub fn reject_applies(&self, id: ResourceId) {
        self.inner
            .lock()
            .expect("cluster lock")
            .faults
            .rejected
            .insert(id);
    }

    /// Fail the next `count` applies of an identity transiently.
    pub fn fail_applies_transiently(&self, id: ResourceId, count: u32) {
        self.inner
            .lock()
            .expect("cluster lock")
            .faults
            .flaky
            .insert(id, count);
    }

    /// Report extra restarts for a workload.
    pub fn set_restarts(&self, id: ResourceId, restarts: u32) {
        self.inner
            .lock()
            .expect("cluster lock")
            .faults
            .restarts
            .insert(id, restarts);
    }

    /// Mutate a live resource behind the engine's back (drift).
    pub fn tamper(&self, id: &ResourceId, spec: serde_json::Value) {
        let mut inner = self.inner.lock().expect("cluster lock");
        if let Some(stored) = inner.resources.get_mut(id) {
            stored.spec = spec;
        }
        let _ = self.events.send(ClusterEvent::Updated(id.clone()));
    }

    /// Observed weight-change sequence for an app (oldest first).
    pub fn weight_history(&self, dest: &Destination, app: &str) -> Vec<u8> {
        self.inner
            .lock()
            .expect("cluster lock")
            .weight_history
            .get(&(dest.namespace.clone(), app.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Current canary weight for an app.
    pub fn current_weight(&self, dest: &Destination, app: &str) -> Option<u8> {
        self.inner
            .lock()
            .expect("cluster lock")
            .weights
            .get(&(dest.namespace.clone(), app.to_string()))
            .copied()
    }

    /// Live spec hash for one resource, if present.
    pub fn live_hash(&self, id: &ResourceId) -> Option<SpecHash> {
        self.inner
            .lock()
            .expect("cluster lock")
            .resources
            .get(id)
            .map(|r| SpecHash::of(&r.spec))
    }

    fn snapshot(&self, id: &ResourceId, stored: &StoredResource, faults: &Faults) -> LiveResource {
        let now = Utc::now();
        let mut status = ObservedStatus::default();

        match id.kind {
            ResourceKind::Workload => {
                let desired = stored
                    .spec
                    .get("replicas")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as u32;
                let elapsed = (now - stored.applied_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let ready = if elapsed >= self.ready_after { desired } else { 0 };
                status.desired_replicas = Some(desired);
                status.ready_replicas = Some(ready);
                status.recent_restarts = Some(faults.restarts.get(id).copied().unwrap_or(0));
            }
            ResourceKind::Service => {
                let elapsed = (now - stored.applied_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                status.ready_endpoints = Some(if elapsed >= self.ready_after { 1 } else { 0 });
            }
            _ => {}
        }

        LiveResource {
            id: id.clone(),
            spec: stored.spec.clone(),
            status,
            created_at: stored.created_at,
            observed_at: now,
        }
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list(&self, _dest: &Destination) -> Result<Vec<LiveResource>, ClusterError> {
        let inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }
        Ok(inner
            .resources
            .iter()
            .map(|(id, stored)| self.snapshot(id, stored, &inner.faults))
            .collect())
    }

    async fn get(
        &self,
        _dest: &Destination,
        id: &ResourceId,
    ) -> Result<Option<LiveResource>, ClusterError> {
        let inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }
        Ok(inner
            .resources
            .get(id)
            .map(|stored| self.snapshot(id, stored, &inner.faults)))
    }

    async fn apply(
        &self,
        _dest: &Destination,
        descriptor: &ResourceDescriptor,
    ) -> Result<ApplyOutcome, ClusterError> {
        let mut inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }
        if inner.faults.rejected.contains(&descriptor.id) {
            return Err(ClusterError::Rejected(format!(
                "descriptor for {} rejected by admission",
                descriptor.id
            )));
        }
        if let Some(remaining) = inner.faults.flaky.get_mut(&descriptor.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Unavailable(format!(
                    "transient fault applying {}",
                    descriptor.id
                )));
            }
        }

        let now = Utc::now();
        match inner.resources.get_mut(&descriptor.id) {
            Some(stored) if SpecHash::of(&stored.spec) == SpecHash::of(&descriptor.spec) => {
                Ok(ApplyOutcome::Unchanged)
            }
            Some(stored) => {
                stored.spec = descriptor.spec.clone();
                stored.applied_at = now;
                let _ = self.events.send(ClusterEvent::Updated(descriptor.id.clone()));
                Ok(ApplyOutcome::Applied)
            }
            None => {
                inner.resources.insert(
                    descriptor.id.clone(),
                    StoredResource {
                        spec: descriptor.spec.clone(),
                        created_at: now,
                        applied_at: now,
                    },
                );
                let _ = self.events.send(ClusterEvent::Updated(descriptor.id.clone()));
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    async fn delete(&self, _dest: &Destination, id: &ResourceId) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }
        if inner.resources.remove(id).is_some() {
            let _ = self.events.send(ClusterEvent::Deleted(id.clone()));
        }
        Ok(())
    }

    fn watch(&self, _dest: &Destination) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    async fn set_weight(
        &self,
        dest: &Destination,
        app: &str,
        weight: u8,
    ) -> Result<(), ClusterError> {
        let mut inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }
        let key = (dest.namespace.clone(), app.to_string());
        let previous = inner.weights.insert(key.clone(), weight);
        if previous != Some(weight) {
            inner.weight_history.entry(key).or_default().push(weight);
        }
        Ok(())
    }

    async fn quotas(&self) -> Result<ResourceQuotas, ClusterError> {
        let inner = self.inner.lock().expect("cluster lock");
        if inner.faults.unavailable {
            return Err(ClusterError::Unavailable("injected outage".to_string()));
        }

        let mut used_workloads = 0;
        let mut used_total_replicas = 0;
        for (id, stored) in &inner.resources {
            if id.kind == ResourceKind::Workload {
                used_workloads += 1;
                used_total_replicas += stored
                    .spec
                    .get("replicas")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as u32;
            }
        }

        Ok(ResourceQuotas {
            max_workloads: inner.max_workloads,
            max_total_replicas: None,
            used_workloads,
            used_total_replicas,
        })
    }
}
