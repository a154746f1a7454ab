//! Execution-cluster interface and live-state observation.
//!
//! The engine consumes the cluster through this narrow seam: list and
//! watch live resources, apply and delete descriptors, shift canary
//! traffic weight, and read the cluster-wide quota snapshot. Apply and
//! delete are idempotent from the caller's perspective; re-applying
//! identical content is a no-op.

mod memory;

pub use memory::InMemoryCluster;

use async_trait::async_trait;
use drift_model::{
    Destination, LiveResource, ResourceDescriptor, ResourceId, ResourceQuotas,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from the execution cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster API could not be reached. Transient; subject to the
    /// reconciler's retry policy, and an `Error`-phase sync operation
    /// once retries are exhausted.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// The cluster rejected a descriptor. Terminal for that resource;
    /// unrelated resources in the same change-set proceed.
    #[error("apply rejected: {0}")]
    Rejected(String),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

/// Result of an apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Content was written.
    Applied,

    /// Live content already matched; nothing written.
    Unchanged,
}

/// Change notification from the cluster watch stream.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Updated(ResourceId),
    Deleted(ResourceId),
}

/// The execution cluster, as this engine sees it.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Snapshot the live state of managed resources at a destination.
    async fn list(&self, dest: &Destination) -> Result<Vec<LiveResource>, ClusterError>;

    /// Read one resource's live snapshot, if present.
    async fn get(
        &self,
        dest: &Destination,
        id: &ResourceId,
    ) -> Result<Option<LiveResource>, ClusterError>;

    /// Create or update a resource. Idempotent: identical content is a
    /// no-op reported as `Unchanged`.
    async fn apply(
        &self,
        dest: &Destination,
        descriptor: &ResourceDescriptor,
    ) -> Result<ApplyOutcome, ClusterError>;

    /// Delete a resource. Deleting an absent resource succeeds.
    async fn delete(&self, dest: &Destination, id: &ResourceId) -> Result<(), ClusterError>;

    /// Subscribe to live-state change notifications. The stream is
    /// infinite; a lagged or disconnected consumer resubscribes and
    /// re-lists.
    fn watch(&self, dest: &Destination) -> broadcast::Receiver<ClusterEvent>;

    /// Shift the canary traffic weight (0–100) for an application's
    /// workloads at a destination.
    async fn set_weight(
        &self,
        dest: &Destination,
        app: &str,
        weight: u8,
    ) -> Result<(), ClusterError>;

    /// Cluster-wide resource quota snapshot. Read-only to this engine.
    async fn quotas(&self) -> Result<ResourceQuotas, ClusterError>;
}
