//! Sync operation records and sync status.

use chrono::{DateTime, Utc};
use drift_id::{AppId, SyncId};
use serde::{Deserialize, Serialize};

use crate::{ResourceId, Revision};

/// Lifecycle phase of a sync operation.
///
/// `Error` is an infrastructure-level failure (the cluster could not be
/// reached at all); `Failed` means the cluster rejected some resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncPhase::Succeeded | SyncPhase::Failed | SyncPhase::Error
        )
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Pending => "pending",
            SyncPhase::Running => "running",
            SyncPhase::Succeeded => "succeeded",
            SyncPhase::Failed => "failed",
            SyncPhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Whether live state matches the tracked revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusCode {
    Synced,
    OutOfSync,
    Unknown,
}

impl std::fmt::Display for SyncStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatusCode::Synced => write!(f, "synced"),
            SyncStatusCode::OutOfSync => write!(f, "out_of_sync"),
            SyncStatusCode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Comparison result between desired and live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub code: SyncStatusCode,

    /// Revision the comparison was made against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,

    pub observed_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn unknown() -> Self {
        Self {
            code: SyncStatusCode::Unknown,
            revision: None,
            observed_at: Utc::now(),
        }
    }
}

/// Terminal outcome for one resource within a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// Created or updated in the cluster.
    Applied,
    /// Already matched the desired content.
    Unchanged,
    /// Deleted because it left the desired tree.
    Pruned,
    /// Rejected by the cluster; terminal for this resource.
    Rejected,
}

/// Per-resource record within a sync operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub id: ResourceId,

    pub outcome: ResourceOutcome,

    /// Attempts consumed, including the successful one.
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One reconciliation attempt. Immutable once finalized; retained in a
/// bounded per-application history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: SyncId,

    pub app_id: AppId,

    /// The revision this operation converged toward.
    pub revision: Revision,

    pub phase: SyncPhase,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Per-resource results, in apply order.
    pub results: Vec<ResourceResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncOperation {
    /// Create a new operation in the `Pending` phase.
    pub fn new(app_id: AppId, revision: Revision) -> Self {
        Self {
            id: SyncId::new(),
            app_id,
            revision,
            phase: SyncPhase::Pending,
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            message: None,
        }
    }

    /// Transition to `Running`.
    pub fn start(&mut self) {
        debug_assert_eq!(self.phase, SyncPhase::Pending);
        self.phase = SyncPhase::Running;
        self.started_at = Utc::now();
    }

    /// Finalize with a terminal phase. Further mutation is a logic error.
    pub fn finalize(&mut self, phase: SyncPhase, message: Option<String>) {
        debug_assert!(phase.is_terminal());
        debug_assert!(self.finished_at.is_none(), "operation already finalized");
        self.phase = phase;
        self.message = message;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminality() {
        assert!(!SyncPhase::Pending.is_terminal());
        assert!(!SyncPhase::Running.is_terminal());
        assert!(SyncPhase::Succeeded.is_terminal());
        assert!(SyncPhase::Failed.is_terminal());
        assert!(SyncPhase::Error.is_terminal());
    }

    #[test]
    fn test_operation_lifecycle() {
        let mut op = SyncOperation::new(AppId::new(), Revision::new("sha256:aa"));
        assert_eq!(op.phase, SyncPhase::Pending);
        assert!(!op.is_finalized());

        op.start();
        assert_eq!(op.phase, SyncPhase::Running);

        op.finalize(SyncPhase::Succeeded, None);
        assert!(op.is_finalized());
        assert_eq!(op.phase, SyncPhase::Succeeded);
    }
}
