//! Desired-state source client.
//!
//! The source of truth is a version-controlled tree of resource
//! descriptors. The engine only ever reads it: `fetch` returns an
//! immutable revision snapshot, and the snapshot is never mutated in
//! place.

mod fs;

pub use fs::FsSourceStore;

use async_trait::async_trait;
use drift_model::{DesiredTree, Revision, SourceRef};
use thiserror::Error;

/// Errors from the desired-state source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be read at all. Transient; retried with
    /// backoff and surfaced after repeated failure.
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),

    /// The tracked revision pointer does not resolve.
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// A manifest in the tree could not be parsed.
    #[error("invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },
}

impl SourceError {
    /// Whether retrying later can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::SourceUnreachable(_))
    }
}

/// Read access to versioned desired-state documents.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch the current desired-state tree for an application source
    /// reference, together with the revision that identifies it.
    async fn fetch(&self, source: &SourceRef) -> Result<(Revision, DesiredTree), SourceError>;
}
