//! Application state shared across request handlers.

use std::sync::Arc;

use crate::cluster::ClusterApi;
use crate::registry::Registry;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Registry,
    cluster: Arc<dyn ClusterApi>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(registry: Registry, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { registry, cluster }),
        }
    }

    /// Get a reference to the application registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Get the cluster interface (quota reads).
    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.inner.cluster
    }
}
