//! v1 API routes.

mod apps;
mod rollouts;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Assemble the v1 router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(apps::routes())
        .merge(rollouts::routes())
        .route("/quotas", get(quotas))
}

use axum::extract::State;
use axum::Json;

use super::error::ApiError;

/// Shared read-only view of cluster-wide resource quotas.
///
/// GET /v1/quotas
async fn quotas(State(state): State<AppState>) -> Result<Json<drift_model::ResourceQuotas>, ApiError> {
    state
        .cluster()
        .quotas()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("cluster_unavailable", e.to_string()).retryable())
}
