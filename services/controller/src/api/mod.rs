//! Operator-facing HTTP API.

pub mod error;
pub mod health;
pub mod v1;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
