//! Rollout API endpoints.
//!
//! Progressive-delivery state and the operator command surface. Every
//! command returns the resulting rollout state, or a problem naming
//! the violated precondition ("no active rollout", "rollout already
//! completed").

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use drift_model::RolloutState;

use crate::api::error::ApiError;
use crate::rollout::OperatorCommand;
use crate::state::AppState;

use super::apps::resolve;

/// Create rollout routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apps/{app}/rollout", get(get_rollout))
        .route("/apps/{app}/rollout/{command}", post(command_rollout))
}

/// Current rollout state.
///
/// GET /v1/apps/{app}/rollout
async fn get_rollout(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<RolloutState>, ApiError> {
    let id = resolve(&state, &app).await?;
    let report = state.registry().status(id).await.ok_or_else(|| {
        ApiError::not_found("app_not_found", format!("application not found: {app}"))
    })?;

    report
        .rollout
        .map(Json)
        .ok_or_else(|| ApiError::conflict("no_active_rollout", "no active rollout"))
}

/// Operator command: pause, resume, abort, or promote.
///
/// POST /v1/apps/{app}/rollout/{command}
async fn command_rollout(
    State(state): State<AppState>,
    Path((app, command)): Path<(String, String)>,
) -> Result<Json<RolloutState>, ApiError> {
    let id = resolve(&state, &app).await?;

    let command: OperatorCommand = command
        .parse()
        .map_err(|e: crate::rollout::UnknownCommand| {
            ApiError::bad_request("unknown_command", e.to_string())
        })?;

    let rollout = state.registry().rollout_command(id, command).await?;
    Ok(Json(rollout))
}
