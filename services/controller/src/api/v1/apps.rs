//! Application API endpoints.
//!
//! Registration, status reporting, sync triggering, and deregistration.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use drift_id::AppId;
use drift_model::{HealthStatus, SyncOperation, SyncStatusCode};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::registry::NewApplication;
use crate::scheduler::{AppStatusReport, SyncReason};
use crate::state::AppState;

/// Create application routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apps", post(register_app).get(list_apps))
        .route("/apps/{app}", get(get_app).delete(deregister_app))
        .route("/apps/{app}/sync", post(trigger_sync))
        .route("/apps/{app}/operations", get(list_operations))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// One row in the application listing.
#[derive(Debug, Serialize)]
pub struct AppSummary {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub sync_status: SyncStatusCode,
    pub health: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl From<&AppStatusReport> for AppSummary {
    fn from(report: &AppStatusReport) -> Self {
        Self {
            id: report.app.id.to_string(),
            name: report.app.name.clone(),
            namespace: report.app.namespace.clone(),
            sync_status: report.sync_status.code,
            health: report.health.status,
            revision: report.sync_status.revision.as_ref().map(|r| r.to_string()),
        }
    }
}

/// Response for listing applications.
#[derive(Debug, Serialize)]
pub struct ListAppsResponse {
    pub items: Vec<AppSummary>,
}

/// Response for the operation history.
#[derive(Debug, Serialize)]
pub struct ListOperationsResponse {
    pub items: Vec<SyncOperation>,
}

/// Query parameters for deregistration.
#[derive(Debug, Deserialize)]
pub struct DeregisterQuery {
    /// Also delete every managed resource.
    #[serde(default)]
    pub cascade: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a new application.
///
/// POST /v1/apps
async fn register_app(
    State(state): State<AppState>,
    Json(req): Json<NewApplication>,
) -> Result<Response, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_name",
            "application name must not be empty",
        ));
    }

    let app = state.registry().register(req).await?;
    Ok((StatusCode::CREATED, Json(app)).into_response())
}

/// List applications with their current status.
///
/// GET /v1/apps
async fn list_apps(State(state): State<AppState>) -> Json<ListAppsResponse> {
    let items = state
        .registry()
        .list()
        .await
        .iter()
        .map(AppSummary::from)
        .collect();
    Json(ListAppsResponse { items })
}

/// Full status for one application: sync status, health, last
/// operation, and current rollout state.
///
/// GET /v1/apps/{app}
async fn get_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<AppStatusReport>, ApiError> {
    let id = resolve(&state, &app).await?;
    state
        .registry()
        .status(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("app_not_found", format!("application not found: {app}")))
}

/// Deregister an application.
///
/// DELETE /v1/apps/{app}?cascade=true
async fn deregister_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(query): Query<DeregisterQuery>,
) -> Result<StatusCode, ApiError> {
    let id = resolve(&state, &app).await?;
    state.registry().deregister(id, query.cascade).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Trigger a sync.
///
/// POST /v1/apps/{app}/sync
async fn trigger_sync(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Response, ApiError> {
    let id = resolve(&state, &app).await?;
    let triggered = state
        .registry()
        .trigger_sync(id, SyncReason::Manual)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(triggered)).into_response())
}

/// Operation history (oldest first).
///
/// GET /v1/apps/{app}/operations
async fn list_operations(
    State(state): State<AppState>,
    Path(app): Path<String>,
) -> Result<Json<ListOperationsResponse>, ApiError> {
    let id = resolve(&state, &app).await?;
    let report = state.registry().status(id).await.ok_or_else(|| {
        ApiError::not_found("app_not_found", format!("application not found: {app}"))
    })?;
    Ok(Json(ListOperationsResponse {
        items: report.operations,
    }))
}

/// Resolve an app path segment: typed ID or unique name.
pub(super) async fn resolve(state: &AppState, reference: &str) -> Result<AppId, ApiError> {
    state
        .registry()
        .resolve(reference)
        .await
        .ok_or_else(|| ApiError::not_found("app_not_found", format!("application not found: {reference}")))
}
