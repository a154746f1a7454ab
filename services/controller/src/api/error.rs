use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use drift_id::RequestId;
use serde::Serialize;

use crate::registry::{ControlError, RegistryError};
use crate::rollout::CommandRejected;

/// RFC 7807 problem document. Every API failure names the violated
/// precondition in `code` and `detail`.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://driftd.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            request_id: RequestId::new().to_string(),
            retryable: false,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_REQUEST;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::NOT_FOUND;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::CONFLICT;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn retryable(mut self) -> Self {
        self.problem.retryable = true;
        self
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match &err {
            ControlError::NotFound(_) => ApiError::not_found("app_not_found", err.to_string()),
            ControlError::SyncDenied(_) => ApiError::conflict("sync_denied", err.to_string()),
            ControlError::Rollout(CommandRejected::NoActiveRollout) => {
                ApiError::conflict("no_active_rollout", err.to_string())
            }
            ControlError::Rollout(CommandRejected::Finished(_)) => {
                ApiError::conflict("rollout_finished", err.to_string())
            }
            ControlError::WorkerGone => {
                ApiError::internal("worker_unavailable", err.to_string()).retryable()
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match &err {
            RegistryError::NameTaken { .. } => ApiError::conflict("name_taken", err.to_string()),
            RegistryError::DestinationClaimed { .. } => {
                ApiError::conflict("destination_claimed", err.to_string())
            }
            RegistryError::InvalidRollout(_) => {
                ApiError::bad_request("invalid_rollout_spec", err.to_string())
            }
            RegistryError::NotFound(_) => ApiError::not_found("app_not_found", err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
