use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Coordinator-facing error kinds. Background tasks (the expiry loop) never
/// construct these -- they log instead.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    BadRequest(String),

    #[error("bad bundle: {0}")]
    BadBundle(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("no agents available")]
    NoAgentsAvailable,

    #[error("unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl CoordinatorError {
    fn status(&self) -> StatusCode {
        match self {
            CoordinatorError::BadRequest(_) | CoordinatorError::BadBundle(_) => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::UnknownDeployment(_) => StatusCode::NOT_FOUND,
            CoordinatorError::NoAgentsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::BuildFailed(_)
            | CoordinatorError::PushFailed(_)
            | CoordinatorError::DispatchFailed(_)
            | CoordinatorError::RuntimeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "status": "error", "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Worker-facing error kinds. Unlike the coordinator, an unknown deployment
/// id is a client-side mistake from the worker's point of view (it only
/// knows the tasks it was handed), so it maps to 400, not 404 -- the
/// mismatch with `CoordinatorError::UnknownDeployment` is intentional (the
/// coordinator tracks placements it never hands back as "bad request").
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("agent busy")]
    AgentBusy,

    #[error("unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl WorkerError {
    fn status(&self) -> StatusCode {
        match self {
            WorkerError::BadRequest(_) | WorkerError::AgentBusy | WorkerError::UnknownDeployment(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkerError::RuntimeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "status": "error", "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
