//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrator::OrchestratorError;
use persistence::PersistenceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Transaction execution error.
    Orchestrator(OrchestratorError),
    /// Store read error.
    Persistence(PersistenceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orchestrator(err) => orchestrator_error_to_response(err),
            ApiError::Persistence(err) => persistence_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn orchestrator_error_to_response(err: OrchestratorError) -> (StatusCode, String) {
    match err {
        OrchestratorError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        OrchestratorError::Persistence(inner) => persistence_error_to_response(inner),
        OrchestratorError::NotConfigured | OrchestratorError::Channel(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn persistence_error_to_response(err: PersistenceError) -> (StatusCode, String) {
    match &err {
        PersistenceError::TransactionNotFound(_) | PersistenceError::OperationNotFound { .. } => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        PersistenceError::DuplicateTransaction(_) | PersistenceError::DuplicateOperation(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        ApiError::Persistence(err)
    }
}
