/// API error type
///
/// Maps library errors onto HTTP status codes with a JSON `{error}` body.

use crate::error::{EngineError, StoreError, ValidationError, WebhookError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error returned by every API handler
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Invalid(ValidationError),
    BadRequest(String),
    Engine(EngineError),
    Store(StoreError),
    Internal(anyhow::Error),
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Invalid(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::WorkflowNotFound(id) => {
                ApiError::NotFound(format!("workflow not found: {}", id))
            }
            EngineError::Store(e) | EngineError::Persist { source: e, .. } => ApiError::Store(e),
            other => ApiError::Engine(other),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            WebhookError::Engine(e) => e.into(),
            WebhookError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, json!({ "error": message })),
            ApiError::Invalid(e) => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Engine(e) => {
                let message = match e {
                    EngineError::NodeFailed { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "error": message, "executionId": e.execution_id() }),
                )
            }
            ApiError::Store(e) => {
                tracing::error!("❌ Store failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
            }
            ApiError::Internal(e) => {
                tracing::error!("❌ Internal failure: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
            }
        };

        (status, Json(body)).into_response()
    }
}
