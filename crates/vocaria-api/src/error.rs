//! API error types and JSON error response formatting.
//!
//! Every non-2xx response carries the `{error, message}` body from the
//! shared wire contract, so the client can surface the server's reason.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use vocaria_core::contract::ErrorBody;

use crate::store::StoreError;

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - malformed input.
    BadRequest(String),
    /// 404 Not Found - unknown conversation.
    NotFound(String),
    /// 409 Conflict - the conversation has already ended.
    Conflict(String),
    /// 422 Unprocessable Entity - well-formed but semantically invalid.
    UnprocessableEntity(String),
    /// 500 Internal Server Error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal API error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(message),
            StoreError::Ended(_) => ApiError::Conflict(message),
            StoreError::Invalid(_) => ApiError::UnprocessableEntity(message),
        }
    }
}

impl From<vocaria_core::VocariaError> for ApiError {
    fn from(err: vocaria_core::VocariaError) -> Self {
        match &err {
            vocaria_core::VocariaError::Config(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
