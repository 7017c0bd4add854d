//! API error types and HTTP response mapping.
//!
//! Every error surfaces as `{"error": "<message>"}` with an appropriate
//! status. Webhook handlers mostly do NOT use this type: their contract is
//! to answer 200 on anything the provider should not retry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input (no retry).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Returns an error response for authentication failures (no retry).
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Returns an error response for conflicting state.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Returns an error response for upstream provider failures.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// Returns an internal error response (queue retries on the worker).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<dealflow_store::Error> for ApiError {
    fn from(value: dealflow_store::Error) -> Self {
        match &value {
            dealflow_store::Error::NotFound { .. } => Self::not_found(value.to_string()),
            dealflow_store::Error::Conflict { .. } => Self::conflict(value.to_string()),
            _ => Self::internal(value.to_string()),
        }
    }
}

impl From<dealflow_providers::Error> for ApiError {
    fn from(value: dealflow_providers::Error) -> Self {
        Self::bad_gateway(value.to_string())
    }
}

impl From<dealflow_flow::Error> for ApiError {
    fn from(value: dealflow_flow::Error) -> Self {
        match &value {
            dealflow_flow::Error::InvalidJob { .. } => Self::bad_request(value.to_string()),
            dealflow_flow::Error::Store(store) => match store {
                dealflow_store::Error::NotFound { .. } => Self::not_found(value.to_string()),
                dealflow_store::Error::Conflict { .. } => Self::conflict(value.to_string()),
                _ => Self::internal(value.to_string()),
            },
            dealflow_flow::Error::Provider(_) => Self::bad_gateway(value.to_string()),
            _ => Self::internal(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = dealflow_store::Error::not_found("push_channel", "ch-1").into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_conflict_maps_to_409() {
        let err: ApiError = dealflow_store::Error::conflict("active channel exists").into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_job_maps_to_400() {
        let err: ApiError = dealflow_flow::Error::invalid_job("unknown jobType").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn provider_error_maps_to_502() {
        let err: ApiError = dealflow_providers::Error::api(503, "down").into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn error_body_shape() {
        let response = ApiError::bad_request("missing channelId").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
