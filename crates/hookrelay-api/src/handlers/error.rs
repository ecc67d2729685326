//! JSON error responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hookrelay_delivery::{DeliveryError, ErrorCategory};
use serde::Serialize;
use tracing::error;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code, e.g. `validation` or `not_found`
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    /// Rejected request input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "validation".to_string(), message: message.into() }
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        let category = ErrorCategory::from(&err);
        let status = match category {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Storage | ErrorCategory::Scheduling | ErrorCategory::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };

        if status.is_server_error() {
            error!(error = %err, category = %category, "request failed");
        }

        Self { status, code: category.to_string(), message: err.to_string() }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail { code: self.code, message: self.message },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use hookrelay_core::SubscriptionId;

    use super::*;

    #[test]
    fn delivery_errors_map_to_status() {
        let not_found = ApiError::from(DeliveryError::SubscriptionNotFound { id: SubscriptionId::new() });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid = ApiError::from(DeliveryError::invalid_url("nope", "invalid URL format"));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let storage = ApiError::from(DeliveryError::storage("pool closed"));
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_response_includes_code() {
        let response = ApiError::bad_request("unknown event type: deal.closed").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
