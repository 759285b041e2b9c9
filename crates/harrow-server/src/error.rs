use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use harrow_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(AppError::ConfigError(message.into()))
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidTransition(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::ConfigError(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::Unreachable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::SnapshotError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "snapshot_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse::new(error_type, self.0.to_string());
        (status, axum::Json(body)).into_response()
    }
}
