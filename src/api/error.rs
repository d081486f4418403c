//! Error-to-response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::{ErrorKind, ServiceError};

const GENERIC_CUSTOMER_ERROR: &str = "Failed to create order";

/// A service failure plus who it is shown to. Customer-facing responses
/// never carry internal messages for server-side failures.
#[derive(Debug)]
pub struct ApiError {
    error: ServiceError,
    customer_facing: bool,
}

impl ApiError {
    pub fn customer(error: ServiceError) -> Self { Self { error, customer_facing: true } }

    pub fn status(&self) -> StatusCode {
        match self.error.kind() {
            ErrorKind::Validation | ErrorKind::BusinessRule => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Dependency => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Auth => match self.error {
                ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            },
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self { Self { error, customer_facing: false } }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.error, "Request failed");
        }
        let body = match (&self.error, self.customer_facing) {
            (_, true) if status.is_server_error() => json!({"success": false, "error": GENERIC_CUSTOMER_ERROR}),
            (ServiceError::Validation { message, details }, _) => json!({"success": false, "error": message, "details": details}),
            (e, true) => json!({"success": false, "error": e.to_string()}),
            (e, false) if status.is_server_error() => json!({"success": false, "error": "Internal server error", "details": e.to_string()}),
            (e, false) => json!({"success": false, "error": e.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}
