//! HTTP error mapping.
//!
//! Every failure leaves the API as `{"error": ..., "code": ...}` with a status
//! derived from the machine-readable code, so handler errors and failed
//! [`UploadResult`]s map the same way.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use dossier_core::{Error, UploadResult};

#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

/// HTTP status for a machine-readable error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
        "INVALID_TYPE" => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "EMPTY_FILE_NAME" | "EMPTY_CONTENT" | "INVALID_URL" | "INVALID_INPUT" | "BAD_REQUEST" => {
            StatusCode::BAD_REQUEST
        }
        "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
        "FORBIDDEN" => StatusCode::FORBIDDEN,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "NOT_RETRYABLE" | "INVALID_TRANSITION" => StatusCode::CONFLICT,
        "PROCESSING_ERROR" => StatusCode::UNPROCESSABLE_ENTITY,
        "TRANSPORT_ERROR" | "PROVIDER_EXHAUSTED" => StatusCode::BAD_GATEWAY,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        "BACKEND_MISCONFIGURED" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status for an upload outcome: 201 when processed inline, 202 when queued.
pub fn upload_status(result: &UploadResult) -> StatusCode {
    if result.success {
        return match result.status {
            Some(dossier_core::ProcessingStatus::Completed) => StatusCode::CREATED,
            _ => StatusCode::ACCEPTED,
        };
    }
    status_for_code(result.error_code.as_deref().unwrap_or("INTERNAL_ERROR"))
}

/// Serialize an [`UploadResult`] with its derived status.
pub fn upload_response(result: UploadResult) -> Response {
    (upload_status(&result), Json(result)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message, retryable) = match self {
            ApiError::Core(err) => (err.code(), err.to_string(), Some(err.is_retryable())),
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg, None),
            ApiError::Unauthorized(msg) => ("UNAUTHORIZED", msg, None),
            ApiError::NotFound(msg) => ("NOT_FOUND", msg, None),
        };
        let status = status_for_code(code);
        if status.is_server_error() {
            tracing::error!(code, error = %message, "Request failed");
        }

        let mut body = serde_json::json!({
            "error": message,
            "code": code,
        });
        if let Some(retryable) = retryable {
            body["retryable"] = serde_json::Value::Bool(retryable);
        }

        (status, Json(body)).into_response()
    }
}
