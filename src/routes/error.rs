use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::error_code::ErrorCode;

/// JSON error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<ErrorCode>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    can_retry: Option<bool>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Error carrying a taxonomy code; the message is the code's user message.
    pub fn coded(status: StatusCode, code: ErrorCode) -> Self {
        Self {
            status,
            message: code.user_message().to_string(),
            code: Some(code),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Job not found")
    }

    pub fn internal(code: ErrorCode) -> Self {
        Self::coded(StatusCode::INTERNAL_SERVER_ERROR, code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            error_code: self.code,
            can_retry: self.code.map(ErrorCode::can_retry),
        };
        (self.status, Json(body)).into_response()
    }
}
