//! HTTP error mapping
//!
//! Handlers return `ApiError`, which wraps the pipeline's `anyhow` errors
//! and picks the HTTP status by downcasting to [`TalkaiError`]. Every
//! error body has the same shape the widget expects: `{"error": "..."}`.

use crate::error::TalkaiError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error wrapper for HTTP handlers
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Build a 400-mapped invalid-request error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self(TalkaiError::InvalidRequest(message.into()).into())
    }

    fn status_code(&self) -> StatusCode {
        match self.0.downcast_ref::<TalkaiError>() {
            Some(TalkaiError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Some(TalkaiError::Authentication(_)) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl From<TalkaiError> for ApiError {
    fn from(err: TalkaiError) -> Self {
        Self(err.into())
    }
}

/// Convert Axum body-extraction rejections into the same error shape
impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        Self::invalid(err.to_string())
    }
}

/// Handy result alias used across handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
