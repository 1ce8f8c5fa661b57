//! HTTP error responses for the public API.
//!
//! Only infrastructure failures become a 5xx; everything a submission does
//! is a 200 with a result body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use capsule_common::CapsuleError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}

pub type ApiResult<T> = Result<T, AppError>;

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

impl From<CapsuleError> for AppError {
    fn from(e: CapsuleError) -> Self {
        match e {
            CapsuleError::UnsupportedLanguage(_) | CapsuleError::InvalidRequest(_) => {
                AppError::BadRequest(e.to_string())
            }
            CapsuleError::JobNotFound(_) => AppError::NotFound(e.to_string()),
            other => {
                tracing::error!(error = %other, "Request failed on infrastructure");
                AppError::Unavailable(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}
