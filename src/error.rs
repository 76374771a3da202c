use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Token missing, wrong, spent or expired. Which one is never disclosed.
    #[error("Invalid or expired token")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for JSON callers
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Forbidden => "invalid_token",
            AppError::NotFound(_) => "not_found",
            AppError::MethodNotAllowed => "method_not_allowed",
            AppError::Conflict(_) => "conflict",
            AppError::Store(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Invalid request",
            AppError::Forbidden => "Invalid or expired link",
            AppError::NotFound(_) => "Request not found",
            AppError::MethodNotAllowed => "Method not allowed",
            AppError::Conflict(_) => "Conflict",
            AppError::Store(_) | AppError::Internal(_) => "Something went wrong",
        }
    }

    /// Message safe to show to the caller. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                msg.clone()
            }
            AppError::Forbidden => "This link is no longer valid. It may have expired or \
                 already been used. Please process the request from the admin panel."
                .to_string(),
            AppError::MethodNotAllowed => {
                "This endpoint only accepts GET and POST requests.".to_string()
            }
            AppError::Store(_) | AppError::Internal(_) => {
                "We could not process the request. Please try again in a moment.".to_string()
            }
        }
    }

    pub(crate) fn log(&self) {
        match self {
            AppError::Store(e) => tracing::error!(error = %e, "Storage failure"),
            AppError::Internal(e) => tracing::error!(error = ?e, "Internal failure"),
            other => tracing::debug!(error = %other, "Request refused"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));

        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            AppError::Store(StoreError::Unavailable).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_not_public() {
        let error = AppError::Internal(anyhow::anyhow!("connection refused on 10.0.0.3"));
        assert!(!error.public_message().contains("10.0.0.3"));
    }
}
