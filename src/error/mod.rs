use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Result type for shortener operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Shortener error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::MissingCredentials => StatusCode::UNAUTHORIZED,
            AppError::Store(_)
            | AppError::Blob(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable category for response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::RateLimited { .. } => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::Validation { .. } => "validation",
            AppError::Conflict { .. } => "conflict",
            AppError::Unauthorized(_) | AppError::InvalidToken(_) | AppError::MissingCredentials => {
                "unauthorized"
            }
            AppError::Store(_)
            | AppError::Blob(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to a caller. Infrastructure details stay in the logs.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Something went wrong, please try again".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field } => AppError::Conflict {
                message: format!("{} is already taken", field),
                field,
            },
            other => AppError::Store(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }

        let mut body = json!({
            "error": self.public_message(),
            "kind": self.kind(),
            "status": status.as_u16(),
        });

        let mut headers = HeaderMap::new();
        match &self {
            AppError::Validation { field, .. } | AppError::Conflict { field, .. } => {
                body["field"] = json!(field);
            }
            AppError::RateLimited {
                limit,
                reset_at,
                retry_after_secs,
            } => {
                body["limit"] = json!(limit);
                body["remaining"] = json!(0);
                body["reset_at"] = json!(reset_at.to_rfc3339());
                body["retry_after"] = json!(retry_after_secs);

                headers = crate::rate_limit::rate_limit_headers(*limit, 0, *reset_at);
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    headers.insert("Retry-After", value);
                }
            }
            _ => {}
        }

        (status, headers, Json(body)).into_response()
    }
}
