use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Whether repeating the same request later may succeed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidStatus(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Upstream failures leave no local state behind, so the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalServiceError(_))
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => {
                "Payment processor unavailable, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            retryable: self.is_retryable(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
