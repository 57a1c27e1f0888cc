use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every failure mode the gateway can surface to a transport, per the error
/// kinds enumerated for this system: auth/scope rejection, stream resolution,
/// upstream/database unavailability, and ordinary client disconnects.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Insufficient scope")]
    InsufficientScope,

    #[error("Not authorized to stream this list")]
    ListNotAuthorized,

    #[error("Unknown stream type")]
    UnknownStream,

    #[error("{0}")]
    MissingRequiredParam(String),

    #[error("Upstream pub/sub unavailable")]
    UpstreamUnavailable,

    #[error("Database error: {0}")]
    DbUnavailable(sqlx::Error),

    #[error("Client gone")]
    ClientGone,

    #[error("An unexpected error occurred")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::DbUnavailable(e)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        tracing::error!(error = ?e, "upstream pub/sub error");
        AppError::UpstreamUnavailable
    }
}

impl AppError {
    /// HTTP status this error maps to when it reaches a REST/SSE handler.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingToken | AppError::InvalidToken | AppError::InsufficientScope => {
                StatusCode::UNAUTHORIZED
            }
            AppError::ListNotAuthorized
            | AppError::UnknownStream
            | AppError::MissingRequiredParam(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamUnavailable | AppError::DbUnavailable(_) | AppError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ClientGone => StatusCode::BAD_REQUEST,
        }
    }

    /// Message exposed to the client. Database and internal failures never
    /// leak their detail; "not found" and "not authorized" are deliberately
    /// worded identically to each other so list existence cannot be probed.
    fn public_message(&self) -> String {
        match self {
            AppError::ListNotAuthorized | AppError::UnknownStream | AppError::MissingRequiredParam(_) => {
                "Not found".into()
            }
            AppError::DbUnavailable(e) => {
                tracing::error!(error = ?e, "database error");
                "An unexpected error occurred".into()
            }
            AppError::Internal => "An unexpected error occurred".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
