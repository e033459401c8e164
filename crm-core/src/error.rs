use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Errors surfaced by services and handlers.
///
/// Client-facing variants carry a message that is safe to return as-is.
/// `Database` and `Internal` are logged in full and rendered as an opaque
/// internal error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The singleton reference date row does not exist.
    #[error("Reference date configuration not found")]
    ConfigurationMissing,

    /// A referenced classification value does not exist, or a value that is
    /// still referenced was about to be removed.
    #[error("{0}")]
    ReferenceNotFound(String),

    /// A unique key is already taken.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    /// The reference date row could not be updated within the time budget.
    #[error("{0}")]
    Timeout(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ConfigurationMissing => StatusCode::NOT_FOUND,
            AppError::ReferenceNotFound(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConfigurationMissing => "configuration_missing",
            AppError::ReferenceNotFound(_) => "referential_violation",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Timeout(_) => "timeout",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Maps a unique-constraint violation to `Conflict`, keeping every other
    /// database error as is. Used after pre-checks that can lose a race.
    pub fn from_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            AppError::Conflict(message.into())
        } else {
            AppError::Database(err)
        }
    }
}

/// SQLSTATE 23505.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                "Internal server error".to_string()
            }
            AppError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code(),
        });
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
