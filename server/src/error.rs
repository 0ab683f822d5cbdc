//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tandem_engine::Version;

use crate::pubsub::PubSubError;
use crate::storage::StorageError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] tandem_engine::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error("version {requested} is ahead of the document (current {current})")]
    VersionFromFuture {
        requested: Version,
        current: Version,
    },

    #[error("submission retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Stable machine-readable code, used on the wire protocol.
    pub fn code(&self) -> &'static str {
        use tandem_engine::Error as E;
        match self {
            AppError::Engine(e) => match e {
                E::MalformedOperation(_) => "malformed_operation",
                E::DocAlreadyExists => "doc_already_exists",
                E::DocDoesNotExist => "doc_does_not_exist",
                E::DocWasDeleted => "doc_was_deleted",
                E::InvalidDelta(_) => "invalid_delta",
                E::TypeNotFound(_) | E::InvalidTypeName => "unknown_type",
                E::StreamGap { .. } => "stream_gap",
                _ => "engine_error",
            },
            AppError::Storage(_) => "storage_error",
            AppError::PubSub(_) => "pubsub_error",
            AppError::VersionFromFuture { .. } => "version_from_future",
            AppError::RetryExhausted { .. } => "retry_exhausted",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Engine(e) => {
                use tandem_engine::Error as E;
                match e {
                    E::DocAlreadyExists | E::DocDoesNotExist | E::DocWasDeleted => {
                        StatusCode::CONFLICT
                    }
                    E::StreamGap { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_REQUEST,
                }
            }
            AppError::Storage(e) => {
                tracing::error!("storage error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::PubSub(e) => {
                tracing::error!("pubsub error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::VersionFromFuture { .. } => StatusCode::BAD_REQUEST,
            AppError::RetryExhausted { .. } => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        });
        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = AppError::Engine(tandem_engine::Error::DocAlreadyExists);
        assert_eq!(err.code(), "doc_already_exists");

        let err = AppError::RetryExhausted { attempts: 11 };
        assert_eq!(err.code(), "retry_exhausted");
        assert_eq!(
            err.to_string(),
            "submission retries exhausted after 11 attempts"
        );

        let err = AppError::VersionFromFuture {
            requested: 9,
            current: 4,
        };
        assert_eq!(err.code(), "version_from_future");
    }
}
