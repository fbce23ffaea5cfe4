use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Error taxonomy for the booking core. Storage-layer failures are translated
/// into these variants at the coordinator/controller boundary; raw store
/// errors never reach API callers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("stalls no longer available: {stall_ids:?}")]
    Conflict { stall_ids: Vec<i64> },

    #[error("{0}")]
    Validation(String),

    #[error("exhibition is not open for booking")]
    ExhibitionUnavailable,

    #[error("{0}")]
    Auth(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("settlement queue is at capacity")]
    QueueFull,

    #[error("operation timed out")]
    Timeout,

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("resource not found")]
    NotFound,

    #[error("storage error: {0}")]
    Store(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Conflict { .. } => StatusCode::CONFLICT,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::ExhibitionUnavailable => StatusCode::FORBIDDEN,
            CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
            CoreError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            CoreError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            CoreError::Conflict { stall_ids } => json!({
                "success": false,
                "message": "one or more stalls were just taken, please refresh and re-select",
                "conflicting_stalls": stall_ids,
            }),
            CoreError::Store(msg) => {
                tracing::error!("storage error surfaced to controller: {}", msg);
                json!({ "success": false, "message": "internal error" })
            }
            other => json!({ "success": false, "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::NotFound,
            // Version conflicts are handled explicitly where they are expected;
            // one escaping to this point is a logic error worth surfacing.
            StoreError::Conflict { current_version } => {
                CoreError::Store(format!("unhandled version conflict (current {current_version})"))
            }
            other => CoreError::Store(other.to_string()),
        }
    }
}

/// Coarse classification used by the submission guard to pick a retry story
/// and a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Conflict,
    Validation,
    Auth,
    Transient,
}

impl ErrorClass {
    /// Fixed message mapping; internal error codes are never shown to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorClass::Conflict => "This item was just taken. Please refresh and re-select.",
            ErrorClass::Validation => "Please correct the highlighted fields and try again.",
            ErrorClass::Auth => "Your session has expired. Please sign in again.",
            ErrorClass::Transient => "Something went wrong. Please try again in a moment.",
        }
    }
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for CoreError {
    fn class(&self) -> ErrorClass {
        match self {
            CoreError::Conflict { .. } | CoreError::ExhibitionUnavailable => ErrorClass::Conflict,
            CoreError::Validation(_) | CoreError::NotFound | CoreError::UnknownTransaction(_) => {
                ErrorClass::Validation
            }
            CoreError::Auth(_) => ErrorClass::Auth,
            CoreError::QueueFull
            | CoreError::Timeout
            | CoreError::Gateway(_)
            | CoreError::Store(_) => ErrorClass::Transient,
        }
    }
}
