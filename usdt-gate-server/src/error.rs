//! Error types for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use usdt_gate::{DepositError, PaymentStatus, ValidationError};
use uuid::Uuid;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The request failed input validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// No payment intent with that id exists.
    #[error("payment intent not found: {0}")]
    IntentNotFound(Uuid),

    /// No ledger user with that id exists.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The intent's current status does not allow the operation.
    #[error("payment intent {id} is {status}")]
    Conflict {
        /// The intent id.
        id: Uuid,
        /// Its current status.
        status: PaymentStatus,
    },

    /// A tracker cycle is already running.
    #[error("payment check already in progress")]
    Busy,

    /// A downstream dependency failed.
    #[error("{0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl From<DepositError> for ServerError {
    fn from(err: DepositError) -> Self {
        match err {
            DepositError::Validation(e) => Self::Validation(e),
            DepositError::NotFound(id) => Self::IntentNotFound(id),
            DepositError::InvalidState { id, status } => Self::Conflict { id, status },
            DepositError::Upstream(_) | DepositError::Settlement(_) => {
                Self::Internal(Box::new(err))
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::IntentNotFound(_) | Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::Busy => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
