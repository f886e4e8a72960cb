//! Error types for the deposit pipeline.
//!
//! Each component fails with its own error type; [`DepositError`] unifies
//! them for callers that drive several components at once.
//!
//! A transfer that matches no intent, or an intent that runs past its TTL,
//! is a normal outcome of reconciliation and is not modeled here.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::amount::AmountError;
use crate::intent::PaymentStatus;
use crate::network::{Network, UnknownNetworkError};

/// Invalid input to intent creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No user id was supplied.
    #[error("user id must not be empty")]
    EmptyUserId,

    /// The amount is zero or negative.
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// The amount is below the configured minimum.
    #[error("amount {amount} is below the minimum of {min}")]
    AmountTooSmall {
        /// Requested amount.
        amount: Decimal,
        /// Configured minimum.
        min: Decimal,
    },

    /// The amount is above the configured maximum.
    #[error("amount {amount} exceeds the maximum of {max}")]
    AmountTooLarge {
        /// Requested amount.
        amount: Decimal,
        /// Configured maximum.
        max: Decimal,
    },

    /// The network string did not name a known network.
    #[error("{0}")]
    UnknownNetwork(#[from] UnknownNetworkError),

    /// The network is known but not enabled in this deployment.
    #[error("network {0} is not enabled")]
    UnsupportedNetwork(Network),
}

/// Failure talking to a blockchain explorer.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("transport error: {context}: {source}")]
    Transport {
        /// Which request failed.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The explorer answered with a non-success HTTP status.
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    Status {
        /// Which request failed.
        context: &'static str,
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The explorer answered 200 but reported an error in its payload.
    #[error("explorer error: {context}: {message}")]
    Explorer {
        /// Which request failed.
        context: &'static str,
        /// The message reported by the explorer.
        message: String,
    },

    /// The response could not be decoded.
    #[error("failed to decode response: {context}: {message}")]
    Decode {
        /// Which request failed.
        context: &'static str,
        /// What went wrong.
        message: String,
    },

    /// A raw token value could not be converted.
    #[error("{0}")]
    Amount(#[from] AmountError),
}

/// The settlement sink refused to credit a user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// The user does not exist in the ledger.
    #[error("user not found: {0}")]
    UnknownUser(String),

    /// The sink rejected the credit for another reason.
    #[error("credit rejected: {0}")]
    Rejected(String),
}

/// Umbrella error for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum DepositError {
    /// Invalid intent creation input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Explorer failure.
    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    /// Settlement sink failure.
    #[error("{0}")]
    Settlement(#[from] SettlementError),

    /// No intent with the given id exists.
    #[error("payment intent not found: {0}")]
    NotFound(Uuid),

    /// The intent is not in a state that allows the requested operation.
    #[error("payment intent {id} is {status}")]
    InvalidState {
        /// The intent id.
        id: Uuid,
        /// Its current status.
        status: PaymentStatus,
    },
}
