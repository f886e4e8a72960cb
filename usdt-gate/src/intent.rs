//! Payment intents and their status state machine.
//!
//! ```text
//! pending    -> processing | confirmed | expired | cancelled
//! processing -> processing | confirmed | expired | cancelled
//! confirmed  -> completed | failed
//! ```
//!
//! `completed`, `failed`, `expired` and `cancelled` are terminal.

use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;

/// Lifecycle state of a [`PaymentIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Waiting for a matching transfer.
    Pending,
    /// A matching transfer was seen but is not yet final.
    Processing,
    /// A final transfer was matched; awaiting credit.
    Confirmed,
    /// The user was credited.
    Completed,
    /// Crediting the user failed.
    Failed,
    /// No matching transfer arrived before the TTL ran out.
    Expired,
    /// Withdrawn before a transfer was matched.
    Cancelled,
}

impl PaymentStatus {
    /// Returns `true` for states that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    /// Returns `true` for states still waiting on the chain.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Returns `true` if `self -> next` is an allowed transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending | Self::Processing,
                Self::Processing | Self::Confirmed | Self::Expired | Self::Cancelled
            ) | (Self::Confirmed, Self::Completed | Self::Failed)
        )
    }

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's declared intention to deposit a specific amount on a network.
///
/// Intents are never deleted; terminal ones stay behind as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Unique id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Network the deposit is expected on.
    pub network: Network,
    /// Amount the user promised to send, in USDT.
    pub expected_amount: Decimal,
    /// Shared wallet for the network, copied at creation.
    pub destination_address: String,
    /// Current lifecycle state.
    pub status: PaymentStatus,
    /// Confirmation depth required, copied at creation.
    pub required_confirmations: u64,
    /// Hash of the matched transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_transaction_hash: Option<String>,
    /// Confirmations of the matched transfer at last observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_confirmations: Option<u64>,
    /// Block of the matched transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_block_number: Option<u64>,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Time of the last status change.
    pub updated_at: UnixTimestamp,
    /// `created_at` plus the intent TTL.
    pub expires_at: UnixTimestamp,
    /// Time a terminal state was reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<UnixTimestamp>,
    /// Free-form annotations, merged on every transition.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PaymentIntent {
    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_past_expiry(&self, now: UnixTimestamp) -> bool {
        now >= self.expires_at
    }
}

/// Observed chain data and metadata to apply alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentUpdate {
    /// Matched transfer hash.
    pub transaction_hash: Option<String>,
    /// Confirmations observed.
    pub confirmations: Option<u64>,
    /// Block of the matched transfer.
    pub block_number: Option<u64>,
    /// Metadata entries to merge, last writer wins per key.
    pub metadata: Map<String, Value>,
}

impl IntentUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the matched transfer.
    #[must_use]
    pub fn with_transfer(
        mut self,
        hash: impl Into<String>,
        confirmations: u64,
        block_number: u64,
    ) -> Self {
        self.transaction_hash = Some(hash.into());
        self.confirmations = Some(confirmations);
        self.block_number = Some(block_number);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// No intent with that id exists.
    NotFound,
    /// The state machine or the expiry guard refused the transition.
    Refused {
        /// Status at the time of the request.
        from: PaymentStatus,
        /// Requested status.
        to: PaymentStatus,
    },
    /// The transfer hash is already attached to another intent.
    HashClaimed {
        /// The intent holding the hash.
        by: Uuid,
    },
}

impl TransitionOutcome {
    /// Returns `true` if the transition was applied.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use PaymentStatus::{
        Cancelled, Completed, Confirmed, Expired, Failed, Pending, Processing,
    };

    const ALL: [PaymentStatus; 7] = [
        Pending, Processing, Confirmed, Completed, Failed, Expired, Cancelled,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Failed));
    }

    #[test]
    fn test_disallowed_transitions() {
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Failed));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Processing).unwrap(), "\"processing\"");
    }
}
