//! Blockchain observation through explorer APIs.
//!
//! A [`ChainAdapter`] gives the pipeline a uniform view over one network's
//! explorer: wallet balance, recent inbound transfers, transfer lookup by
//! hash, and the current block height. Adapters never mutate intents; they
//! only report what the chain says.
//!
//! [`evaluate_transfer`] holds the acceptance rules shared by every adapter
//! so that the default [`ChainAdapter::validate_transfer`] behaves the same
//! regardless of which explorer produced the transfer.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::{AmountError, from_base_units, within_tolerance};
use crate::error::UpstreamError;
use crate::network::{Network, NetworkConfig};

/// Execution status of an on-chain transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Executed successfully.
    Success,
    /// Reverted or otherwise failed.
    Failed,
    /// Not yet executed.
    Pending,
}

/// A token transfer as reported by an explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainTransfer {
    /// Transaction hash.
    pub hash: String,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Value in the token's smallest unit, decimal or `0x` hex.
    pub raw_value: String,
    /// Block the transfer was included in.
    pub block_number: u64,
    /// Block time in milliseconds, `0` when unknown.
    pub timestamp_millis: u64,
    /// Execution status.
    pub status: TransferStatus,
    /// Confirmations reported by the explorer, `0` when unknown.
    pub confirmations: u64,
}

impl BlockchainTransfer {
    /// Returns the value in human units.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if the raw value is malformed.
    pub fn amount(&self, decimals: u32) -> Result<Decimal, AmountError> {
        from_base_units(&self.raw_value, decimals)
    }

    /// Returns `true` if the transfer was sent to `address`, ignoring case.
    #[must_use]
    pub fn is_addressed_to(&self, address: &str) -> bool {
        self.to.eq_ignore_ascii_case(address)
    }

    /// Confirmations at `height`: the reported count if the explorer gave one,
    /// otherwise `height - block_number + 1`.
    #[must_use]
    pub const fn confirmations_at(&self, height: u64) -> u64 {
        if self.confirmations > 0 {
            self.confirmations
        } else if height >= self.block_number {
            height - self.block_number + 1
        } else {
            0
        }
    }
}

/// Why a transfer can never satisfy an intent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The explorer does not know the transfer.
    #[error("transaction not found")]
    NotFound,
    /// The transfer went to another address.
    #[error("invalid recipient address: expected {expected}, got {actual}")]
    RecipientMismatch {
        /// Address the intent expects.
        expected: String,
        /// Address the transfer was sent to.
        actual: String,
    },
    /// The transfer did not execute successfully.
    #[error("transaction status is {0:?}")]
    TransactionFailed(TransferStatus),
    /// The transferred value is outside tolerance.
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch {
        /// Amount the intent expects.
        expected: Decimal,
        /// Amount actually transferred.
        actual: Decimal,
    },
}

/// A transfer that passed recipient, status and amount checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransfer {
    /// The transfer itself.
    pub transfer: BlockchainTransfer,
    /// Value in human units.
    pub amount: Decimal,
    /// Confirmations at validation time.
    pub confirmations: u64,
}

/// Outcome of validating a transfer against an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferValidation {
    /// Final and acceptable.
    Valid(ValidatedTransfer),
    /// Acceptable but not yet final.
    Insufficient {
        /// The transfer and its current confirmations.
        transfer: ValidatedTransfer,
        /// Confirmations still required in total.
        required: u64,
    },
    /// Can never be accepted.
    Invalid(RejectReason),
}

/// Applies the acceptance rules to a looked-up transfer.
///
/// Checks run in order: existence, recipient, execution status, amount,
/// confirmation depth. Only the last one yields
/// [`TransferValidation::Insufficient`].
///
/// # Errors
///
/// Returns [`AmountError`] if the transfer's raw value is malformed.
pub fn evaluate_transfer(
    transfer: Option<BlockchainTransfer>,
    height: u64,
    expected_amount: Decimal,
    expected_recipient: &str,
    decimals: u32,
    required_confirmations: u64,
) -> Result<TransferValidation, AmountError> {
    let Some(transfer) = transfer else {
        return Ok(TransferValidation::Invalid(RejectReason::NotFound));
    };
    if !transfer.is_addressed_to(expected_recipient) {
        return Ok(TransferValidation::Invalid(
            RejectReason::RecipientMismatch {
                expected: expected_recipient.to_owned(),
                actual: transfer.to,
            },
        ));
    }
    if transfer.status != TransferStatus::Success {
        return Ok(TransferValidation::Invalid(
            RejectReason::TransactionFailed(transfer.status),
        ));
    }
    let amount = transfer.amount(decimals)?;
    if !within_tolerance(amount, expected_amount) {
        return Ok(TransferValidation::Invalid(RejectReason::AmountMismatch {
            expected: expected_amount,
            actual: amount,
        }));
    }
    let confirmations = transfer.confirmations_at(height);
    let validated = ValidatedTransfer {
        transfer,
        amount,
        confirmations,
    };
    if confirmations < required_confirmations {
        Ok(TransferValidation::Insufficient {
            transfer: validated,
            required: required_confirmations,
        })
    } else {
        Ok(TransferValidation::Valid(validated))
    }
}

/// Read-only view of one network through its explorer.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The adapter's network config.
    fn config(&self) -> &NetworkConfig;

    /// The network this adapter observes.
    fn network(&self) -> Network {
        self.config().network
    }

    /// USDT balance of `address` in human units.
    async fn get_balance(&self, address: &str) -> Result<Decimal, UpstreamError>;

    /// Most recent inbound USDT transfers to `address`, newest first.
    ///
    /// Returns an empty list, not an error, when there are none.
    async fn list_incoming_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<BlockchainTransfer>, UpstreamError>;

    /// Looks up a USDT transfer by transaction hash.
    async fn get_transfer_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<BlockchainTransfer>, UpstreamError>;

    /// Current chain height.
    async fn get_current_block_height(&self) -> Result<u64, UpstreamError>;

    /// Validates that `hash` pays `expected_amount` to `expected_recipient`
    /// with enough confirmations for this network.
    async fn validate_transfer(
        &self,
        hash: &str,
        expected_amount: Decimal,
        expected_recipient: &str,
    ) -> Result<TransferValidation, UpstreamError> {
        let transfer = self.get_transfer_by_hash(hash).await?;
        let height = match &transfer {
            Some(t) if t.confirmations == 0 => self.get_current_block_height().await?,
            _ => 0,
        };
        let config = self.config();
        Ok(evaluate_transfer(
            transfer,
            height,
            expected_amount,
            expected_recipient,
            config.decimals,
            config.min_confirmations,
        )?)
    }
}

/// Adapters keyed by network, selected once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Network, Arc<dyn ChainAdapter>>,
}

impl Debug for AdapterRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("networks", &self.networks())
            .finish()
    }
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own network, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.network(), adapter);
    }

    /// Builder-style variant of [`Self::register`].
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Returns the adapter for `network`.
    #[must_use]
    pub fn get(&self, network: Network) -> Option<&Arc<dyn ChainAdapter>> {
        self.adapters.get(&network)
    }

    /// Networks with an adapter, in display order.
    #[must_use]
    pub fn networks(&self) -> Vec<Network> {
        Network::ALL
            .into_iter()
            .filter(|n| self.adapters.contains_key(n))
            .collect()
    }

    /// Iterates adapters in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ChainAdapter>> {
        Network::ALL.iter().filter_map(|n| self.adapters.get(n))
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns `true` if no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
