#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core pipeline for confirming USDT deposits.
//!
//! A user declares a deposit by creating a [`PaymentIntent`](intent::PaymentIntent)
//! for an amount on one of three networks (TRC20, BEP20, ERC20). A shared
//! wallet per network receives the funds. The pipeline polls each network's
//! explorer, matches inbound transfers to open intents by amount, waits for
//! enough confirmations, and credits the user's ledger balance exactly once.
//!
//! Explorer access is abstracted behind [`ChainAdapter`](chain::ChainAdapter);
//! concrete HTTP adapters live in `usdt-gate-explorer`.
//!
//! # Modules
//!
//! - [`amount`] - Exact conversion of raw token values and the match tolerance
//! - [`chain`] - Chain adapter trait, transfer types and acceptance rules
//! - [`config`] - Pipeline-wide limits and timings
//! - [`error`] - Error types shared across the pipeline
//! - [`guard`] - Per-intent in-flight guards
//! - [`intent`] - Payment intents and the status state machine
//! - [`ledger`] - In-memory user ledger implementing the settlement sink
//! - [`network`] - Supported networks and their static configuration
//! - [`reconcile`] - Matching on-chain transfers to intents
//! - [`scheduler`] - Interval driver for reconciliation and settlement
//! - [`settlement`] - Exactly-once crediting of confirmed intents
//! - [`stats`] - Aggregate payment statistics
//! - [`store`] - The authoritative intent store
//! - [`timestamp`] - Unix timestamps and clocks

pub mod amount;
pub mod chain;
pub mod config;
pub mod error;
pub mod guard;
pub mod intent;
pub mod ledger;
pub mod network;
pub mod reconcile;
pub mod scheduler;
pub mod settlement;
pub mod stats;
pub mod store;
pub mod timestamp;

#[cfg(test)]
mod testing;

pub use chain::{AdapterRegistry, BlockchainTransfer, ChainAdapter, TransferValidation};
pub use config::PaymentSettings;
pub use error::{DepositError, SettlementError, UpstreamError, ValidationError};
pub use intent::{PaymentIntent, PaymentStatus};
pub use network::{Network, NetworkConfig, NetworkRegistry};
pub use store::IntentStore;
