//! Pipeline-wide settings.
//!
//! Per-network values live in [`NetworkConfig`](crate::network::NetworkConfig);
//! everything else is collected here. Every field has a default so a partial
//! `[payments]` table deserializes cleanly.
//!
//! # Example
//!
//! ```rust
//! use usdt_gate::config::PaymentSettings;
//!
//! let settings: PaymentSettings = serde_json::from_str(r#"{"minAmount": "25"}"#).unwrap();
//! assert_eq!(settings.intent_ttl_secs, 1800);
//! ```

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Global limits and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentSettings {
    /// Smallest intent amount accepted, in USDT.
    pub min_amount: Decimal,
    /// Largest intent amount accepted, in USDT.
    pub max_amount: Decimal,
    /// Lifetime of an open intent.
    pub intent_ttl_secs: u64,
    /// Delay between reconciliation cycles.
    pub poll_interval_secs: u64,
    /// Retries for a failed explorer request.
    pub max_retries: u32,
    /// Transfers fetched per network per cycle.
    pub page_size: usize,
    /// Per-request explorer timeout.
    pub request_timeout_secs: u64,
    /// Share price used to value ledger share balances.
    pub share_price: Decimal,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            min_amount: Decimal::TEN,
            max_amount: Decimal::from(100_000),
            intent_ttl_secs: 30 * 60,
            poll_interval_secs: 30,
            max_retries: 3,
            page_size: 50,
            request_timeout_secs: 5,
            share_price: Decimal::ONE,
        }
    }
}

impl PaymentSettings {
    /// Returns the poll interval, never shorter than one second.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Returns the explorer request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
