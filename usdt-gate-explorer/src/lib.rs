//! Explorer-backed chain adapters for usdt-gate.
//!
//! Implements [`usdt_gate::ChainAdapter`] over public block explorers so the
//! reconciliation engine can observe USDT deposits without running nodes.
//!
//! # Modules
//!
//! - [`http`] — Retrying JSON client and explorer error types
//! - [`tron`] — TRC20 through TronGrid
//! - [`etherscan`] — BEP20 and ERC20 through Etherscan-family APIs
//!
//! [`build_adapters`] picks the right adapter for every configured network.

pub mod etherscan;
pub mod http;
pub mod tron;

use std::sync::Arc;

use usdt_gate::{AdapterRegistry, ChainAdapter, Network, NetworkRegistry, PaymentSettings};

pub use etherscan::EtherscanAdapter;
pub use http::{ExplorerClient, ExplorerError};
pub use tron::TronGridAdapter;

/// Builds one adapter per configured network, applying the request timeout
/// and retry budget from `settings`.
///
/// # Errors
///
/// Returns [`ExplorerError`] if a network's base URL or API key is malformed.
pub fn build_adapters(
    networks: &NetworkRegistry,
    settings: &PaymentSettings,
) -> Result<AdapterRegistry, ExplorerError> {
    let timeout = settings.request_timeout();
    let mut registry = AdapterRegistry::new();
    for config in networks.iter() {
        let adapter: Arc<dyn ChainAdapter> = match config.network {
            Network::Trc20 => Arc::new(
                TronGridAdapter::try_new(config.clone())?
                    .with_retry_policy(timeout, settings.max_retries),
            ),
            Network::Bep20 | Network::Erc20 => Arc::new(
                EtherscanAdapter::try_new(config.clone())?
                    .with_retry_policy(timeout, settings.max_retries),
            ),
        };
        tracing::info!(
            network = %config.network,
            base_url = %config.base_url,
            wallet = %config.wallet_address,
            "Registered chain adapter"
        );
        registry.register(adapter);
    }
    Ok(registry)
}
