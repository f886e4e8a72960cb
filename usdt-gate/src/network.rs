//! Deposit networks and their static configuration.
//!
//! Three USDT deployments are supported, each watched through its own
//! explorer API. A [`NetworkConfig`] carries everything the pipeline needs to
//! know about one of them, and a [`NetworkRegistry`] holds the set of
//! networks enabled for a running process.
//!
//! Configs are loaded once at startup and never mutated afterwards.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// USDT contract on Tron mainnet.
pub const USDT_TRC20_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

/// USDT (Binance-Peg) contract on BNB Smart Chain.
pub const USDT_BEP20_CONTRACT: &str = "0x55d398326f99059fF775485246999027B3197955";

/// USDT contract on Ethereum mainnet.
pub const USDT_ERC20_CONTRACT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

/// A USDT deployment the pipeline can accept deposits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    /// USDT on Tron, observed through `TronGrid`.
    #[serde(rename = "TRC20")]
    Trc20,
    /// USDT on BNB Smart Chain, observed through `BscScan`.
    #[serde(rename = "BEP20")]
    Bep20,
    /// USDT on Ethereum, observed through Etherscan.
    #[serde(rename = "ERC20")]
    Erc20,
}

impl Network {
    /// Every supported network, in display order.
    pub const ALL: [Self; 3] = [Self::Trc20, Self::Bep20, Self::Erc20];

    /// Returns the wire name of the network (`"TRC20"`, `"BEP20"`, `"ERC20"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trc20 => "TRC20",
            Self::Bep20 => "BEP20",
            Self::Erc20 => "ERC20",
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a supported network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownNetworkError(s.to_owned()))
    }
}

/// Static configuration for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Human-readable name, e.g. `"Tron (TRC20)"`.
    pub name: String,
    /// Which network this config describes.
    pub network: Network,
    /// Explorer API base URL.
    pub base_url: String,
    /// Explorer API key. Never serialized.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Token contract to watch. `None` falls back to the canonical USDT contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// Shared wallet all deposits on this network are sent to.
    pub wallet_address: String,
    /// Confirmation depth after which a transfer is final.
    pub min_confirmations: u64,
    /// Token decimals used to scale raw on-chain values.
    pub decimals: u32,
    /// Token symbol.
    pub symbol: String,
}

impl NetworkConfig {
    /// Returns the token contract, falling back to the canonical USDT deployment.
    #[must_use]
    pub fn contract(&self) -> &str {
        self.contract_address
            .as_deref()
            .unwrap_or_else(|| default_contract(self.network))
    }

    /// Sets the deposit wallet.
    #[must_use]
    pub fn with_wallet(mut self, wallet_address: impl Into<String>) -> Self {
        self.wallet_address = wallet_address.into();
        self
    }

    /// Sets the explorer API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the explorer base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the required confirmation depth.
    #[must_use]
    pub const fn with_min_confirmations(mut self, min_confirmations: u64) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }
}

/// Canonical USDT contract for a network.
#[must_use]
pub const fn default_contract(network: Network) -> &'static str {
    match network {
        Network::Trc20 => USDT_TRC20_CONTRACT,
        Network::Bep20 => USDT_BEP20_CONTRACT,
        Network::Erc20 => USDT_ERC20_CONTRACT,
    }
}

/// Returns default configurations for every supported network.
///
/// Wallet addresses and API keys are left empty; they are deployment
/// specific and must be filled in before the config is registered.
#[must_use]
pub fn known_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig {
            name: "Tron (TRC20)".into(),
            network: Network::Trc20,
            base_url: "https://api.trongrid.io".into(),
            api_key: None,
            contract_address: Some(USDT_TRC20_CONTRACT.into()),
            wallet_address: String::new(),
            min_confirmations: 12,
            decimals: 6,
            symbol: "USDT".into(),
        },
        NetworkConfig {
            name: "BNB Smart Chain (BEP20)".into(),
            network: Network::Bep20,
            base_url: "https://api.bscscan.com/api".into(),
            api_key: None,
            contract_address: Some(USDT_BEP20_CONTRACT.into()),
            wallet_address: String::new(),
            min_confirmations: 15,
            decimals: 18,
            symbol: "USDT".into(),
        },
        NetworkConfig {
            name: "Ethereum (ERC20)".into(),
            network: Network::Erc20,
            base_url: "https://api.etherscan.io/api".into(),
            api_key: None,
            contract_address: Some(USDT_ERC20_CONTRACT.into()),
            wallet_address: String::new(),
            min_confirmations: 12,
            decimals: 6,
            symbol: "USDT".into(),
        },
    ]
}

/// Returns the default configuration for a single network.
#[must_use]
pub fn known_network(network: Network) -> Option<NetworkConfig> {
    known_networks().into_iter().find(|c| c.network == network)
}

/// The set of networks enabled for this process.
///
/// At most one config per [`Network`]; registering a second config for the
/// same network replaces the first.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    configs: HashMap<Network, NetworkConfig>,
}

impl NetworkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a list of configs.
    #[must_use]
    pub fn from_configs(configs: impl IntoIterator<Item = NetworkConfig>) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config);
        }
        registry
    }

    /// Registers a network config.
    pub fn register(&mut self, config: NetworkConfig) {
        self.configs.insert(config.network, config);
    }

    /// Builder-style variant of [`Self::register`].
    #[must_use]
    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.register(config);
        self
    }

    /// Looks up the config for a network.
    #[must_use]
    pub fn get(&self, network: Network) -> Option<&NetworkConfig> {
        self.configs.get(&network)
    }

    /// Returns `true` if the network is enabled.
    #[must_use]
    pub fn contains(&self, network: Network) -> bool {
        self.configs.contains_key(&network)
    }

    /// Returns the enabled networks in display order.
    #[must_use]
    pub fn networks(&self) -> Vec<Network> {
        Network::ALL
            .into_iter()
            .filter(|n| self.configs.contains_key(n))
            .collect()
    }

    /// Iterates over the registered configs in display order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkConfig> {
        Network::ALL.iter().filter_map(|n| self.configs.get(n))
    }

    /// Returns the number of enabled networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Returns `true` if no networks are enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
