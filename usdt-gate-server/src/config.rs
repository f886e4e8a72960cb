//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//!
//! [payments]
//! minAmount = "10"
//! maxAmount = "100000"
//! intentTtlSecs = 1800
//! pollIntervalSecs = 30
//!
//! [networks.TRC20]
//! wallet_address = "$TRON_WALLET_ADDRESS"
//! api_key = "$TRON_API_KEY"
//!
//! [networks.BEP20]
//! wallet_address = "$BSC_WALLET_ADDRESS"
//! api_key = "$BSCSCAN_API_KEY"
//! min_confirmations = 20
//! ```
//!
//! Only networks with a resolved `wallet_address` are enabled. Every other
//! network field falls back to the built-in table in
//! [`usdt_gate::network::known_networks`].
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port
//! - Wallets and API keys referenced by `$VAR` in the config file

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use usdt_gate::network::known_networks;
use usdt_gate::{Network, NetworkConfig, NetworkRegistry, PaymentSettings};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8080`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Pipeline settings.
    #[serde(default)]
    pub payments: PaymentSettings,

    /// Per-network settings keyed by network name.
    #[serde(default)]
    pub networks: BTreeMap<Network, NetworkSettings>,
}

/// Per-network overrides on top of the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Shared deposit wallet. The network stays disabled without one.
    #[serde(default)]
    pub wallet_address: Option<String>,

    /// Explorer API key.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Explorer API base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// USDT contract address.
    #[serde(default)]
    pub contract_address: Option<String>,

    /// Confirmations required before an intent is confirmed.
    #[serde(default)]
    pub min_confirmations: Option<u64>,

    /// Token decimals.
    #[serde(default)]
    pub decimals: Option<u32>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

const fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            payments: PaymentSettings::default(),
            networks: BTreeMap::new(),
        }
    }
}

/// A value left as `$VAR` after expansion names a missing variable.
fn resolved(value: Option<&String>) -> Option<&str> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !v.starts_with('$'))
}

impl ServerConfig {
    /// Loads configuration from `path`, or defaults if the file does not exist.
    ///
    /// All `$VAR` / `${VAR}` references are expanded from the process
    /// environment before parsing. `HOST` and `PORT` env vars override the
    /// file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            String::new()
        };
        let mut config = Self::parse(&content)?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses configuration from TOML text after expanding env variables.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] if the text is not valid configuration.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(&expand_env_vars(content))
    }

    /// Builds the registry of enabled networks.
    ///
    /// A network is enabled when its `wallet_address` resolved to a non-empty
    /// value; unset fields take the built-in defaults.
    #[must_use]
    pub fn network_registry(&self) -> NetworkRegistry {
        let mut registry = NetworkRegistry::new();
        for defaults in known_networks() {
            let network = defaults.network;
            let Some(settings) = self.networks.get(&network) else {
                continue;
            };
            let Some(wallet) = resolved(settings.wallet_address.as_ref()) else {
                tracing::warn!(
                    %network,
                    "Skipping network: wallet_address not resolved (missing env var?)"
                );
                continue;
            };
            let config = settings.apply(defaults.with_wallet(wallet));
            if config.api_key.is_none() {
                tracing::warn!(%network, "No explorer API key configured");
            }
            registry.register(config);
        }
        registry
    }
}

impl NetworkSettings {
    fn apply(&self, mut config: NetworkConfig) -> NetworkConfig {
        if let Some(key) = resolved(self.api_key.as_ref()) {
            config.api_key = Some(key.to_owned());
        }
        if let Some(url) = resolved(self.base_url.as_ref()) {
            config.base_url = url.to_owned();
        }
        if let Some(contract) = resolved(self.contract_address.as_ref()) {
            config.contract_address = Some(contract.to_owned());
        }
        if let Some(confirmations) = self.min_confirmations {
            config.min_confirmations = confirmations;
        }
        if let Some(decimals) = self.decimals {
            config.decimals = decimals;
        }
        config
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('$') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => output.push_str(&value),
            _ => output.push_str(&rest[start..=start + consumed]),
        }
        rest = &after[consumed..];
    }
    output.push_str(rest);
    output
}
