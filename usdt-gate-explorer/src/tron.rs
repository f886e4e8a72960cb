//! TRC20 USDT through the TronGrid v1 API.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | balance | `GET /v1/accounts/{address}/tokens` |
//! | inbound transfers | `GET /v1/accounts/{address}/transactions/trc20` |
//! | transfer lookup | `GET /v1/transactions/{hash}` |
//! | block of a transaction | `POST /wallet/gettransactioninfobyid` |
//! | height | `GET /v1/blocks/latest` |
//!
//! TronGrid wraps every payload in `{"success": bool, "data": ...}`. The API
//! key, when configured, travels in the `TRON-PRO-API-KEY` header.
//!
//! The trc20 listing usually carries no block number. Rows without one get
//! their block from the full node's transaction info, and rows whose block is
//! still unknown are left out until a later cycle.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use usdt_gate::amount::from_base_units;
use usdt_gate::chain::TransferStatus;
use usdt_gate::{BlockchainTransfer, ChainAdapter, NetworkConfig, UpstreamError};

use crate::http::{ExplorerClient, ExplorerError};

/// Header carrying the TronGrid API key.
pub const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self, context: &'static str) -> Result<Option<T>, ExplorerError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ExplorerError::Explorer {
                context,
                message: self.error.unwrap_or_else(|| "request unsuccessful".to_owned()),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TronTransfer {
    transaction_id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    confirmations: Option<u64>,
    #[serde(default)]
    block: Option<u64>,
    #[serde(default)]
    block_timestamp: Option<u64>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    token_info: Option<TokenInfo>,
}

impl TronTransfer {
    fn contract(&self) -> Option<&str> {
        self.contract_address
            .as_deref()
            .or_else(|| self.token_info.as_ref()?.address.as_deref())
    }

    fn into_transfer(self) -> Result<BlockchainTransfer, ExplorerError> {
        let raw_value = scalar_to_string(&self.value)
            .ok_or_else(|| ExplorerError::decode("trc20 transfer", "missing value"))?;
        // The trc20 listing only returns executed transfers and omits `status`.
        let status = match self.status {
            None | Some(1) => TransferStatus::Success,
            Some(_) => TransferStatus::Failed,
        };
        Ok(BlockchainTransfer {
            hash: self.transaction_id,
            from: self.from,
            to: self.to,
            raw_value,
            block_number: self.block.unwrap_or_default(),
            timestamp_millis: self.block_timestamp.unwrap_or_default(),
            status,
            confirmations: self.confirmations.unwrap_or_default(),
        })
    }
}

/// Response of `/wallet/gettransactioninfobyid`; `{}` for unknown hashes.
#[derive(Debug, Deserialize)]
struct TransactionInfo {
    #[serde(default, rename = "blockNumber")]
    block_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LatestBlock {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: RawBlockData,
}

#[derive(Debug, Deserialize)]
struct RawBlockData {
    number: u64,
}

/// Renders a JSON string or number as a string of digits.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Finds the balance for `contract` in a TronGrid token list.
///
/// Entries come either as `{"contract_address": .., "balance": ..}` or as a
/// single-key map from contract address to balance.
fn token_balance(entries: &[Value], contract: &str) -> Option<String> {
    entries.iter().find_map(|entry| {
        let object = entry.as_object()?;
        match object.get("contract_address").and_then(Value::as_str) {
            Some(address) if address.eq_ignore_ascii_case(contract) => {
                object.get("balance").and_then(scalar_to_string)
            }
            Some(_) => None,
            None => object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(contract))
                .and_then(|(_, v)| scalar_to_string(v)),
        }
    })
}

/// [`ChainAdapter`] for TRC20 USDT.
#[derive(Debug, Clone)]
pub struct TronGridAdapter {
    config: NetworkConfig,
    client: ExplorerClient,
}

impl TronGridAdapter {
    /// Creates an adapter from a network config, sending the API key header
    /// when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError`] if the base URL or API key is malformed.
    pub fn try_new(config: NetworkConfig) -> Result<Self, ExplorerError> {
        let mut client = ExplorerClient::try_new(&config.base_url)?;
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            client = client.with_header(API_KEY_HEADER, key)?;
        }
        Ok(Self { config, client })
    }

    /// Sets the per-request timeout and retry budget.
    #[must_use]
    pub fn with_retry_policy(mut self, timeout: Duration, max_retries: u32) -> Self {
        self.client = self
            .client
            .with_timeout(timeout)
            .with_max_retries(max_retries);
        self
    }

    fn matches_contract(&self, transfer: &TronTransfer) -> bool {
        transfer
            .contract()
            .is_none_or(|c| c.eq_ignore_ascii_case(self.config.contract()))
    }

    /// Looks up the block a transaction was mined in.
    async fn block_number_of(&self, hash: &str) -> Result<Option<u64>, ExplorerError> {
        const CONTEXT: &str = "POST /wallet/gettransactioninfobyid";
        let info: TransactionInfo = self
            .client
            .post_json(
                "/wallet/gettransactioninfobyid",
                &serde_json::json!({ "value": hash }),
                CONTEXT,
            )
            .await?;
        Ok(info.block_number.filter(|&n| n > 0))
    }

    /// Converts a TronGrid row, filling in a missing block number.
    ///
    /// Returns `None` when the block is still unknown.
    async fn resolve(
        &self,
        raw: TronTransfer,
    ) -> Result<Option<BlockchainTransfer>, ExplorerError> {
        let has_block = raw.block.is_some();
        let mut transfer = raw.into_transfer()?;
        if !has_block {
            match self.block_number_of(&transfer.hash).await? {
                Some(block) => transfer.block_number = block,
                None => return Ok(None),
            }
        }
        Ok(Some(transfer))
    }
}

#[async_trait]
impl ChainAdapter for TronGridAdapter {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, UpstreamError> {
        const CONTEXT: &str = "GET /v1/accounts/{address}/tokens";
        let envelope: Envelope<Vec<Value>> = self
            .client
            .get_json(&format!("/v1/accounts/{address}/tokens"), &[], CONTEXT)
            .await?;
        let entries = envelope.into_data(CONTEXT)?.unwrap_or_default();
        let raw = token_balance(&entries, self.config.contract()).unwrap_or_else(|| "0".into());
        Ok(from_base_units(&raw, self.config.decimals)?)
    }

    #[instrument(skip_all, err, fields(network = %self.config.network, limit = limit))]
    async fn list_incoming_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<BlockchainTransfer>, UpstreamError> {
        const CONTEXT: &str = "GET /v1/accounts/{address}/transactions/trc20";
        let limit = limit.to_string();
        let envelope: Envelope<Vec<TronTransfer>> = self
            .client
            .get_json(
                &format!("/v1/accounts/{address}/transactions/trc20"),
                &[
                    ("limit", limit.as_str()),
                    ("contract_address", self.config.contract()),
                    ("only_to", "true"),
                ],
                CONTEXT,
            )
            .await?;
        let mut transfers = Vec::new();
        for raw in envelope.into_data(CONTEXT)?.unwrap_or_default() {
            if !self.matches_contract(&raw) || !raw.to.eq_ignore_ascii_case(address) {
                continue;
            }
            let hash = raw.transaction_id.clone();
            match self.resolve(raw).await {
                Ok(Some(transfer)) => transfers.push(transfer),
                Ok(None) => {
                    tracing::warn!(hash = %hash, "Transfer has no block number yet, skipping");
                }
                Err(e @ ExplorerError::Decode { .. }) => {
                    tracing::warn!(hash = %hash, error = %e, "Skipping malformed transfer");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(
            network = %self.network(),
            count = transfers.len(),
            "Fetched incoming transfers"
        );
        Ok(transfers)
    }

    #[instrument(skip_all, err, fields(network = %self.config.network, hash = %hash))]
    async fn get_transfer_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<BlockchainTransfer>, UpstreamError> {
        const CONTEXT: &str = "GET /v1/transactions/{hash}";
        let result = self
            .client
            .get_json::<Envelope<Value>>(&format!("/v1/transactions/{hash}"), &[], CONTEXT)
            .await;
        let envelope = match result {
            Ok(envelope) => envelope,
            Err(ExplorerError::HttpStatus { status, .. }) if status.as_u16() == 404 => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !envelope.success {
            return Ok(None);
        }
        let data = match envelope.data {
            Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
            Some(value @ Value::Object(_)) => value,
            _ => return Ok(None),
        };
        let raw: TronTransfer = serde_json::from_value(data)
            .map_err(|e| ExplorerError::decode(CONTEXT, e.to_string()))?;
        if !self.matches_contract(&raw) {
            return Ok(None);
        }
        Ok(self.resolve(raw).await?)
    }

    async fn get_current_block_height(&self) -> Result<u64, UpstreamError> {
        const CONTEXT: &str = "GET /v1/blocks/latest";
        let value: Value = self.client.get_json("/v1/blocks/latest", &[], CONTEXT).await?;
        // The latest-block endpoint returns the block either bare or enveloped.
        let block = value.get("data").unwrap_or(&value).clone();
        let latest: LatestBlock = serde_json::from_value(block)
            .map_err(|e| ExplorerError::decode(CONTEXT, e.to_string()))?;
        Ok(latest.block_header.raw_data.number)
    }
}
