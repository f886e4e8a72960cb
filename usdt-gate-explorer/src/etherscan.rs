//! BEP20 and ERC20 USDT through Etherscan-family APIs.
//!
//! Etherscan and BscScan share one query-string API, so a single
//! [`EtherscanAdapter`] serves both networks; only the base URL, contract and
//! decimals differ. Account endpoints answer `{"status", "message", "result"}`;
//! proxy endpoints answer JSON-RPC shaped bodies.
//!
//! Transfer lookup reads the transaction receipt and decodes the token's
//! `Transfer` event, since the transaction's own `value` is the native coin
//! amount, not the token amount.

use std::time::Duration;

use alloy_primitives::{B256, hex};
use alloy_sol_types::{SolEvent, sol};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;
use usdt_gate::amount::from_base_units;
use usdt_gate::chain::TransferStatus;
use usdt_gate::{BlockchainTransfer, ChainAdapter, NetworkConfig, UpstreamError};

use crate::http::{ExplorerClient, ExplorerError};

sol! {
    /// ERC20 transfer event.
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Message returned alongside `status: "0"` when an address has no transfers.
const NO_TRANSACTIONS: &str = "No transactions found";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ApiResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }

    fn into_error(self, context: &'static str) -> ExplorerError {
        let message = match self.result {
            Value::String(detail) if !detail.is_empty() => format!("{}: {detail}", self.message),
            _ => self.message,
        };
        ExplorerError::Explorer { context, message }
    }

    fn into_result<T: DeserializeOwned>(self, context: &'static str) -> Result<T, ExplorerError> {
        if !self.is_ok() {
            return Err(self.into_error(context));
        }
        serde_json::from_value(self.result)
            .map_err(|e| ExplorerError::decode(context, e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ProxyResponse {
    fn into_result(self, context: &'static str) -> Result<Value, ExplorerError> {
        if let Some(error) = self.error {
            return Err(ExplorerError::Explorer {
                context,
                message: error.message,
            });
        }
        // Rate limits and bad keys come back in the account-API shape.
        if self.status.as_deref() == Some("0") {
            let message = match self.result {
                Value::String(detail) => detail,
                _ => self.message.unwrap_or_default(),
            };
            return Err(ExplorerError::Explorer { context, message });
        }
        Ok(self.result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTx {
    hash: String,
    from: String,
    to: String,
    value: String,
    block_number: String,
    #[serde(default)]
    time_stamp: String,
    #[serde(default)]
    confirmations: String,
    #[serde(default)]
    is_error: Option<String>,
}

impl TokenTx {
    fn into_transfer(self) -> Result<BlockchainTransfer, ExplorerError> {
        let block_number = self.block_number.parse().map_err(|_| {
            ExplorerError::decode("tokentx", format!("bad blockNumber {}", self.block_number))
        })?;
        let status = match self.is_error.as_deref() {
            None | Some("0") => TransferStatus::Success,
            Some(_) => TransferStatus::Failed,
        };
        Ok(BlockchainTransfer {
            hash: self.hash,
            from: self.from,
            to: self.to,
            raw_value: self.value,
            block_number,
            timestamp_millis: self
                .time_stamp
                .parse::<u64>()
                .unwrap_or_default()
                .saturating_mul(1000),
            status,
            confirmations: self.confirmations.parse().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    logs: Vec<Log>,
}

#[derive(Debug, Deserialize)]
struct Log {
    address: String,
    topics: Vec<String>,
    data: String,
}

impl Log {
    /// Decodes the log as an ERC20 `Transfer`, or `None` if it is another event.
    fn decode_transfer(&self) -> Option<Transfer> {
        let topics = self
            .topics
            .iter()
            .map(|t| t.parse::<B256>().ok())
            .collect::<Option<Vec<_>>>()?;
        if topics.first() != Some(&Transfer::SIGNATURE_HASH) {
            return None;
        }
        let data = hex::decode(&self.data).ok()?;
        Transfer::decode_raw_log(topics, &data).ok()
    }
}

fn parse_hex_u64(value: &str, context: &'static str) -> Result<u64, ExplorerError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16)
        .map_err(|_| ExplorerError::decode(context, format!("bad hex quantity {value}")))
}

/// [`ChainAdapter`] for USDT on Etherscan-family explorers.
#[derive(Debug, Clone)]
pub struct EtherscanAdapter {
    config: NetworkConfig,
    client: ExplorerClient,
}

impl EtherscanAdapter {
    /// Creates an adapter from a network config.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError::UrlParse`] if the base URL is malformed.
    pub fn try_new(config: NetworkConfig) -> Result<Self, ExplorerError> {
        let client = ExplorerClient::try_new(&config.base_url)?;
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

    /// Appends the API key, when configured, to a query.
    fn query<'a>(&'a self, pairs: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut query = pairs.to_vec();
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            query.push(("apikey", key));
        }
        query
    }

    async fn account<R>(
        &self,
        pairs: &[(&str, &str)],
        context: &'static str,
    ) -> Result<R, ExplorerError>
    where
        R: DeserializeOwned,
    {
        self.client.get_json("", &self.query(pairs), context).await
    }

    async fn proxy(
        &self,
        pairs: &[(&str, &str)],
        context: &'static str,
    ) -> Result<Value, ExplorerError> {
        let mut query = vec![("module", "proxy")];
        query.extend_from_slice(pairs);
        let response: ProxyResponse = self
            .client
            .get_json("", &self.query(&query), context)
            .await?;
        response.into_result(context)
    }

    fn transfer_from_receipt(
        &self,
        receipt: Receipt,
    ) -> Result<Option<BlockchainTransfer>, ExplorerError> {
        const CONTEXT: &str = "eth_getTransactionReceipt";
        let contract = self.config.contract();
        let transfers: Vec<Transfer> = receipt
            .logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(contract))
            .filter_map(Log::decode_transfer)
            .collect();
        let wallet = &self.config.wallet_address;
        let chosen = transfers
            .iter()
            .find(|t| t.to.to_string().eq_ignore_ascii_case(wallet))
            .or_else(|| transfers.first());
        let Some(event) = chosen else {
            return Ok(None);
        };
        let block_number = match receipt.block_number.as_deref() {
            Some(block) => parse_hex_u64(block, CONTEXT)?,
            None => 0,
        };
        let status = match receipt.status.as_deref() {
            None | Some("0x1") => TransferStatus::Success,
            Some(_) => TransferStatus::Failed,
        };
        Ok(Some(BlockchainTransfer {
            hash: receipt.transaction_hash,
            from: event.from.to_string(),
            to: event.to.to_string(),
            raw_value: event.value.to_string(),
            block_number,
            timestamp_millis: 0,
            status,
            confirmations: 0,
        }))
    }
}

#[async_trait]
impl ChainAdapter for EtherscanAdapter {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, UpstreamError> {
        const CONTEXT: &str = "GET tokenbalance";
        let response: ApiResponse = self
            .account(
                &[
                    ("module", "account"),
                    ("action", "tokenbalance"),
                    ("contractaddress", self.config.contract()),
                    ("address", address),
                    ("tag", "latest"),
                ],
                CONTEXT,
            )
            .await?;
        let raw: String = response.into_result(CONTEXT)?;
        Ok(from_base_units(&raw, self.config.decimals)?)
    }

    #[instrument(skip_all, err, fields(network = %self.config.network, limit = limit))]
    async fn list_incoming_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<BlockchainTransfer>, UpstreamError> {
        const CONTEXT: &str = "GET tokentx";
        let offset = limit.to_string();
        let response: ApiResponse = self
            .account(
                &[
                    ("module", "account"),
                    ("action", "tokentx"),
                    ("contractaddress", self.config.contract()),
                    ("address", address),
                    ("page", "1"),
                    ("offset", offset.as_str()),
                    ("sort", "desc"),
                ],
                CONTEXT,
            )
            .await?;
        if !response.is_ok() && response.message.starts_with(NO_TRANSACTIONS) {
            return Ok(Vec::new());
        }
        let rows: Vec<TokenTx> = response.into_result(CONTEXT)?;
        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.to.eq_ignore_ascii_case(address) {
                continue;
            }
            let hash = row.hash.clone();
            match row.into_transfer() {
                Ok(transfer) => transfers.push(transfer),
                Err(e) => tracing::warn!(hash = %hash, error = %e, "Skipping malformed transfer"),
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
        const CONTEXT: &str = "GET eth_getTransactionReceipt";
        let result = self
            .proxy(
                &[("action", "eth_getTransactionReceipt"), ("txhash", hash)],
                CONTEXT,
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let receipt: Receipt = serde_json::from_value(result)
            .map_err(|e| ExplorerError::decode(CONTEXT, e.to_string()))?;
        Ok(self.transfer_from_receipt(receipt)?)
    }

    async fn get_current_block_height(&self) -> Result<u64, UpstreamError> {
        const CONTEXT: &str = "GET eth_blockNumber";
        let result = self.proxy(&[("action", "eth_blockNumber")], CONTEXT).await?;
        let height = result
            .as_str()
            .ok_or_else(|| ExplorerError::decode(CONTEXT, "result is not a string"))?;
        Ok(parse_hex_u64(height, CONTEXT)?)
    }
}
