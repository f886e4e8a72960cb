//! Scripted in-process chain adapter for pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::chain::{BlockchainTransfer, ChainAdapter, TransferStatus};
use crate::error::UpstreamError;
use crate::network::NetworkConfig;

#[derive(Debug)]
pub(crate) struct ScriptedAdapter {
    config: NetworkConfig,
    height: AtomicU64,
    failing: AtomicBool,
    transfers: Mutex<Vec<BlockchainTransfer>>,
    pub(crate) lookups: AtomicU64,
}

impl ScriptedAdapter {
    pub(crate) fn new(config: NetworkConfig, height: u64) -> Self {
        Self {
            config,
            height: AtomicU64::new(height),
            failing: AtomicBool::new(false),
            transfers: Mutex::new(Vec::new()),
            lookups: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Adds a successful transfer to the wallet with explorer-unknown confirmations.
    pub(crate) fn push_transfer(&self, hash: &str, raw_value: &str, block_number: u64) {
        self.push(BlockchainTransfer {
            hash: hash.into(),
            from: "sender".into(),
            to: self.config.wallet_address.clone(),
            raw_value: raw_value.into(),
            block_number,
            timestamp_millis: 0,
            status: TransferStatus::Success,
            confirmations: 0,
        });
    }

    pub(crate) fn push(&self, transfer: BlockchainTransfer) {
        self.transfers.lock().unwrap().insert(0, transfer);
    }

    fn check(&self) -> Result<(), UpstreamError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Status {
                context: "scripted",
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for ScriptedAdapter {
    fn config(&self) -> &NetworkConfig {
        &self.config
    }

    async fn get_balance(&self, _address: &str) -> Result<Decimal, UpstreamError> {
        self.check()?;
        Ok(Decimal::from(1234))
    }

    async fn list_incoming_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<BlockchainTransfer>, UpstreamError> {
        self.check()?;
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_addressed_to(address))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_transfer_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<BlockchainTransfer>, UpstreamError> {
        self.check()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.hash == hash)
            .cloned())
    }

    async fn get_current_block_height(&self) -> Result<u64, UpstreamError> {
        self.check()?;
        Ok(self.height.load(Ordering::SeqCst))
    }
}
