//! Matching on-chain transfers to open payment intents.
//!
//! Each cycle, for every network with an adapter, the engine:
//!
//! 1. reads the chain height and skips the network if it has not advanced
//!    past the last checked block;
//! 2. re-validates `processing` intents by their recorded hash, since
//!    confirmations keep accruing on blocks the scan below will not revisit;
//! 3. lists recent inbound transfers to the shared wallet and keeps the
//!    successful ones above the last checked block that no intent holds yet;
//! 4. offers each of those to the network's pending intents, oldest first,
//!    under the amount tolerance; the first intent that validates claims it;
//! 5. records the new height as checked.
//!
//! The last checked block starts at the chain height observed by
//! [`ReconciliationEngine::initialize`], so transfers older than process
//! start are never considered.
//!
//! A failure on one network is logged and never stops the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::amount::within_tolerance;
use crate::chain::{
    AdapterRegistry, BlockchainTransfer, ChainAdapter, RejectReason, TransferStatus,
    TransferValidation, ValidatedTransfer,
};
use crate::error::UpstreamError;
use crate::guard::IntentLocks;
use crate::intent::{IntentUpdate, PaymentStatus};
use crate::network::Network;
use crate::store::IntentStore;
use crate::timestamp::UnixTimestamp;

/// What happened to one candidate transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Claimed by the intent, now `confirmed`.
    Confirmed(Uuid),
    /// Claimed by the intent, now `processing`.
    Processing(Uuid),
    /// No open intent matched its amount.
    Unmatched,
    /// The explorer lookup showed the transfer can never be accepted.
    Rejected(RejectReason),
}

/// Per-network summary of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkReport {
    /// The network.
    pub network: Network,
    /// Chain height observed, if the explorer answered.
    pub height: Option<u64>,
    /// `true` if the height had not advanced.
    pub skipped: bool,
    /// New transfers considered.
    pub candidates: usize,
    /// Intents moved to `confirmed`.
    pub confirmed: usize,
    /// Intents moved to or refreshed in `processing`.
    pub processing: usize,
    /// Candidates no intent claimed.
    pub unmatched: usize,
    /// Explorer error that aborted the pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NetworkReport {
    const fn new(network: Network, height: Option<u64>) -> Self {
        Self {
            network,
            height,
            skipped: false,
            candidates: 0,
            confirmed: 0,
            processing: 0,
            unmatched: 0,
            error: None,
        }
    }

    fn failed(network: Network, error: &UpstreamError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(network, None)
        }
    }
}

/// Summary of a pass over every network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// One entry per network, in display order.
    pub networks: Vec<NetworkReport>,
    /// Intents expired by the closing sweep.
    pub expired: usize,
}

/// Wallet balance and outstanding intents for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBalance {
    /// The network.
    pub network: Network,
    /// Wallet USDT balance, if the explorer answered.
    pub balance: Option<Decimal>,
    /// Sum of expected amounts of open intents.
    pub pending_amount: Decimal,
    /// When the figures were taken.
    pub last_updated: UnixTimestamp,
    /// Explorer error, if the balance lookup failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Maps a validation to the status an intent requiring `required`
/// confirmations should move to.
fn classify(
    validation: TransferValidation,
    required: u64,
) -> Result<(PaymentStatus, ValidatedTransfer), RejectReason> {
    match validation {
        TransferValidation::Valid(v) | TransferValidation::Insufficient { transfer: v, .. } => {
            let status = if v.confirmations >= required {
                PaymentStatus::Confirmed
            } else {
                PaymentStatus::Processing
            };
            Ok((status, v))
        }
        TransferValidation::Invalid(reason) => Err(reason),
    }
}

/// Polls adapters and moves matching intents forward.
#[derive(Debug)]
pub struct ReconciliationEngine {
    store: Arc<IntentStore>,
    adapters: AdapterRegistry,
    locks: IntentLocks,
    page_size: usize,
    last_checked: Mutex<BTreeMap<Network, u64>>,
}

impl ReconciliationEngine {
    /// Creates an engine. The page size comes from the store's settings.
    #[must_use]
    pub fn new(store: Arc<IntentStore>, adapters: AdapterRegistry, locks: IntentLocks) -> Self {
        let page_size = store.settings().page_size;
        Self {
            store,
            adapters,
            locks,
            page_size,
            last_checked: Mutex::new(BTreeMap::new()),
        }
    }

    /// Overrides the number of transfers fetched per network.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The registered adapters.
    #[must_use]
    pub const fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Records the current chain height of every network as already checked.
    ///
    /// A network whose height cannot be read starts from block 0.
    pub async fn initialize(&self) {
        for adapter in self.adapters.iter() {
            let network = adapter.network();
            let height = match adapter.get_current_block_height().await {
                Ok(height) => height,
                Err(e) => {
                    tracing::warn!(
                        network = %network,
                        error = %e,
                        "Failed to read start height, scanning from block 0"
                    );
                    0
                }
            };
            self.last_checked.lock().await.insert(network, height);
            tracing::info!(network = %network, height, "Initialized last checked block");
        }
    }

    /// Snapshot of the last checked block per network.
    pub async fn last_checked_blocks(&self) -> BTreeMap<Network, u64> {
        self.last_checked.lock().await.clone()
    }

    /// Reconciles every network, then expires stale intents.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let mut networks = Vec::with_capacity(self.adapters.len());
        for adapter in self.adapters.iter() {
            let network = adapter.network();
            let report = match self.reconcile_network(adapter.as_ref()).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(
                        network = %network,
                        wallet = %adapter.config().wallet_address,
                        error = %e,
                        "Reconciliation failed"
                    );
                    NetworkReport::failed(network, &e)
                }
            };
            networks.push(report);
        }
        let expired = self.store.expire_stale().await;
        ReconcileReport { networks, expired }
    }

    /// Runs one pass over a single network.
    ///
    /// If validating any candidate fails upstream, the checked block is left
    /// where it was so the same range is scanned again next time. Transfers
    /// that were claimed in the meantime are skipped on the rescan.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the height or the transfer list cannot be
    /// fetched.
    pub async fn reconcile_network(
        &self,
        adapter: &dyn ChainAdapter,
    ) -> Result<NetworkReport, UpstreamError> {
        let network = adapter.network();
        let last = self
            .last_checked
            .lock()
            .await
            .get(&network)
            .copied()
            .unwrap_or(0);
        let height = adapter.get_current_block_height().await?;
        let mut report = NetworkReport::new(network, Some(height));
        if height <= last {
            tracing::debug!(network = %network, height, last, "No new blocks");
            report.skipped = true;
            return Ok(report);
        }

        self.recheck_processing(adapter, &mut report).await;

        let wallet = adapter.config().wallet_address.clone();
        let transfers = adapter
            .list_incoming_transfers(&wallet, self.page_size)
            .await?;

        let mut rescan = false;
        for transfer in transfers {
            if transfer.block_number == 0 {
                tracing::warn!(
                    network = %network,
                    hash = %transfer.hash,
                    "Transfer has no block number, skipping"
                );
                continue;
            }
            if transfer.block_number <= last || transfer.status != TransferStatus::Success {
                continue;
            }
            if self
                .store
                .is_transaction_claimed(network, &transfer.hash)
                .await
            {
                continue;
            }
            report.candidates += 1;
            match self.match_transfer(adapter, &transfer).await {
                Ok(TransferOutcome::Confirmed(_)) => report.confirmed += 1,
                Ok(TransferOutcome::Processing(_)) => report.processing += 1,
                Ok(TransferOutcome::Unmatched | TransferOutcome::Rejected(_)) => {
                    report.unmatched += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        network = %network,
                        hash = %transfer.hash,
                        error = %e,
                        "Failed to validate transfer, range will be rescanned"
                    );
                    rescan = true;
                }
            }
        }

        if !rescan {
            self.last_checked.lock().await.insert(network, height);
        }
        tracing::debug!(
            network = %network,
            height,
            candidates = report.candidates,
            confirmed = report.confirmed,
            processing = report.processing,
            "Reconciled network"
        );
        Ok(report)
    }

    /// Offers a transfer to the network's pending intents, oldest first.
    async fn match_transfer(
        &self,
        adapter: &dyn ChainAdapter,
        transfer: &BlockchainTransfer,
    ) -> Result<TransferOutcome, UpstreamError> {
        let network = adapter.network();
        let amount = match transfer.amount(adapter.config().decimals) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!(network = %network, hash = %transfer.hash, error = %e, "Skipping transfer");
                return Ok(TransferOutcome::Unmatched);
            }
        };

        for intent in self.store.list_open_intents_for_network(network).await {
            if intent.status != PaymentStatus::Pending
                || !within_tolerance(amount, intent.expected_amount)
            {
                continue;
            }
            let Some(_guard) = self.locks.try_acquire(intent.id) else {
                tracing::debug!(intent = %intent.id, "Intent busy, trying next");
                continue;
            };

            let validation = adapter
                .validate_transfer(
                    &transfer.hash,
                    intent.expected_amount,
                    &intent.destination_address,
                )
                .await?;
            match classify(validation, intent.required_confirmations) {
                Ok((status, validated)) => {
                    if self.apply_observation(intent.id, status, &validated).await {
                        return Ok(if status == PaymentStatus::Confirmed {
                            TransferOutcome::Confirmed(intent.id)
                        } else {
                            TransferOutcome::Processing(intent.id)
                        });
                    }
                }
                Err(reason) => {
                    tracing::debug!(
                        network = %network,
                        hash = %transfer.hash,
                        reason = %reason,
                        "Transfer rejected"
                    );
                    return Ok(TransferOutcome::Rejected(reason));
                }
            }
        }

        tracing::debug!(
            network = %network,
            hash = %transfer.hash,
            amount = %amount,
            "Transfer matched no open intent"
        );
        Ok(TransferOutcome::Unmatched)
    }

    /// Re-validates `processing` intents against their recorded transfer.
    async fn recheck_processing(&self, adapter: &dyn ChainAdapter, report: &mut NetworkReport) {
        let network = adapter.network();
        for intent in self.store.list_open_intents_for_network(network).await {
            if intent.status != PaymentStatus::Processing {
                continue;
            }
            let Some(hash) = intent.observed_transaction_hash.as_deref() else {
                continue;
            };
            let Some(_guard) = self.locks.try_acquire(intent.id) else {
                continue;
            };
            let validation = match adapter
                .validate_transfer(hash, intent.expected_amount, &intent.destination_address)
                .await
            {
                Ok(validation) => validation,
                Err(e) => {
                    tracing::warn!(intent = %intent.id, hash, error = %e, "Failed to recheck transfer");
                    continue;
                }
            };
            match classify(validation, intent.required_confirmations) {
                Ok((status, validated)) => {
                    if self.apply_observation(intent.id, status, &validated).await {
                        if status == PaymentStatus::Confirmed {
                            report.confirmed += 1;
                        } else {
                            report.processing += 1;
                        }
                    }
                }
                Err(reason) => {
                    tracing::warn!(
                        intent = %intent.id,
                        hash,
                        reason = %reason,
                        "Previously matched transfer no longer validates"
                    );
                }
            }
        }
    }

    async fn apply_observation(
        &self,
        id: Uuid,
        status: PaymentStatus,
        validated: &ValidatedTransfer,
    ) -> bool {
        let transfer = &validated.transfer;
        let update = IntentUpdate::new()
            .with_transfer(
                transfer.hash.clone(),
                validated.confirmations,
                transfer.block_number,
            )
            .with_metadata("observedAmount", validated.amount.to_string())
            .with_metadata("sender", transfer.from.clone());
        let outcome = self.store.transition_status(id, status, update).await;
        if outcome.is_applied() {
            tracing::info!(
                intent = %id,
                hash = %transfer.hash,
                confirmations = validated.confirmations,
                status = %status,
                "Matched transfer to payment intent"
            );
        }
        outcome.is_applied()
    }

    /// Wallet balance and pending intent total for every network.
    pub async fn network_balances(&self) -> Vec<NetworkBalance> {
        let mut balances = Vec::with_capacity(self.adapters.len());
        for adapter in self.adapters.iter() {
            let network = adapter.network();
            let wallet = &adapter.config().wallet_address;
            let (balance, error) = match adapter.get_balance(wallet).await {
                Ok(balance) => (Some(balance), None),
                Err(e) => {
                    tracing::warn!(network = %network, wallet = %wallet, error = %e, "Failed to fetch wallet balance");
                    (None, Some(e.to_string()))
                }
            };
            balances.push(NetworkBalance {
                network,
                balance,
                pending_amount: self.store.pending_amount(network).await,
                last_updated: self.store.clock().now(),
                error,
            });
        }
        balances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{dec, test_registry, test_store};
    use crate::testing::ScriptedAdapter;
    use crate::timestamp::ManualClock;

    struct Harness {
        store: Arc<IntentStore>,
        clock: Arc<ManualClock>,
        tron: Arc<ScriptedAdapter>,
        eth: Arc<ScriptedAdapter>,
        engine: ReconciliationEngine,
    }

    async fn harness() -> Harness {
        let (store, clock) = test_store();
        let registry = test_registry();
        let tron = Arc::new(ScriptedAdapter::new(
            registry.get(Network::Trc20).unwrap().clone(),
            1000,
        ));
        let eth = Arc::new(ScriptedAdapter::new(
            registry.get(Network::Erc20).unwrap().clone(),
            5000,
        ));
        let adapters = AdapterRegistry::new()
            .with_adapter(Arc::clone(&tron) as Arc<dyn ChainAdapter>)
            .with_adapter(Arc::clone(&eth) as Arc<dyn ChainAdapter>);
        let engine = ReconciliationEngine::new(Arc::clone(&store), adapters, IntentLocks::new());
        engine.initialize().await;
        Harness {
            store,
            clock,
            tron,
            eth,
            engine,
        }
    }

    #[tokio::test]
    async fn test_final_transfer_confirms_intent() {
        let h = harness().await;
        let intent = h.store.create_intent("u", dec("100"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("tx1", "100000000", 1005);
        h.tron.set_height(1016);
        let report = h.engine.reconcile_all().await;

        assert_eq!(report.networks[0].confirmed, 1);
        let stored = h.store.get_intent(intent.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Confirmed);
        assert_eq!(stored.observed_transaction_hash.as_deref(), Some("tx1"));
        assert_eq!(stored.observed_confirmations, Some(12));
        assert_eq!(stored.observed_block_number, Some(1005));
        assert_eq!(stored.metadata["observedAmount"], "100");
    }

    #[tokio::test]
    async fn test_shallow_transfer_goes_processing_then_confirmed() {
        let h = harness().await;
        let intent = h.store.create_intent("u", dec("50"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("tx1", "50000000", 1005);
        h.tron.set_height(1010);
        h.engine.reconcile_all().await;
        let stored = h.store.get_intent(intent.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Processing);
        assert_eq!(stored.observed_confirmations, Some(6));

        h.tron.set_height(1014);
        h.engine.reconcile_all().await;
        let stored = h.store.get_intent(intent.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Processing);
        assert_eq!(stored.observed_confirmations, Some(10));

        h.tron.set_height(1016);
        let report = h.engine.reconcile_all().await;
        assert_eq!(report.networks[0].confirmed, 1);
        assert_eq!(
            h.store.get_intent(intent.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_confirmation_boundary_one_short_stays_processing() {
        let h = harness().await;
        let intent = h.store.create_intent("u", dec("10"), Network::Trc20).await.unwrap();
        h.tron.push_transfer("tx1", "10000000", 1005);
        h.tron.set_height(1015); // 11 confirmations
        h.engine.reconcile_all().await;
        assert_eq!(
            h.store.get_intent(intent.id).await.unwrap().status,
            PaymentStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_amount_tolerance_when_matching() {
        let h = harness().await;
        let close = h.store.create_intent("u", dec("100"), Network::Trc20).await.unwrap();
        let far = h.store.create_intent("u", dec("200"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("close", "100009000", 1001);
        h.tron.push_transfer("far", "200020000", 1001);
        h.tron.set_height(1100);
        let report = h.engine.reconcile_all().await;

        assert_eq!(report.networks[0].confirmed, 1);
        assert_eq!(report.networks[0].unmatched, 1);
        assert_eq!(
            h.store.get_intent(close.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );
        assert_eq!(
            h.store.get_intent(far.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_colliding_amounts_first_intent_wins() {
        let h = harness().await;
        let older = h.store.create_intent("a", dec("50"), Network::Trc20).await.unwrap();
        h.clock.advance(1);
        let newer = h.store.create_intent("b", dec("50"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("tx1", "50000000", 1001);
        h.tron.set_height(1100);
        h.engine.reconcile_all().await;

        assert_eq!(
            h.store.get_intent(older.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );
        assert_eq!(
            h.store.get_intent(newer.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_rescanning_same_transfers_is_noop() {
        let h = harness().await;
        let a = h.store.create_intent("a", dec("50"), Network::Trc20).await.unwrap();
        let b = h.store.create_intent("b", dec("50"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("tx1", "50000000", 1001);
        h.tron.set_height(1100);
        h.engine.reconcile_all().await;

        // Forget the checked block so the same transfer is listed again.
        h.engine.last_checked.lock().await.insert(Network::Trc20, 0);
        h.tron.set_height(1101);
        let report = h.engine.reconcile_all().await;

        assert_eq!(report.networks[0].candidates, 0);
        assert_eq!(
            h.store.get_intent(a.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );
        assert_eq!(
            h.store.get_intent(b.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_transfers_before_start_and_failed_are_ignored() {
        let h = harness().await;
        let intent = h.store.create_intent("u", dec("10"), Network::Trc20).await.unwrap();

        h.tron.push_transfer("old", "10000000", 999);
        let mut failed = BlockchainTransfer {
            hash: "failed".into(),
            from: "s".into(),
            to: "TWallet".into(),
            raw_value: "10000000".into(),
            block_number: 1002,
            timestamp_millis: 0,
            status: TransferStatus::Failed,
            confirmations: 0,
        };
        h.tron.push(failed.clone());
        failed.hash = "pending".into();
        failed.status = TransferStatus::Pending;
        h.tron.push(failed);
        h.tron.set_height(1100);

        let report = h.engine.reconcile_all().await;
        assert_eq!(report.networks[0].candidates, 0);
        assert_eq!(
            h.store.get_intent(intent.id).await.unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unchanged_height_skips_network() {
        let h = harness().await;
        h.store.create_intent("u", dec("10"), Network::Trc20).await.unwrap();
        h.tron.push_transfer("tx1", "10000000", 1000);
        let report = h.engine.reconcile_all().await;
        assert!(report.networks[0].skipped);
        assert_eq!(h.tron.lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_network_does_not_block_others() {
        let h = harness().await;
        let tron_intent = h.store.create_intent("u", dec("10"), Network::Trc20).await.unwrap();
        let eth_intent = h.store.create_intent("u", dec("20"), Network::Erc20).await.unwrap();

        h.tron.push_transfer("t1", "10000000", 1001);
        h.tron.set_height(1100);
        h.tron.set_failing(true);
        h.eth.push_transfer("e1", "20000000", 5001);
        h.eth.set_height(5100);

        let report = h.engine.reconcile_all().await;
        assert!(report.networks[0].error.is_some());
        assert_eq!(report.networks[1].confirmed, 1);
        assert_eq!(
            h.store.get_intent(tron_intent.id).await.unwrap().status,
            PaymentStatus::Pending
        );
        assert_eq!(
            h.store.get_intent(eth_intent.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );

        h.tron.set_failing(false);
        h.engine.reconcile_all().await;
        assert_eq!(
            h.store.get_intent(tron_intent.id).await.unwrap().status,
            PaymentStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_initialize_failure_starts_from_zero() {
        let h = harness().await;
        h.tron.set_failing(true);
        h.engine.initialize().await;
        let blocks = h.engine.last_checked_blocks().await;
        assert_eq!(blocks[&Network::Trc20], 0);
        assert_eq!(blocks[&Network::Erc20], 5000);
    }

    #[tokio::test]
    async fn test_expired_intent_does_not_claim_late_transfer() {
        let h = harness().await;
        let intent = h.store.create_intent("u", dec("100"), Network::Trc20).await.unwrap();
        h.clock.advance(31 * 60);

        h.tron.push_transfer("late", "100000000", 1001);
        h.tron.set_height(1100);
        let report = h.engine.reconcile_all().await;

        assert_eq!(report.expired, 1);
        assert_eq!(
            h.store.get_intent(intent.id).await.unwrap().status,
            PaymentStatus::Expired
        );
        assert!(!h.store.is_transaction_claimed(Network::Trc20, "late").await);
    }

    #[tokio::test]
    async fn test_network_balances_report_pending_and_errors() {
        let h = harness().await;
        h.store.create_intent("u", dec("10"), Network::Trc20).await.unwrap();
        h.store.create_intent("u", dec("15"), Network::Trc20).await.unwrap();
        h.eth.set_failing(true);

        let balances = h.engine.network_balances().await;
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].network, Network::Trc20);
        assert_eq!(balances[0].balance, Some(Decimal::from(1234)));
        assert_eq!(balances[0].pending_amount, dec("25"));
        assert_eq!(balances[1].balance, None);
        assert!(balances[1].error.is_some());
    }
}
