//! Crediting confirmed payments exactly once.
//!
//! The [`SettlementSink`] is the ledger the pipeline credits; the
//! [`SettlementProcessor`] walks `confirmed` intents and drives each one to
//! `completed` or `failed`. Every credit happens under the intent's
//! in-flight guard and after re-reading its status, so two concurrent callers
//! can never both credit the same intent.
//!
//! A failed credit is final. Nothing here retries it.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DepositError, SettlementError};
use crate::guard::IntentLocks;
use crate::intent::{IntentUpdate, PaymentStatus};
use crate::store::IntentStore;

/// Proof of a successful credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReceipt {
    /// Ledger transaction id.
    pub transaction_id: String,
    /// Balance before the credit.
    pub balance_before: Decimal,
    /// Balance after the credit.
    pub balance_after: Decimal,
}

/// The ledger confirmed deposits are credited to.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    /// Credits `amount` USDT to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::UnknownUser`] if the user does not exist,
    /// or [`SettlementError::Rejected`] if the ledger refuses the credit.
    async fn credit_user_balance(
        &self,
        user_id: &str,
        amount: Decimal,
    ) -> Result<CreditReceipt, SettlementError>;
}

/// Result of settling one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SettlementOutcome {
    /// The user was credited and the intent completed.
    Completed {
        /// Ledger transaction id.
        transaction_id: String,
    },
    /// The sink refused and the intent failed.
    Failed {
        /// Why the credit was refused.
        reason: String,
    },
    /// Another task holds the intent.
    InFlight,
}

/// Counts from a settlement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    /// Intents completed.
    pub completed: usize,
    /// Intents failed.
    pub failed: usize,
    /// Intents skipped because another task held them.
    pub skipped: usize,
}

impl SettlementSummary {
    /// Intents that reached a terminal state.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

/// Drives `confirmed` intents to `completed` or `failed`.
pub struct SettlementProcessor {
    store: Arc<IntentStore>,
    sink: Arc<dyn SettlementSink>,
    locks: IntentLocks,
}

impl Debug for SettlementProcessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementProcessor")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl SettlementProcessor {
    /// Creates a processor. `locks` must be shared with the reconciliation engine.
    #[must_use]
    pub fn new(store: Arc<IntentStore>, sink: Arc<dyn SettlementSink>, locks: IntentLocks) -> Self {
        Self { store, sink, locks }
    }

    /// Settles every `confirmed` intent, oldest first.
    pub async fn settle_confirmed(&self) -> SettlementSummary {
        let mut summary = SettlementSummary::default();
        for intent in self.store.list_by_status(PaymentStatus::Confirmed).await {
            match self.settle_intent(intent.id).await {
                Ok(SettlementOutcome::Completed { .. }) => summary.completed += 1,
                Ok(SettlementOutcome::Failed { .. }) => summary.failed += 1,
                Ok(SettlementOutcome::InFlight) => summary.skipped += 1,
                // Moved on since it was listed.
                Err(e) => tracing::debug!(intent = %intent.id, error = %e, "Skipped settlement"),
            }
        }
        if summary.processed() > 0 {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                "Settled confirmed payments"
            );
        }
        summary
    }

    /// Operator re-drive: settles every `confirmed` intent and returns how
    /// many reached a terminal state.
    pub async fn process_all_confirmed(&self) -> usize {
        self.settle_confirmed().await.processed()
    }

    /// Settles one intent.
    ///
    /// # Errors
    ///
    /// Returns [`DepositError::NotFound`] for an unknown id and
    /// [`DepositError::InvalidState`] if the intent is not `confirmed`.
    pub async fn settle_intent(&self, id: Uuid) -> Result<SettlementOutcome, DepositError> {
        let Some(_guard) = self.locks.try_acquire(id) else {
            return Ok(SettlementOutcome::InFlight);
        };
        let intent = self
            .store
            .get_intent(id)
            .await
            .ok_or(DepositError::NotFound(id))?;
        if intent.status != PaymentStatus::Confirmed {
            return Err(DepositError::InvalidState {
                id,
                status: intent.status,
            });
        }

        match self
            .sink
            .credit_user_balance(&intent.user_id, intent.expected_amount)
            .await
        {
            Ok(receipt) => {
                let update = IntentUpdate::new()
                    .with_metadata("settlementTransactionId", receipt.transaction_id.clone())
                    .with_metadata("balanceBefore", receipt.balance_before.to_string())
                    .with_metadata("balanceAfter", receipt.balance_after.to_string());
                let outcome = self
                    .store
                    .transition_status(id, PaymentStatus::Completed, update)
                    .await;
                if !outcome.is_applied() {
                    tracing::error!(intent = %id, ?outcome, "Credited but failed to mark completed");
                }
                tracing::info!(
                    intent = %id,
                    user = %intent.user_id,
                    amount = %intent.expected_amount,
                    transaction = %receipt.transaction_id,
                    "Credited payment"
                );
                Ok(SettlementOutcome::Completed {
                    transaction_id: receipt.transaction_id,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(intent = %id, user = %intent.user_id, error = %e, "Settlement failed");
                let outcome = self
                    .store
                    .transition_status(
                        id,
                        PaymentStatus::Failed,
                        IntentUpdate::new().with_metadata("failureReason", reason.clone()),
                    )
                    .await;
                if !outcome.is_applied() {
                    tracing::warn!(
                        intent = %id,
                        ?outcome,
                        reason = %reason,
                        "Settlement failed but could not be recorded"
                    );
                }
                Ok(SettlementOutcome::Failed { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::network::Network;
    use crate::store::tests::{dec, test_store};

    async fn confirmed_intent(store: &IntentStore, user: &str, amount: &str) -> Uuid {
        let intent = store
            .create_intent(user, dec(amount), Network::Trc20)
            .await
            .unwrap();
        store
            .transition_status(
                intent.id,
                PaymentStatus::Confirmed,
                IntentUpdate::new().with_transfer(format!("tx-{}", intent.id), 20, 1),
            )
            .await;
        intent.id
    }

    fn processor(store: &Arc<IntentStore>, ledger: &Arc<InMemoryLedger>) -> SettlementProcessor {
        SettlementProcessor::new(
            Arc::clone(store),
            Arc::clone(ledger) as Arc<dyn SettlementSink>,
            IntentLocks::new(),
        )
    }

    #[tokio::test]
    async fn test_confirmed_intent_is_credited_once() {
        let (store, clock) = test_store();
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, clock));
        ledger.register_user("alice").await;
        let id = confirmed_intent(&store, "alice", "100").await;
        let processor = processor(&store, &ledger);

        let first = processor.settle_confirmed().await;
        assert_eq!(first.completed, 1);
        let second = processor.settle_confirmed().await;
        assert_eq!(second.processed(), 0);

        assert_eq!(ledger.balance("alice").await.unwrap().usd_balance, dec("100"));
        assert_eq!(ledger.transactions("alice").await.unwrap().len(), 1);

        let stored = store.get_intent(id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.metadata["balanceBefore"], "0");
        assert_eq!(stored.metadata["balanceAfter"], "100");
        assert!(stored.metadata.contains_key("settlementTransactionId"));
    }

    #[tokio::test]
    async fn test_unknown_user_fails_without_retry() {
        let (store, clock) = test_store();
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, clock));
        let id = confirmed_intent(&store, "ghost", "30").await;
        let processor = processor(&store, &ledger);

        let summary = processor.settle_confirmed().await;
        assert_eq!(summary.failed, 1);
        let stored = store.get_intent(id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.metadata["failureReason"], "user not found: ghost");

        // Registering the user later does not resurrect the payment.
        ledger.register_user("ghost").await;
        assert_eq!(processor.process_all_confirmed().await, 0);
        assert_eq!(ledger.balance("ghost").await.unwrap().usd_balance, Decimal::ZERO);
    }

    /// Sink that finalizes the intent itself before rejecting the credit.
    struct RacingSink {
        store: Arc<IntentStore>,
        id: std::sync::OnceLock<Uuid>,
    }

    #[async_trait]
    impl SettlementSink for RacingSink {
        async fn credit_user_balance(
            &self,
            _user_id: &str,
            _amount: Decimal,
        ) -> Result<CreditReceipt, SettlementError> {
            if let Some(id) = self.id.get() {
                self.store
                    .transition_status(*id, PaymentStatus::Completed, IntentUpdate::new())
                    .await;
            }
            Err(SettlementError::Rejected("ledger closed".into()))
        }
    }

    #[tokio::test]
    async fn test_unrecorded_failure_keeps_existing_state() {
        let (store, _clock) = test_store();
        let sink = Arc::new(RacingSink {
            store: Arc::clone(&store),
            id: std::sync::OnceLock::new(),
        });
        let processor = SettlementProcessor::new(
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn SettlementSink>,
            IntentLocks::new(),
        );
        let id = confirmed_intent(&store, "u", "10").await;
        sink.id.set(id).unwrap();

        assert_eq!(
            processor.settle_intent(id).await.unwrap(),
            SettlementOutcome::Failed {
                reason: "credit rejected: ledger closed".into()
            }
        );
        let stored = store.get_intent(id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert!(!stored.metadata.contains_key("failureReason"));
    }

    #[tokio::test]
    async fn test_settle_intent_checks_state() {
        let (store, clock) = test_store();
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, clock));
        let processor = processor(&store, &ledger);
        let pending = store
            .create_intent("u", dec("10"), Network::Trc20)
            .await
            .unwrap();

        assert!(matches!(
            processor.settle_intent(pending.id).await,
            Err(DepositError::InvalidState {
                status: PaymentStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            processor.settle_intent(Uuid::new_v4()).await,
            Err(DepositError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_held_intent_is_skipped() {
        let (store, clock) = test_store();
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, clock));
        ledger.register_user("u").await;
        let locks = IntentLocks::new();
        let processor = SettlementProcessor::new(
            Arc::clone(&store),
            Arc::clone(&ledger) as Arc<dyn SettlementSink>,
            locks.clone(),
        );
        let id = confirmed_intent(&store, "u", "10").await;

        let guard = locks.try_acquire(id).unwrap();
        assert_eq!(
            processor.settle_intent(id).await.unwrap(),
            SettlementOutcome::InFlight
        );
        drop(guard);
        assert!(matches!(
            processor.settle_intent(id).await.unwrap(),
            SettlementOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_settlement_credits_once() {
        let (store, clock) = test_store();
        let ledger = Arc::new(InMemoryLedger::new(Decimal::ONE, clock));
        ledger.register_user("u").await;
        let processor = Arc::new(processor(&store, &ledger));
        let id = confirmed_intent(&store, "u", "25").await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let processor = Arc::clone(&processor);
                tokio::spawn(async move { processor.settle_intent(id).await })
            })
            .collect();
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        assert_eq!(ledger.balance("u").await.unwrap().usd_balance, dec("25"));
        assert_eq!(ledger.transactions("u").await.unwrap().len(), 1);
    }
}
