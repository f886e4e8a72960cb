//! Process-local user ledger.
//!
//! [`InMemoryLedger`] is the [`SettlementSink`] used when no external
//! trading backend is wired in. Users must be registered before they can be
//! credited; crediting an unknown user is an error, never an implicit
//! account creation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SettlementError;
use crate::settlement::{CreditReceipt, SettlementSink};
use crate::timestamp::{Clock, UnixTimestamp};

/// A user's balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLedgerBalance {
    /// Cash balance in USD.
    pub usd_balance: Decimal,
    /// Shares held.
    pub share_balance: Decimal,
    /// `usd_balance + share_balance * share_price`.
    pub total_value: Decimal,
    /// Last time any balance changed.
    pub last_updated: UnixTimestamp,
}

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Incoming USDT deposit.
    Deposit,
}

/// One ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    /// Transaction id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Kind of movement.
    pub kind: TransactionKind,
    /// Amount moved, in USD.
    pub amount: Decimal,
    /// When it happened.
    pub timestamp: UnixTimestamp,
    /// Human-readable description.
    pub description: String,
}

#[derive(Debug)]
struct Account {
    balance: UserLedgerBalance,
    transactions: Vec<LedgerTransaction>,
}

/// In-memory [`SettlementSink`].
#[derive(Debug)]
pub struct InMemoryLedger {
    share_price: Decimal,
    clock: Arc<dyn Clock>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger valuing shares at `share_price`.
    #[must_use]
    pub fn new(share_price: Decimal, clock: Arc<dyn Clock>) -> Self {
        Self {
            share_price,
            clock,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a user with zero balances. Registering twice is harmless
    /// and returns the existing balance.
    pub async fn register_user(&self, user_id: &str) -> UserLedgerBalance {
        let now = self.clock.now();
        let mut accounts = self.accounts.write().await;
        let account = accounts.entry(user_id.to_owned()).or_insert_with(|| {
            tracing::info!(user = %user_id, "Registered ledger user");
            Account {
                balance: UserLedgerBalance {
                    usd_balance: Decimal::ZERO,
                    share_balance: Decimal::ZERO,
                    total_value: Decimal::ZERO,
                    last_updated: now,
                },
                transactions: Vec::new(),
            }
        });
        account.balance.clone()
    }

    /// Returns a user's balances.
    pub async fn balance(&self, user_id: &str) -> Option<UserLedgerBalance> {
        self.accounts
            .read()
            .await
            .get(user_id)
            .map(|a| a.balance.clone())
    }

    /// Returns a user's transactions, oldest first.
    pub async fn transactions(&self, user_id: &str) -> Option<Vec<LedgerTransaction>> {
        self.accounts
            .read()
            .await
            .get(user_id)
            .map(|a| a.transactions.clone())
    }
}

#[async_trait]
impl SettlementSink for InMemoryLedger {
    async fn credit_user_balance(
        &self,
        user_id: &str,
        amount: Decimal,
    ) -> Result<CreditReceipt, SettlementError> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::Rejected(format!(
                "non-positive amount {amount}"
            )));
        }
        let now = self.clock.now();
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(user_id)
            .ok_or_else(|| SettlementError::UnknownUser(user_id.to_owned()))?;

        let before = account.balance.usd_balance;
        let after = before + amount;
        account.balance.usd_balance = after;
        account.balance.total_value = after + account.balance.share_balance * self.share_price;
        account.balance.last_updated = now;

        let transaction = LedgerTransaction {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            kind: TransactionKind::Deposit,
            amount,
            timestamp: now,
            description: format!("USDT deposit of {amount}"),
        };
        let receipt = CreditReceipt {
            transaction_id: transaction.id.clone(),
            balance_before: before,
            balance_after: after,
        };
        account.transactions.push(transaction);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::ManualClock;

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(
            Decimal::from(2),
            Arc::new(ManualClock::new(UnixTimestamp::from_secs(10))),
        )
    }

    #[tokio::test]
    async fn test_credit_updates_balance_and_history() {
        let ledger = ledger();
        ledger.register_user("u").await;
        let receipt = ledger
            .credit_user_balance("u", Decimal::from(40))
            .await
            .unwrap();
        assert_eq!(receipt.balance_before, Decimal::ZERO);
        assert_eq!(receipt.balance_after, Decimal::from(40));

        let balance = ledger.balance("u").await.unwrap();
        assert_eq!(balance.usd_balance, Decimal::from(40));
        assert_eq!(balance.total_value, Decimal::from(40));
        let history = ledger.transactions("u").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, receipt.transaction_id);
        assert_eq!(history[0].kind, TransactionKind::Deposit);
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected() {
        let ledger = ledger();
        assert_eq!(
            ledger.credit_user_balance("nobody", Decimal::ONE).await,
            Err(SettlementError::UnknownUser("nobody".into()))
        );
        assert!(ledger.balance("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let ledger = ledger();
        ledger.register_user("u").await;
        ledger
            .credit_user_balance("u", Decimal::from(5))
            .await
            .unwrap();
        let again = ledger.register_user("u").await;
        assert_eq!(again.usd_balance, Decimal::from(5));
    }

    #[tokio::test]
    async fn test_non_positive_credit_is_rejected() {
        let ledger = ledger();
        ledger.register_user("u").await;
        assert!(matches!(
            ledger.credit_user_balance("u", Decimal::ZERO).await,
            Err(SettlementError::Rejected(_))
        ));
    }
}
