//! Aggregate payment statistics.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::intent::{PaymentIntent, PaymentStatus};
use crate::network::Network;

/// Totals for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    /// Intents created on the network.
    pub count: usize,
    /// Sum of completed amounts.
    pub amount: Decimal,
    /// Completed intents as a percentage of all intents.
    pub success_rate: Decimal,
}

/// Totals across every intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    /// Intents ever created.
    pub total_payments: usize,
    /// Completed intents.
    pub completed_payments: usize,
    /// Sum of completed amounts.
    pub total_amount: Decimal,
    /// Completed intents as a percentage of all intents, two decimals.
    pub success_rate: Decimal,
    /// Mean completed amount, two decimals.
    pub average_amount: Decimal,
    /// Breakdown per network.
    pub by_network: BTreeMap<Network, NetworkStats>,
}

fn percentage(part: usize, whole: usize) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole)).round_dp(2)
}

impl PaymentStats {
    /// Computes statistics over `intents`.
    pub fn collect<'a>(intents: impl IntoIterator<Item = &'a PaymentIntent>) -> Self {
        let mut stats = Self::default();
        let mut completed_by_network: BTreeMap<Network, usize> = BTreeMap::new();

        for intent in intents {
            stats.total_payments += 1;
            let entry = stats.by_network.entry(intent.network).or_default();
            entry.count += 1;
            if intent.status == PaymentStatus::Completed {
                stats.completed_payments += 1;
                stats.total_amount += intent.expected_amount;
                entry.amount += intent.expected_amount;
                *completed_by_network.entry(intent.network).or_default() += 1;
            }
        }

        for (network, entry) in &mut stats.by_network {
            let completed = completed_by_network.get(network).copied().unwrap_or(0);
            entry.success_rate = percentage(completed, entry.count);
        }
        stats.success_rate = percentage(stats.completed_payments, stats.total_payments);
        if stats.completed_payments > 0 {
            stats.average_amount =
                (stats.total_amount / Decimal::from(stats.completed_payments)).round_dp(2);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentUpdate;
    use crate::store::tests::{dec, test_store};

    #[test]
    fn test_empty_stats_are_zero() {
        let stats = PaymentStats::collect(std::iter::empty());
        assert_eq!(stats, PaymentStats::default());
    }

    #[tokio::test]
    async fn test_stats_count_only_completed_amounts() {
        let (store, _) = test_store();
        let a = store.create_intent("u", dec("100"), Network::Trc20).await.unwrap();
        let b = store.create_intent("u", dec("50"), Network::Trc20).await.unwrap();
        store.create_intent("u", dec("30"), Network::Erc20).await.unwrap();

        for id in [a.id, b.id] {
            store
                .transition_status(id, PaymentStatus::Confirmed, IntentUpdate::new())
                .await;
        }
        store
            .transition_status(a.id, PaymentStatus::Completed, IntentUpdate::new())
            .await;
        store
            .transition_status(b.id, PaymentStatus::Failed, IntentUpdate::new())
            .await;

        let stats = store.stats().await;
        assert_eq!(stats.total_payments, 3);
        assert_eq!(stats.completed_payments, 1);
        assert_eq!(stats.total_amount, dec("100"));
        assert_eq!(stats.average_amount, dec("100"));
        assert_eq!(stats.success_rate, dec("33.33"));

        let trc = &stats.by_network[&Network::Trc20];
        assert_eq!(trc.count, 2);
        assert_eq!(trc.amount, dec("100"));
        assert_eq!(trc.success_rate, dec("50"));
        assert_eq!(stats.by_network[&Network::Erc20].success_rate, Decimal::ZERO);
    }
}
