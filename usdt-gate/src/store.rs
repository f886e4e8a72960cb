//! The authoritative record of payment intents.
//!
//! [`IntentStore`] owns every intent and enforces the status state machine
//! documented in [`crate::intent`]. It keeps three auxiliary indexes next to
//! the intents themselves:
//!
//! - creation order, for newest-first user listings and oldest-first matching
//! - open intents per network, so reconciliation never scans history
//! - transfer hashes already attached to an intent, so a transfer is claimed once
//!
//! The store is shared behind an [`Arc`] and all mutation goes through
//! [`IntentStore::transition_status`].

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::PaymentSettings;
use crate::error::ValidationError;
use crate::intent::{IntentUpdate, PaymentIntent, PaymentStatus, TransitionOutcome};
use crate::network::{Network, NetworkRegistry};
use crate::stats::PaymentStats;
use crate::timestamp::{Clock, SystemClock};

#[derive(Debug, Default)]
struct StoreState {
    intents: HashMap<Uuid, PaymentIntent>,
    order: Vec<Uuid>,
    open: HashMap<Network, Vec<Uuid>>,
    claimed: HashMap<(Network, String), Uuid>,
}

impl StoreState {
    fn in_order(&self) -> impl DoubleEndedIterator<Item = &PaymentIntent> {
        self.order.iter().filter_map(|id| self.intents.get(id))
    }

    fn close(&mut self, network: Network, id: Uuid) {
        if let Some(ids) = self.open.get_mut(&network) {
            ids.retain(|open| *open != id);
        }
    }
}

fn claim_key(network: Network, hash: &str) -> (Network, String) {
    (network, hash.to_ascii_lowercase())
}

/// In-memory intent store.
#[derive(Debug)]
pub struct IntentStore {
    networks: NetworkRegistry,
    settings: PaymentSettings,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
}

impl IntentStore {
    /// Creates a store for the given networks using the system clock.
    #[must_use]
    pub fn new(networks: NetworkRegistry, settings: PaymentSettings) -> Self {
        Self::with_clock(networks, settings, Arc::new(SystemClock))
    }

    /// Creates a store reading time from `clock`.
    #[must_use]
    pub fn with_clock(
        networks: NetworkRegistry,
        settings: PaymentSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            networks,
            settings,
            clock,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Networks intents can be created on.
    #[must_use]
    pub const fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    /// The clock the store stamps intents with.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Creates a pending intent.
    ///
    /// The destination wallet and the required confirmation depth are copied
    /// from the network config so later config changes never affect it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the user id is empty, the network is not
    /// enabled, or the amount falls outside the configured bounds.
    pub async fn create_intent(
        &self,
        user_id: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<PaymentIntent, ValidationError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        let config = self
            .networks
            .get(network)
            .ok_or(ValidationError::UnsupportedNetwork(network))?;
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        if amount < self.settings.min_amount {
            return Err(ValidationError::AmountTooSmall {
                amount,
                min: self.settings.min_amount,
            });
        }
        if amount > self.settings.max_amount {
            return Err(ValidationError::AmountTooLarge {
                amount,
                max: self.settings.max_amount,
            });
        }

        let now = self.clock.now();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            user_id: user_id.to_owned(),
            network,
            expected_amount: amount.normalize(),
            destination_address: config.wallet_address.clone(),
            status: PaymentStatus::Pending,
            required_confirmations: config.min_confirmations,
            observed_transaction_hash: None,
            observed_confirmations: None,
            observed_block_number: None,
            created_at: now,
            updated_at: now,
            expires_at: now + self.settings.intent_ttl_secs,
            completed_at: None,
            metadata: serde_json::Map::new(),
        };

        let mut state = self.state.write().await;
        state.order.push(intent.id);
        state.open.entry(network).or_default().push(intent.id);
        state.intents.insert(intent.id, intent.clone());
        drop(state);

        tracing::info!(
            intent = %intent.id,
            user = %intent.user_id,
            network = %network,
            amount = %intent.expected_amount,
            "Created payment intent"
        );
        Ok(intent)
    }

    /// Looks up an intent by id.
    pub async fn get_intent(&self, id: Uuid) -> Option<PaymentIntent> {
        self.state.read().await.intents.get(&id).cloned()
    }

    /// Lists a user's intents, newest first.
    pub async fn list_intents_for_user(&self, user_id: &str) -> Vec<PaymentIntent> {
        let state = self.state.read().await;
        state
            .in_order()
            .rev()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Lists the open (`pending` or `processing`) intents of a network,
    /// oldest first.
    pub async fn list_open_intents_for_network(&self, network: Network) -> Vec<PaymentIntent> {
        let state = self.state.read().await;
        state
            .open
            .get(&network)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.intents.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lists every intent currently in `status`, oldest first.
    pub async fn list_by_status(&self, status: PaymentStatus) -> Vec<PaymentIntent> {
        let state = self.state.read().await;
        state
            .in_order()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }

    /// Returns the intent a transfer hash is attached to, if any.
    pub async fn claimant(&self, network: Network, hash: &str) -> Option<Uuid> {
        self.state
            .read()
            .await
            .claimed
            .get(&claim_key(network, hash))
            .copied()
    }

    /// Returns `true` if a transfer hash is already attached to an intent.
    pub async fn is_transaction_claimed(&self, network: Network, hash: &str) -> bool {
        self.claimant(network, hash).await.is_some()
    }

    /// Moves an intent to `to`, applying `update` if the move is allowed.
    ///
    /// Refused when the state machine forbids the move, when an open intent
    /// is past its expiry and `to` is anything but `expired`, or when the
    /// update carries a transfer hash another intent already holds. Refusals
    /// are logged and leave the intent untouched.
    ///
    /// Terminal targets stamp `completed_at`. Metadata keys in `update`
    /// overwrite existing keys of the same name.
    pub async fn transition_status(
        &self,
        id: Uuid,
        to: PaymentStatus,
        update: IntentUpdate,
    ) -> TransitionOutcome {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let Some(current) = state.intents.get(&id) else {
            return TransitionOutcome::NotFound;
        };
        let from = current.status;
        let network = current.network;

        if !from.can_transition_to(to) {
            tracing::warn!(intent = %id, %from, %to, "Refused status transition");
            return TransitionOutcome::Refused { from, to };
        }
        if from.is_open() && to != PaymentStatus::Expired && current.is_past_expiry(now) {
            tracing::warn!(intent = %id, %from, %to, "Refused transition of expired intent");
            return TransitionOutcome::Refused { from, to };
        }
        if let Some(hash) = update.transaction_hash.as_deref() {
            if let Some(&by) = state.claimed.get(&claim_key(network, hash)) {
                if by != id {
                    tracing::warn!(intent = %id, claimed_by = %by, hash, "Transfer already claimed");
                    return TransitionOutcome::HashClaimed { by };
                }
            }
        }

        if let Some(hash) = update.transaction_hash.as_deref() {
            state.claimed.insert(claim_key(network, hash), id);
        }
        if !to.is_open() {
            state.close(network, id);
        }

        let Some(intent) = state.intents.get_mut(&id) else {
            return TransitionOutcome::NotFound;
        };
        intent.status = to;
        intent.updated_at = now;
        if update.transaction_hash.is_some() {
            intent.observed_transaction_hash = update.transaction_hash;
        }
        if update.confirmations.is_some() {
            intent.observed_confirmations = update.confirmations;
        }
        if update.block_number.is_some() {
            intent.observed_block_number = update.block_number;
        }
        intent.metadata.extend(update.metadata);
        if to.is_terminal() {
            intent.completed_at = Some(now);
        }

        tracing::debug!(intent = %id, %from, %to, "Applied status transition");
        TransitionOutcome::Applied
    }

    /// Cancels an open intent.
    pub async fn cancel_intent(&self, id: Uuid) -> TransitionOutcome {
        let update = IntentUpdate::new().with_metadata(
            "cancelledAt",
            Value::String(self.clock.now().to_string()),
        );
        self.transition_status(id, PaymentStatus::Cancelled, update)
            .await
    }

    /// Moves every open intent past its expiry to `expired`.
    ///
    /// Returns the number of intents expired. Running it twice in a row
    /// expires nothing the second time.
    pub async fn expire_stale(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let stale: Vec<(Network, Uuid)> = state
            .open
            .iter()
            .flat_map(|(network, ids)| ids.iter().map(move |id| (*network, *id)))
            .filter(|(_, id)| {
                state
                    .intents
                    .get(id)
                    .is_some_and(|i| i.status.is_open() && i.is_past_expiry(now))
            })
            .collect();

        for (network, id) in &stale {
            state.close(*network, *id);
            if let Some(intent) = state.intents.get_mut(id) {
                intent.status = PaymentStatus::Expired;
                intent.updated_at = now;
                intent.completed_at = Some(now);
            }
        }
        drop(state);

        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Expired stale payment intents");
        }
        stale.len()
    }

    /// Returns every intent in creation order.
    pub async fn snapshot(&self) -> Vec<PaymentIntent> {
        self.state.read().await.in_order().cloned().collect()
    }

    /// Computes aggregate statistics over every intent.
    pub async fn stats(&self) -> PaymentStats {
        let state = self.state.read().await;
        PaymentStats::collect(state.in_order())
    }

    /// Sum of expected amounts of a network's open intents.
    pub async fn pending_amount(&self, network: Network) -> Decimal {
        self.list_open_intents_for_network(network)
            .await
            .iter()
            .map(|i| i.expected_amount)
            .sum()
    }
}
