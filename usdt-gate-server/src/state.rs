//! Wiring of the pipeline components shared by all handlers.

use std::sync::Arc;

use usdt_gate::guard::IntentLocks;
use usdt_gate::ledger::InMemoryLedger;
use usdt_gate::reconcile::ReconciliationEngine;
use usdt_gate::scheduler::Scheduler;
use usdt_gate::settlement::{SettlementProcessor, SettlementSink};
use usdt_gate::{AdapterRegistry, IntentStore};

/// Shared application state for the HTTP API.
pub type AppState = Arc<Gateway>;

/// The running pipeline: store, engine, settlement, scheduler and ledger.
#[derive(Debug)]
pub struct Gateway {
    store: Arc<IntentStore>,
    engine: Arc<ReconciliationEngine>,
    settlement: Arc<SettlementProcessor>,
    scheduler: Arc<Scheduler>,
    ledger: Arc<InMemoryLedger>,
}

impl Gateway {
    /// Wires the pipeline around `store`, crediting `ledger`.
    ///
    /// The poll interval comes from the store's settings. The engine and the
    /// settlement step share one set of in-flight guards.
    #[must_use]
    pub fn new(
        store: Arc<IntentStore>,
        adapters: AdapterRegistry,
        ledger: Arc<InMemoryLedger>,
    ) -> Self {
        let locks = IntentLocks::new();
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            adapters,
            locks.clone(),
        ));
        let settlement = Arc::new(SettlementProcessor::new(
            Arc::clone(&store),
            Arc::clone(&ledger) as Arc<dyn SettlementSink>,
            locks,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&engine),
            Arc::clone(&settlement),
            Arc::clone(&store),
            store.settings().poll_interval(),
        ));
        Self {
            store,
            engine,
            settlement,
            scheduler,
            ledger,
        }
    }

    /// The intent store.
    #[must_use]
    pub const fn store(&self) -> &Arc<IntentStore> {
        &self.store
    }

    /// The reconciliation engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// The settlement step.
    #[must_use]
    pub const fn settlement(&self) -> &Arc<SettlementProcessor> {
        &self.settlement
    }

    /// The background poller.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The user ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<InMemoryLedger> {
        &self.ledger
    }
}
