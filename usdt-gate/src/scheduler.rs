//! Periodic driver for the pipeline.
//!
//! One cycle is: reconcile every network, settle confirmed intents, expire
//! stale ones. [`Scheduler::start`] runs cycles on a fixed interval in a
//! background task until [`Scheduler::stop`] is called or the parent
//! [`CancellationToken`] fires. Cycles never overlap; a cycle requested while
//! another is running is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::network::Network;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::settlement::{SettlementProcessor, SettlementSummary};
use crate::store::IntentStore;

/// Result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Reconciliation results.
    pub reconcile: ReconcileReport,
    /// Settlement results.
    pub settlement: SettlementSummary,
    /// Intents expired by the final sweep.
    pub expired: usize,
}

/// Poller state for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    /// `true` while the background task runs.
    pub running: bool,
    /// Last checked block per network.
    pub last_checked_blocks: BTreeMap<Network, u64>,
}

/// Runs reconciliation and settlement on an interval.
#[derive(Debug)]
pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    settlement: Arc<SettlementProcessor>,
    store: Arc<IntentStore>,
    interval: Duration,
    running: AtomicBool,
    cycle: Mutex<()>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        settlement: Arc<SettlementProcessor>,
        store: Arc<IntentStore>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            settlement,
            store,
            interval,
            running: AtomicBool::new(false),
            cycle: Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    /// Returns `true` while the background task runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the background task. Returns `false` if it is already running.
    ///
    /// The task first records every network's current height as checked,
    /// then runs a cycle on each tick of the interval.
    pub async fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> bool {
        let mut task = self.task.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let token = shutdown.child_token();
        let this = Arc::clone(self);
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            this.engine.initialize().await;
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        this.run_cycle().await;
                    }
                }
            }
            this.running.store(false, Ordering::SeqCst);
            tracing::info!("Payment tracker stopped");
        });
        *task = Some((token, handle));
        tracing::info!(interval_secs = self.interval.as_secs(), "Payment tracker started");
        true
    }

    /// Stops the background task and waits for it to finish the current cycle.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.task.lock().await.take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Payment tracker task panicked");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one cycle now. Returns `None` if a cycle is already in progress.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("Cycle already in progress, skipping");
            return None;
        };
        let reconcile = self.engine.reconcile_all().await;
        let settlement = self.settlement.settle_confirmed().await;
        let expired = self.store.expire_stale().await;
        Some(CycleReport {
            reconcile,
            settlement,
            expired,
        })
    }

    /// Runs one cycle immediately, regardless of the interval.
    pub async fn force_check(&self) -> Option<CycleReport> {
        tracing::info!("Forced payment check");
        self.run_cycle().await
    }

    /// Current poller state.
    pub async fn status(&self) -> TrackerStatus {
        TrackerStatus {
            running: self.is_running(),
            last_checked_blocks: self.engine.last_checked_blocks().await,
        }
    }
}
