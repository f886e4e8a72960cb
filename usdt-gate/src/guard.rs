//! Per-intent mutual exclusion.
//!
//! Reconciliation and settlement both mutate intents from async tasks. Before
//! touching an intent they take an [`InFlightGuard`] from the shared
//! [`IntentLocks`]; a second caller for the same id gets `None` and moves on
//! instead of waiting. The mark is cleared when the guard drops, including on
//! early return or unwinding.

use std::sync::Arc;

use dashmap::DashSet;
use uuid::Uuid;

/// Shared set of intent ids currently being worked on.
#[derive(Debug, Clone, Default)]
pub struct IntentLocks {
    in_flight: Arc<DashSet<Uuid>>,
}

impl IntentLocks {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as in flight, or returns `None` if it already is.
    #[must_use]
    pub fn try_acquire(&self, id: Uuid) -> Option<InFlightGuard> {
        self.in_flight.insert(id).then(|| InFlightGuard {
            id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Returns `true` if `id` is currently held.
    #[must_use]
    pub fn is_held(&self, id: Uuid) -> bool {
        self.in_flight.contains(&id)
    }
}

/// Holds an intent id in the in-flight set until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    id: Uuid,
    in_flight: Arc<DashSet<Uuid>>,
}

impl InFlightGuard {
    /// The guarded intent.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}
