//! Fault tracking.
//!
//! Every lazily loaded unit (an object's attributes, one relationship of an
//! object, or a query) has a [`FaultState`]:
//!
//! ```text
//! UNFAULTED ──access──▶ PENDING ──merge committed──▶ FAULTED
//!                          │
//!                          └──────failure──────────▶ ERROR ──access──▶ PENDING
//! ```
//!
//! The first access to a unit that is not pending becomes the leader of a
//! fetch; accesses while it is pending become followers and wait for the
//! leader's outcome. At most one fetch per unit is outstanding at a time.

use crate::context::Context;
use crate::error::{FaultError, FaultResult};
use crate::query::Query;
use faultline_store::ObjectId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome delivered to every caller waiting on a fetch.
pub type FetchOutcome = FaultResult<Vec<ObjectId>>;

/// Load state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultState {
    /// Never fetched, or invalidated.
    Unfaulted,
    /// A fetch is in flight.
    Pending,
    /// The last fetch merged successfully.
    Faulted,
    /// The last fetch failed; the next access retries.
    Error,
}

/// What a fault loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultUnit {
    /// All attributes of an object.
    Attributes,
    /// One relationship of an object.
    Relationship(String),
    /// The results of a query sent with the given headers.
    ///
    /// Header names are lowercased and the pairs sorted, so contexts that
    /// differ only in header order or case share a fault.
    Query(Query, Vec<(String, String)>),
}

/// Identifies one fault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaultKey {
    /// Object the unit belongs to; `None` for queries.
    pub object: Option<ObjectId>,
    /// Unit.
    pub unit: FaultUnit,
}

impl FaultKey {
    /// Key for an object's attributes.
    pub fn attributes(object: ObjectId) -> Self {
        Self {
            object: Some(object),
            unit: FaultUnit::Attributes,
        }
    }

    /// Key for one relationship of an object.
    pub fn relationship(object: ObjectId, name: impl Into<String>) -> Self {
        Self {
            object: Some(object),
            unit: FaultUnit::Relationship(name.into()),
        }
    }

    /// Key for a query sent without context headers.
    pub fn query(query: Query) -> Self {
        Self::query_in(query, &Context::new())
    }

    /// Key for a query sent with the headers of `context`.
    ///
    /// Queries under different credentials may see different results, so
    /// they never share a fetch.
    pub fn query_in(query: Query, context: &Context) -> Self {
        let mut headers: Vec<(String, String)> = context
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        headers.sort();
        Self {
            object: None,
            unit: FaultUnit::Query(query, headers),
        }
    }
}

/// Fetch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Requests sent.
    pub dispatched: u64,
    /// Accesses that joined an in-flight fetch.
    pub coalesced: u64,
    /// Merges committed.
    pub merges: u64,
    /// Fetches that ended in ERROR.
    pub failures: u64,
    /// Accesses answered locally because a policy hook declined.
    pub policy_skips: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    coalesced: AtomicU64,
    merges: AtomicU64,
    failures: AtomicU64,
    policy_skips: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    state: FaultState,
    pending: Option<watch::Receiver<Option<FetchOutcome>>>,
}

/// Result of claiming a fault.
#[derive(Debug)]
pub enum Claim {
    /// The caller must perform the fetch and report through the completion.
    Leader(Completion, Waiter),
    /// A fetch is already in flight; wait for it.
    Follower(Waiter),
}

/// Tracks fault states and coalesces concurrent fetches.
#[derive(Debug, Default)]
pub struct FaultTracker {
    slots: Mutex<HashMap<FaultKey, Slot>>,
    counters: Counters,
}

impl FaultTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a fault for an access.
    ///
    /// A pending fault yields a follower; anything else moves to PENDING
    /// and yields a leader.
    pub fn claim(self: &Arc<Self>, key: FaultKey) -> Claim {
        let mut slots = self.slots.lock();
        if let Some(Slot {
            state: FaultState::Pending,
            pending: Some(rx),
        }) = slots.get(&key)
        {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Claim::Follower(Waiter { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.clone(),
            Slot {
                state: FaultState::Pending,
                pending: Some(rx.clone()),
            },
        );
        Claim::Leader(
            Completion {
                tracker: Arc::clone(self),
                key,
                tx,
                settled: false,
            },
            Waiter { rx },
        )
    }

    /// Current state of a fault.
    pub fn state(&self, key: &FaultKey) -> FaultState {
        self.slots
            .lock()
            .get(key)
            .map_or(FaultState::Unfaulted, |slot| slot.state)
    }

    /// Resets a fault to UNFAULTED so the next access fetches again.
    ///
    /// Pending faults are left alone. Returns true if the state changed.
    pub fn invalidate(&self, key: &FaultKey) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(key).map(|slot| slot.state) {
            Some(FaultState::Pending) | None => false,
            Some(_) => slots.remove(key).is_some(),
        }
    }

    /// Resets every settled fault of an object.
    pub fn invalidate_object(&self, id: ObjectId) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|key, slot| key.object != Some(id) || slot.state == FaultState::Pending);
        before - slots.len()
    }

    /// Marks a unit as loaded by another fetch's merge.
    ///
    /// Pending faults are left to their own fetch.
    pub fn mark_faulted(&self, key: FaultKey) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_insert(Slot {
            state: FaultState::Unfaulted,
            pending: None,
        });
        if slot.state != FaultState::Pending {
            slot.state = FaultState::Faulted;
        }
    }

    /// Snapshot of the fetch counters.
    pub fn stats(&self) -> FetchStats {
        let c = &self.counters;
        FetchStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            merges: c.merges.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            policy_skips: c.policy_skips.load(Ordering::Relaxed),
        }
    }

    /// Counts a request sent.
    pub fn record_dispatch(&self) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a committed merge.
    pub fn record_merge(&self) {
        self.counters.merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an access answered locally by policy.
    pub fn record_policy_skip(&self) {
        self.counters.policy_skips.fetch_add(1, Ordering::Relaxed);
    }

    fn settle(&self, key: &FaultKey, failed: bool) {
        if failed {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            if slot.state == FaultState::Pending {
                slot.state = if failed {
                    FaultState::Error
                } else {
                    FaultState::Faulted
                };
                slot.pending = None;
            }
        }
    }
}

/// The leader's handle for reporting a fetch outcome.
///
/// Dropping a completion without calling [`complete`](Self::complete)
/// settles the fault in ERROR with [`FaultError::Abandoned`], so a fault
/// never stays pending after its fetch task dies.
#[derive(Debug)]
pub struct Completion {
    tracker: Arc<FaultTracker>,
    key: FaultKey,
    tx: watch::Sender<Option<FetchOutcome>>,
    settled: bool,
}

impl Completion {
    /// The fault this completion settles.
    pub fn key(&self) -> &FaultKey {
        &self.key
    }

    /// Settles the fault and wakes every waiter.
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FetchOutcome) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.tracker.settle(&self.key, outcome.is_err());
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(key = ?self.key, "fetch abandoned");
            self.finish(Err(FaultError::Abandoned));
        }
    }
}

/// A caller waiting for a fetch outcome.
#[derive(Debug, Clone)]
pub struct Waiter {
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl Waiter {
    /// Waits until the fetch settles.
    pub async fn wait(mut self) -> FetchOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(FaultError::Abandoned)),
            Err(_) => Err(FaultError::Abandoned),
        }
    }
}
