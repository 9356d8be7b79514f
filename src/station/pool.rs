//! Per-category pump pool with exclusive reservations.
//!
//! # Correctness Invariants
//!
//! - **Partition**: every pump is in exactly one of {free, busy}; moves between
//!   them happen under the category lock.
//! - **Ownership**: a reserved pump is moved out of the pool into its
//!   [`Reservation`], so only the holder can withdraw from it.
//! - **Leak-free**: `Reservation` is RAII; dropping it without completing
//!   still returns the pump to the free set and wakes waiters.
//! - **No spinning**: waiters block on a condvar signalled at release time and
//!   re-validate after every wake, since capacity only ever falls.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::pump::{Pump, PumpId, PumpSnapshot, PumpState};
use crate::error::{self, StationError};
use crate::models::FuelType;

/// What to do when no free pump can serve a request but a busy one could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationPolicy {
    /// Block until the busy pump is released, then re-run selection.
    #[default]
    WaitForBusy,
    /// Reject immediately. Lower throughput: a request that a busy pump could
    /// have served after its current withdrawal is turned away.
    NeverWait,
}

/// Why a reservation could not be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unavailable {
    /// No pump, free or busy, will hold the amount.
    NoCapacity,
    /// A busy pump qualified but the deadline passed first.
    TimedOut,
}

/// A pump currently held by an in-flight withdrawal.
#[derive(Debug)]
struct BusyPump {
    /// View taken when the pump was reserved.
    view: PumpSnapshot,
    in_flight: f64,
}

impl BusyPump {
    /// Capacity the pump will have once its holder releases it.
    fn remaining_after(&self) -> f64 {
        self.view.remaining - self.in_flight
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Ordered by pump id so selection is deterministic.
    free: Vec<Pump>,
    busy: Vec<BusyPump>,
}

impl PoolState {
    fn insert_free(&mut self, pump: Pump) {
        let idx = self
            .free
            .binary_search_by_key(&pump.id(), Pump::id)
            .unwrap_or_else(|idx| idx);
        self.free.insert(idx, pump);
    }
}

/// All pumps of one category, guarded by a single mutex/condvar pair.
#[derive(Debug)]
pub(crate) struct CategoryPool {
    category: FuelType,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl CategoryPool {
    pub(crate) fn new(category: FuelType) -> Self {
        Self {
            category,
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
        }
    }

    /// Lock state with poison recovery.
    ///
    /// Every transition under this lock is a single push/remove, so the
    /// partition stays intact even if a holder panicked. Release runs from
    /// Drop and must not panic.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, pump: Pump) {
        debug_assert_eq!(pump.category(), self.category);
        self.lock().insert_free(pump);
        // A new pump may satisfy someone already waiting.
        self.released.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        let state = self.lock();
        state.free.len() + state.busy.len()
    }

    /// Snapshot of free and busy pumps, taken under one lock acquisition.
    pub(crate) fn snapshot(&self) -> Vec<PumpSnapshot> {
        let state = self.lock();
        let mut pumps: Vec<PumpSnapshot> = state
            .free
            .iter()
            .map(|p| p.snapshot(PumpState::Free))
            .chain(state.busy.iter().map(|b| b.view.clone()))
            .collect();
        pumps.sort_by_key(|p| p.id);
        pumps
    }

    /// Reserve a pump holding at least `amount` litres.
    ///
    /// Scans the free set first (lowest id wins). If nothing is free, looks for
    /// a busy pump that will still hold `amount` after its in-flight withdrawal;
    /// with none, the rejection is final. Otherwise waits for a release (or
    /// rejects, under [`AllocationPolicy::NeverWait`]) and starts over.
    pub(crate) fn reserve(
        &self,
        amount: f64,
        policy: AllocationPolicy,
        deadline: Option<Instant>,
    ) -> Result<Reservation<'_>, Unavailable> {
        let mut state = self.lock();
        loop {
            if let Some(idx) = state.free.iter().position(|p| p.can_serve(amount)) {
                let pump = state.free.remove(idx);
                state.busy.push(BusyPump {
                    view: pump.snapshot(PumpState::Busy),
                    in_flight: amount,
                });
                tracing::debug!(
                    "{}: reserved {} for {} litres ({} remaining)",
                    self.category,
                    pump.id(),
                    amount,
                    pump.remaining()
                );
                return Ok(Reservation {
                    pool: self,
                    id: pump.id(),
                    pump: Some(pump),
                });
            }

            let target = state
                .busy
                .iter()
                .find(|b| b.remaining_after() >= amount)
                .map(|b| b.view.id);
            let Some(target) = target else {
                return Err(Unavailable::NoCapacity);
            };
            if policy == AllocationPolicy::NeverWait {
                tracing::debug!(
                    "{}: {} could serve {} litres but is busy, not waiting",
                    self.category,
                    target,
                    amount
                );
                return Err(Unavailable::NoCapacity);
            }

            tracing::debug!(
                "{}: waiting for {} to serve {} litres",
                self.category,
                target,
                amount
            );
            state = match deadline {
                None => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Unavailable::TimedOut);
                    }
                    let (guard, _) = self
                        .released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
            };
        }
    }

    /// Move `pump` from busy back to free, running `on_release` first under
    /// the same lock, then wake every waiter.
    fn release(&self, pump: Pump, on_release: impl FnOnce(&Pump)) {
        let mut state = self.lock();
        on_release(&pump);
        match state.busy.iter().position(|b| b.view.id == pump.id()) {
            Some(idx) => {
                state.busy.swap_remove(idx);
            }
            None => {
                tracing::error!(
                    "{}: released {} that was not marked busy",
                    self.category,
                    pump.id()
                );
                debug_assert!(false, "released pump missing from busy set");
            }
        }
        tracing::debug!(
            "{}: released {} ({} remaining)",
            self.category,
            pump.id(),
            pump.remaining()
        );
        state.insert_free(pump);
        drop(state);
        self.released.notify_all();
    }
}

/// Exclusive claim on one pump for the duration of a withdrawal.
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    pool: &'a CategoryPool,
    id: PumpId,
    /// `None` only once `complete` or `drop` has handed the pump back.
    pump: Option<Pump>,
}

impl Reservation<'_> {
    pub(crate) fn id(&self) -> PumpId {
        self.id
    }

    /// Withdraw from the reserved pump; no other thread can observe it meanwhile.
    pub(crate) fn withdraw(&mut self, amount: f64) -> error::Result<()> {
        match self.pump.as_mut() {
            Some(pump) => pump.withdraw(amount),
            None => Err(StationError::InvariantViolation(format!(
                "{} withdrawn from after release",
                self.id
            ))),
        }
    }

    /// Hand the pump back, running `on_release` atomically with the move.
    pub(crate) fn complete(mut self, on_release: impl FnOnce(&Pump)) {
        if let Some(pump) = self.pump.take() {
            self.pool.release(pump, on_release);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            tracing::debug!("{}: reservation dropped without a sale", pump.id());
            self.pool.release(pump, |_| {});
        }
    }
}
