// SPDX-License-Identifier: MPL-2.0
//! The suspend/wake abstraction `set_lock` blocks on.
//!
//! spec.md §9 calls out the sleep/wakeup primitive as an external
//! collaborator the core must not hard-code; it should instead consume a
//! capability: "park until signalled on this channel, interruptibly" and
//! "signal everyone parked on this channel". This module defines that
//! capability as a trait, with a real thread-blocking implementation for
//! production use and a non-blocking one for single-threaded tests.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::arena::LockId;

/// Result of waking from `Parker::park`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkResult {
    /// Woken because the blocker released or shrank (normal retry path).
    Woken,
    /// Woken because of an (externally delivered) interruption. The caller
    /// must splice itself out of the blocker's queue and surface EINTR.
    Interrupted,
}

/// A wait channel is the identity of the request that is sleeping on it —
/// the same record that is, at the same time, linked onto some other
/// record's `blocked_queue`.
pub trait Parker: Send + Sync {
    /// Block the calling thread until `unpark_all` or `interrupt` is called
    /// for this channel.
    fn park(&self, channel: LockId) -> ParkResult;

    /// Wake every waiter currently parked on `channel`. Never blocks.
    fn unpark_all(&self, channel: LockId);

    /// Simulate delivery of an interrupting signal to whoever is parked on
    /// `channel`. Stands in for the host scheduler's signal delivery, which
    /// is out of scope for this core (spec.md §1).
    fn interrupt(&self, channel: LockId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Pending,
    Woken,
    Interrupted,
}

struct Slot {
    state: Mutex<Signal>,
    cond: Condvar,
}

/// Thread-blocking `Parker` backed by a per-channel `Condvar`, the same
/// pattern the teacher's flock implementation uses: pair a lock with its
/// own wait queue and wake it with `notify_all` on release.
#[derive(Default)]
pub struct StdParker {
    slots: Mutex<HashMap<LockId, Arc<Slot>>>,
}

impl StdParker {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, channel: LockId) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(channel)
            .or_insert_with(|| {
                Arc::new(Slot {
                    state: Mutex::new(Signal::Pending),
                    cond: Condvar::new(),
                })
            })
            .clone()
    }
}

impl Parker for StdParker {
    fn park(&self, channel: LockId) -> ParkResult {
        let slot = self.slot_for(channel);
        let mut state = slot.state.lock().unwrap();
        while *state == Signal::Pending {
            state = slot.cond.wait(state).unwrap();
        }
        let result = match *state {
            Signal::Woken => ParkResult::Woken,
            Signal::Interrupted => ParkResult::Interrupted,
            Signal::Pending => unreachable!("wait loop only exits once a signal is set"),
        };
        drop(state);
        self.slots.lock().unwrap().remove(&channel);
        result
    }

    fn unpark_all(&self, channel: LockId) {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(&channel) {
            *slot.state.lock().unwrap() = Signal::Woken;
            slot.cond.notify_all();
        }
    }

    fn interrupt(&self, channel: LockId) {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(&channel) {
            *slot.state.lock().unwrap() = Signal::Interrupted;
            slot.cond.notify_all();
        }
    }
}

/// A `Parker` for single-threaded tests: `park` never actually suspends the
/// caller (there is no second thread to wake it), it just records the call
/// so property tests can assert on blocking behavior without spawning real
/// threads. Callers that use this parker are expected to only exercise
/// `set_lock` paths that do not truly need to sleep across threads.
#[derive(Default)]
pub struct DeterministicParker {
    parked: Mutex<Vec<LockId>>,
    interrupted: Mutex<Vec<LockId>>,
}

impl DeterministicParker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park_calls(&self) -> Vec<LockId> {
        self.parked.lock().unwrap().clone()
    }
}

impl Parker for DeterministicParker {
    fn park(&self, channel: LockId) -> ParkResult {
        self.parked.lock().unwrap().push(channel);
        if self
            .interrupted
            .lock()
            .unwrap()
            .iter()
            .any(|c| *c == channel)
        {
            ParkResult::Interrupted
        } else {
            ParkResult::Woken
        }
    }

    fn unpark_all(&self, _channel: LockId) {}

    fn interrupt(&self, channel: LockId) {
        self.interrupted.lock().unwrap().push(channel);
    }
}
