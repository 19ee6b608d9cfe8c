//! Idempotency cache: one caller-supplied key, one outcome.
//!
//! Keys are scoped by operation type, so a payment key can never collide
//! with an escrow key. The cache stores full outcomes, success or coded
//! failure alike; a retried deny returns the same deny. Reservations make
//! the in-flight state explicit: a key is either unknown, reserved by a
//! running operation, or committed forever.

use crate::engine::Receipt;
use crate::error::{EngineError, Result};
use crate::ledger::EntryKind;
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

/// The full result a keyed operation previously produced.
pub type Outcome = std::result::Result<Receipt, EngineError>;

enum Slot {
    /// Reserved by an operation that has not committed yet.
    InFlight,
    /// Committed outcome; never overwritten.
    Done(Outcome),
}

/// Maps `(operation type, key)` to the outcome of the movement it produced.
pub struct IdempotencyCache {
    slots: Mutex<HashMap<EntryKind, HashMap<String, Slot>>>,
}

/// Result of looking up a key.
pub enum Lookup<'a> {
    /// A previously committed outcome, returned verbatim.
    Hit(Outcome),
    /// The key is fresh; the caller now owns its reservation.
    Miss(Reservation<'a>),
}

/// Exclusive claim on one `(operation type, key)` pair.
///
/// Finalize with [`Reservation::commit`]. A reservation dropped without
/// committing releases the key, so a crashed operation never turns into a
/// permanent phantom hit.
#[must_use = "an unfinalized reservation releases its key on drop"]
pub struct Reservation<'a> {
    cache: &'a IdempotencyCache,
    op: EntryKind,
    key: String,
    committed: bool,
}

impl IdempotencyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        IdempotencyCache {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a key to its committed outcome, or reserves it.
    ///
    /// If another caller currently holds the reservation, this call waits
    /// for it to commit or release before resolving. Movements are pure
    /// arithmetic under short locks, so the wait is bounded.
    pub fn get_or_reserve(&self, op: EntryKind, key: &str) -> Result<Lookup<'_>> {
        loop {
            {
                let mut slots = self.slots.lock().map_err(|_| EngineError::LockPoisoned)?;
                let scope = slots.entry(op).or_default();
                match scope.get(key) {
                    None => {
                        scope.insert(key.to_owned(), Slot::InFlight);
                        return Ok(Lookup::Miss(Reservation {
                            cache: self,
                            op,
                            key: key.to_owned(),
                            committed: false,
                        }));
                    }
                    Some(Slot::Done(outcome)) => return Ok(Lookup::Hit(outcome.clone())),
                    Some(Slot::InFlight) => {}
                }
            }
            thread::yield_now();
        }
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Reservation<'_> {
    /// Publishes the outcome under the reserved key.
    ///
    /// First write wins: a key that somehow already holds a committed
    /// outcome keeps it.
    pub fn commit(mut self, outcome: &Outcome) -> Result<()> {
        let mut slots = self
            .cache
            .slots
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?;
        let scope = slots.entry(self.op).or_default();
        match scope.get_mut(&self.key) {
            Some(slot) => {
                if matches!(slot, Slot::InFlight) {
                    *slot = Slot::Done(outcome.clone());
                }
            }
            None => {
                scope.insert(self.key.clone(), Slot::Done(outcome.clone()));
            }
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Release the key so a retry executes fresh. A poisoned cache here
        // means the process is already unwinding; nothing left to protect.
        if let Ok(mut slots) = self.cache.slots.lock() {
            if let Some(scope) = slots.get_mut(&self.op) {
                if matches!(scope.get(&self.key), Some(Slot::InFlight)) {
                    scope.remove(&self.key);
                }
            }
        }
    }
}
