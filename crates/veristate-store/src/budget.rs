//! Shared response-size budget
//!
//! Two artifacts that each fit under a per-artifact threshold can still
//! jointly overflow the invocation's response. The tracker is the one piece
//! of cross-artifact shared state inside an invocation: every inline
//! placement registers its encoded size here, and placement decisions consult
//! the running total before embedding anything else.

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Slots {
    by_name: HashMap<String, u64>,
    total: u64,
}

impl Slots {
    fn recompute(&mut self) {
        self.total = self.by_name.values().sum();
    }
}

/// Tracks cumulative bytes committed to inline embedding within one invocation
///
/// The lock is held only around the bookkeeping step, never across I/O.
#[derive(Debug)]
pub struct ResponseBudgetTracker {
    ceiling: u64,
    slots: Mutex<Slots>,
}

impl ResponseBudgetTracker {
    /// Create a tracker with the given usable ceiling
    ///
    /// The ceiling should already account for structural overhead headroom
    /// below the platform's hard response limit.
    #[must_use]
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// The usable ceiling this tracker enforces
    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Current total of inline-committed bytes
    #[inline]
    #[must_use]
    pub fn total(&self) -> u64 {
        self.slots.lock().total
    }

    /// Would committing `additional` bytes push the total past the ceiling?
    #[must_use]
    pub fn would_exceed(&self, additional: u64) -> bool {
        self.slots.lock().total + additional > self.ceiling
    }

    /// Would committing `size` to `slot`, replacing its current contribution,
    /// push the total past the ceiling?
    ///
    /// Equivalent to [`ResponseBudgetTracker::would_exceed`] for a slot with
    /// no prior contribution; differs when the slot already holds an
    /// estimate that the commit would replace.
    #[must_use]
    pub fn would_exceed_for(&self, slot: &str, size: u64) -> bool {
        let slots = self.slots.lock();
        let previous = slots.by_name.get(slot).copied().unwrap_or(0);
        slots.total - previous + size > self.ceiling
    }

    /// Overwrite a slot's contribution and recompute the total
    pub fn update(&self, slot: &str, size: u64) {
        let mut slots = self.slots.lock();
        slots.by_name.insert(slot.to_string(), size);
        slots.recompute();
    }

    /// Atomically commit `size` to `slot` if the new total stays under the
    /// ceiling
    ///
    /// Returns `false` (leaving the slot untouched) when the commit would
    /// overflow. This is the check-and-update used on the inline placement
    /// path so concurrent artifacts cannot jointly slip past the ceiling.
    #[must_use]
    pub fn try_update(&self, slot: &str, size: u64) -> bool {
        let mut slots = self.slots.lock();
        let previous = slots.by_name.get(slot).copied().unwrap_or(0);
        let would_be = slots.total - previous + size;
        if would_be > self.ceiling {
            return false;
        }
        slots.by_name.insert(slot.to_string(), size);
        slots.total = would_be;
        true
    }

    /// Remove a slot's contribution (the artifact moved external)
    pub fn release(&self, slot: &str) {
        let mut slots = self.slots.lock();
        slots.by_name.remove(slot);
        slots.recompute();
    }
}
