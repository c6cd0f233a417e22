//! Deferred callbacks ordered by deadline.
//!
//! A [`TimerQueue`] belongs to exactly one worker thread. Entries are kept in
//! a min-heap keyed by `(deadline, id)`, so timers with the same deadline
//! fire in the order they were added. Cancellation tombstones an entry: it
//! stays in the heap and is discarded, without running its callback, when it
//! reaches the top.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle returned when a timer is armed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Sentinel that never names a live timer.
    pub const INVALID: TimerId = TimerId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Callback run when a timer expires. It receives the owning queue so it can
/// arm or cancel further timers.
pub type TimerCallback = Box<dyn FnOnce(&mut TimerQueue) + Send + 'static>;

/// One armed timer.
pub struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    callback: TimerCallback,
}

impl TimerEntry {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Priority queue of deferred callbacks with tombstone cancellation.
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    pending: HashSet<TimerId>,
    cancelled: HashSet<TimerId>,
    /// Timers armed by callbacks while an update pass is running.
    deferred: Vec<TimerEntry>,
    updating: bool,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            deferred: Vec::new(),
            updating: false,
            next_id: TimerId::INVALID.0 + 1,
        }
    }

    /// Arms a timer that fires at `deadline`.
    pub fn add<F>(&mut self, deadline: Instant, callback: F) -> TimerId
    where
        F: FnOnce(&mut TimerQueue) + Send + 'static,
    {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let entry = TimerEntry {
            id,
            deadline,
            callback: Box::new(callback),
        };
        if self.updating {
            self.deferred.push(entry);
        } else {
            self.heap.push(entry);
        }
        self.pending.insert(id);
        log::trace!("armed {id}");
        id
    }

    /// Arms a timer that fires `delay` from now.
    pub fn add_after<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&mut TimerQueue) + Send + 'static,
    {
        self.add(Instant::now() + delay, callback)
    }

    /// Tombstones a pending timer.
    ///
    /// Returns `false` if the timer already fired, was already cancelled or
    /// never existed. A timer whose deadline has passed but which has not been
    /// popped by [`update`](Self::update) yet is still cancellable.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        if self.pending.remove(&id) {
            self.cancelled.insert(id);
            log::trace!("cancelled {id}");
            true
        } else {
            false
        }
    }

    /// Deadline of the earliest live timer.
    ///
    /// Tombstones sitting at the top of the heap are discarded first so a
    /// cancelled timer never causes a wakeup.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled_top();
        self.heap.peek().map(TimerEntry::deadline)
    }

    /// Fires every timer that is due now. See [`update_at`](Self::update_at).
    pub fn update(&mut self) -> usize {
        self.update_at(Instant::now())
    }

    /// Pops and runs every live timer with `deadline <= now`, earliest first.
    ///
    /// Timers armed by callbacks during this pass are left for the next pass,
    /// even if they are already due. Returns the number of callbacks run.
    pub fn update_at(&mut self, now: Instant) -> usize {
        self.updating = true;
        let mut fired = 0;
        loop {
            self.discard_cancelled_top();
            let due = self.heap.peek().is_some_and(|top| top.deadline <= now);
            if !due {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            self.pending.remove(&entry.id);
            log::trace!("firing {}", entry.id);
            (entry.callback)(self);
            fired += 1;
        }
        self.updating = false;
        self.merge_deferred();
        fired
    }

    /// Discards every entry without running callbacks.
    pub fn drain(&mut self) {
        self.heap.clear();
        self.deferred.clear();
        self.pending.clear();
        self.cancelled.clear();
    }

    /// Number of live (armed, not cancelled) timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn merge_deferred(&mut self) {
        for entry in self.deferred.drain(..) {
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            self.heap.push(entry);
        }
    }

    fn discard_cancelled_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            if !self.cancelled.contains(&top.id) {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                self.cancelled.remove(&entry.id);
            }
        }
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("live", &self.pending.len())
            .field("tombstoned", &self.cancelled.len())
            .finish()
    }
}
