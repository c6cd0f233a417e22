//! Blocking FIFO shared between producers and one worker thread.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    /// Wake requests not yet observed by a waiter.
    wakes: usize,
}

/// Thread-safe FIFO with unbounded, deadline-bounded and interruptible pops.
///
/// Items are delivered in push order. [`signal`](Self::signal) wakes a waiter
/// without data; the wake is remembered if nobody is parked yet, so a stop
/// request issued just before the worker starts waiting is never lost.
pub struct SafeQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> SafeQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                wakes: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends an item and wakes one blocked waiter. Never blocks on capacity.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
    }

    /// Blocks until an item is available. Wake signals do not interrupt it.
    pub fn pop(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Takes the front item if one is queued, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Blocks until an item arrives or a wake signal is delivered.
    ///
    /// Returns `None` only when woken by [`signal`](Self::signal).
    pub fn wait_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.wakes > 0 {
                state.wakes -= 1;
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Blocks until an item arrives, the deadline passes, or a wake signal is
    /// delivered.
    ///
    /// A queued item is returned immediately even if `deadline` is already in
    /// the past. Deadlines are measured on the monotonic clock.
    pub fn try_pop_until(&self, deadline: Instant) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.wakes > 0 {
                state.wakes -= 1;
                return None;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// [`try_pop_until`](Self::try_pop_until) with a relative timeout.
    pub fn try_pop_for(&self, timeout: Duration) -> Option<T> {
        self.try_pop_until(Instant::now() + timeout)
    }

    /// Delivers one wake token without pushing data.
    ///
    /// Notifies every parked thread: threads in [`pop`](Self::pop) ignore
    /// tokens and go back to waiting.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.wakes = state.wakes.saturating_add(1);
        drop(state);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Discards every queued item and pending wake.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.wakes = 0;
    }
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
