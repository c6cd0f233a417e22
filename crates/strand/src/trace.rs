//! Optional structured trace records.
//!
//! Worker threads report lifecycle, transition and timer activity to a
//! [`TraceHook`] when one is installed. Hooks run synchronously on the worker
//! thread and must not block.

use std::sync::Arc;

use crate::timer::TimerId;

/// Activity reported by an active object or state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Started {
        object: String,
    },
    Stopped {
        object: String,
    },
    StateEntry {
        object: String,
        state: String,
    },
    StateExit {
        object: String,
        state: String,
    },
    TimerArmed {
        object: String,
        id: TimerId,
    },
    /// `pending` is the result returned to the caller of `cancel_timer`.
    TimerCancelled {
        object: String,
        id: TimerId,
        pending: bool,
    },
    TimerFired {
        object: String,
        id: TimerId,
    },
    Dispatched {
        object: String,
        discriminant: u8,
    },
}

pub type TraceHook = Arc<dyn Fn(&TraceRecord) + Send + Sync>;

/// Emits a record only when a hook is installed; the record is built lazily.
pub(crate) fn emit(hook: &Option<TraceHook>, record: impl FnOnce() -> TraceRecord) {
    if let Some(hook) = hook {
        hook(&record());
    }
}
