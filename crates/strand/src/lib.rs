//! # strand
//!
//! Active objects and flat state machines on plain OS threads.
//! Every object owns one worker thread, one inbox and one timer queue; other
//! threads communicate with it only by pushing messages, so handler code runs
//! to completion without locks.
//!
//! ## Module Overview
//! - [`event`]     – Closed, copyable event sets and exhaustive visitation.
//! - [`queue`]     – Blocking FIFO with deadline and wake support.
//! - [`timer`]     – Deadline-ordered one-shot timers.
//! - [`active`]    – Active objects and their run loop.
//! - [`fsm`]       – Flat state machines, passive or running on an active object.
//! - [`pubsub`]    – Fan-out channels with a dedicated delivery thread.
//! - [`broadcast`] – Source-polling fan-out and reader/writer pumps.
//! - [`work`]      – Single-threaded work queues with graceful shutdown.
//! - [`trace`]     – Optional structured trace records.
//! - [`config`]    – Worker thread configuration.
//! - [`error`]     – Errors around spawning and joining workers.

pub mod active;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod event;
pub mod fsm;
pub mod pubsub;
pub mod queue;
pub mod timer;
pub mod trace;
pub mod work;
mod worker;

pub use active::{ActiveBehavior, ActiveContext, ActiveObject, ActiveObjectBuilder, Mailbox, RunState};
pub use broadcast::{Broadcaster, Connector};
pub use config::{ThreadConfig, ThreadConfigBuilder};
pub use error::{StrandError, StrandResult};
pub use event::{Alternative, EventVariant, Handler};
pub use fsm::{ActiveStateMachine, Fsm, FsmContext, Reaction, StateMachine};
pub use pubsub::{Discard, KeepLast, PubSub, Topic};
pub use queue::SafeQueue;
pub use timer::{TimerId, TimerQueue};
pub use trace::{TraceHook, TraceRecord};
pub use work::WorkQueue;

#[cfg(test)]
mod tests;
