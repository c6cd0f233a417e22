//! Active objects: one worker thread, one inbox, one timer queue.
//!
//! An active object owns its state exclusively. Other threads only ever
//! [`push`](Mailbox::push) messages into its [`SafeQueue`]; the worker thread
//! is the only one that touches the behavior and the timers, so behavior code
//! is written as if it were single-threaded.
//!
//! Each iteration of the run loop waits for "the next message or the next
//! timer, whichever comes first". On every wakeup the due timers are fired
//! first and only then is a received message handed to
//! [`ActiveBehavior::process`]. Timers therefore never starve under a steady
//! stream of messages.
//!
//! An object with no armed timers blocks until a message arrives. For purely
//! reactive objects that is the expected idle state, not a hang.

use core::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::ThreadConfig;
use crate::error::StrandResult;
use crate::queue::SafeQueue;
use crate::timer::{TimerId, TimerQueue};
use crate::trace::{self, TraceHook, TraceRecord};
use crate::worker::Worker;

/// Lifecycle of an active object's run loop.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Running the `initialize` hook.
    Initializing,
    /// Parked on the inbox, possibly with a timer deadline.
    Waiting,
    /// Firing timers or processing a message.
    Processing,
    /// The loop has exited; the thread is joinable.
    Stopped,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunState::Initializing,
            1 => RunState::Waiting,
            2 => RunState::Processing,
            _ => RunState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunState::Initializing => 0,
            RunState::Waiting => 1,
            RunState::Processing => 2,
            RunState::Stopped => 3,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => write!(f, "Initializing"),
            RunState::Waiting => write!(f, "Waiting"),
            RunState::Processing => write!(f, "Processing"),
            RunState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Default)]
struct RunStateCell(AtomicU8);

impl RunStateCell {
    fn set(&self, state: RunState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Cloneable handle for posting messages to an active object.
pub struct Mailbox<M> {
    queue: Arc<SafeQueue<M>>,
}

impl<M> Mailbox<M> {
    /// A mailbox over a fresh queue that no worker consumes yet.
    pub fn new() -> Self {
        Self::from_queue(Arc::new(SafeQueue::new()))
    }

    pub fn from_queue(queue: Arc<SafeQueue<M>>) -> Self {
        Self { queue }
    }

    /// Enqueues a message. Never blocks; callable from any thread.
    pub fn push(&self, msg: M) {
        self.queue.push(msg);
    }

    /// Interrupts the worker's wait without delivering a message.
    pub fn wake(&self) {
        self.queue.signal();
    }

    /// Number of messages waiting to be processed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queue(&self) -> &SafeQueue<M> {
        &self.queue
    }
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<M> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Worker-side context handed to every behavior hook.
pub struct ActiveContext<M> {
    name: Arc<str>,
    mailbox: Mailbox<M>,
    timers: TimerQueue,
    trace: Option<TraceHook>,
    stopping: bool,
}

impl<M: Send + 'static> ActiveContext<M> {
    pub(crate) fn new(name: Arc<str>, mailbox: Mailbox<M>, trace: Option<TraceHook>) -> Self {
        Self {
            name,
            mailbox,
            timers: TimerQueue::new(),
            trace,
            stopping: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts a message to this object's own inbox.
    pub fn push(&self, msg: M) {
        self.mailbox.push(msg);
    }

    pub fn mailbox(&self) -> Mailbox<M> {
        self.mailbox.clone()
    }

    /// Runs `callback` on this worker thread once `delay` has elapsed.
    pub fn add_timer<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        let name = Arc::clone(&self.name);
        let hook = self.trace.clone();
        let slot = Arc::new(AtomicTimerId::default());
        let fired_id = Arc::clone(&slot);
        let id = self.timers.add_after(delay, move |_| {
            let id = fired_id.load();
            trace::emit(&hook, || TraceRecord::TimerFired {
                object: name.to_string(),
                id,
            });
            callback();
        });
        slot.store(id);
        self.note_armed(id);
        id
    }

    /// Posts `msg` to this object's own inbox once `delay` has elapsed.
    pub fn add_timer_message(&mut self, delay: Duration, msg: M) -> TimerId {
        let mailbox = self.mailbox.clone();
        self.add_timer(delay, move || mailbox.push(msg))
    }

    /// Best-effort cancellation; `false` means the timer may already have fired.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        let pending = self.timers.cancel(id);
        trace::emit(&self.trace, || TraceRecord::TimerCancelled {
            object: self.name.to_string(),
            id,
            pending,
        });
        pending
    }

    /// Number of armed, uncancelled timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Asks the run loop to exit after the current hook returns.
    pub fn stop(&mut self) {
        self.stopping = true;
        self.mailbox.wake();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub(crate) fn timers_mut(&mut self) -> &mut TimerQueue {
        &mut self.timers
    }

    /// Forwards a record to the installed trace hook, if any.
    pub fn emit_trace(&self, record: TraceRecord) {
        trace::emit(&self.trace, || record);
    }

    fn note_armed(&self, id: TimerId) {
        log::trace!("{}: armed {id}", self.name);
        trace::emit(&self.trace, || TraceRecord::TimerArmed {
            object: self.name.to_string(),
            id,
        });
    }
}

/// Id cell filled in after `TimerQueue::add` returns, read when the timer fires.
#[derive(Default)]
struct AtomicTimerId(std::sync::atomic::AtomicU64);

impl AtomicTimerId {
    fn store(&self, id: TimerId) {
        self.0.store(id.0, Ordering::Relaxed);
    }

    fn load(&self) -> TimerId {
        TimerId(self.0.load(Ordering::Relaxed))
    }
}

/// Behavior run by an active object's worker thread.
pub trait ActiveBehavior: Send + 'static {
    type Message: Send + 'static;

    /// Runs once on the worker thread before the first wait.
    fn initialize(&mut self, _ctx: &mut ActiveContext<Self::Message>) {}

    /// Handles one message. `ControlFlow::Break` stops the run loop.
    ///
    /// Must not block: blocking here stalls the whole object, timers included.
    fn process(
        &mut self,
        ctx: &mut ActiveContext<Self::Message>,
        msg: Self::Message,
    ) -> ControlFlow<()>;

    /// Runs once on the worker thread after the loop exits, before pending
    /// timers are discarded.
    fn shutdown(&mut self, _ctx: &mut ActiveContext<Self::Message>) {}
}

/// Handle to a running active object.
pub struct ActiveObject<M> {
    mailbox: Mailbox<M>,
    run_state: Arc<RunStateCell>,
    worker: Worker,
}

impl<M: Send + 'static> ActiveObject<M> {
    /// Spawns `behavior` on a new worker thread named `"active"`.
    pub fn spawn<B>(behavior: B) -> StrandResult<Self>
    where
        B: ActiveBehavior<Message = M>,
    {
        ActiveObjectBuilder::new().spawn(behavior)
    }

    pub fn spawn_with_config<B>(config: ThreadConfig, behavior: B) -> StrandResult<Self>
    where
        B: ActiveBehavior<Message = M>,
    {
        ActiveObjectBuilder::new().config(config).spawn(behavior)
    }

    /// Enqueues a message. Never blocks; callable from any thread.
    pub fn push(&self, msg: M) {
        self.mailbox.push(msg);
    }

    pub fn mailbox(&self) -> Mailbox<M> {
        self.mailbox.clone()
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    pub fn state(&self) -> RunState {
        self.run_state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Blocks until the worker thread has terminated.
    ///
    /// The loop only ends when the behavior stops itself, so joining an
    /// object that never does blocks forever.
    pub fn join(&mut self) -> StrandResult<()> {
        self.worker.join()
    }
}

impl ActiveObject<()> {
    /// Starts an [`ActiveObjectBuilder`]. The message type is fixed later by
    /// the behavior passed to [`ActiveObjectBuilder::spawn`].
    pub fn builder() -> ActiveObjectBuilder {
        ActiveObjectBuilder::new()
    }
}

impl<M> fmt::Debug for ActiveObject<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveObject")
            .field("name", &self.worker.name())
            .field("state", &self.run_state.get())
            .finish()
    }
}

/// Builder for active objects with a custom thread configuration or trace hook.
pub struct ActiveObjectBuilder {
    config: ThreadConfig,
    trace: Option<TraceHook>,
}

impl ActiveObjectBuilder {
    pub fn new() -> Self {
        Self {
            config: ThreadConfig::named("active"),
            trace: None,
        }
    }

    pub fn config(mut self, config: ThreadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn spawn<B: ActiveBehavior>(self, behavior: B) -> StrandResult<ActiveObject<B::Message>> {
        let name: Arc<str> = Arc::from(self.config.name.as_str());
        let mailbox = Mailbox::new();
        let run_state = Arc::new(RunStateCell::default());
        let ctx = ActiveContext::new(name, mailbox.clone(), self.trace);
        let worker_state = Arc::clone(&run_state);
        let worker = Worker::spawn(&self.config, move || run(behavior, ctx, &worker_state))?;
        Ok(ActiveObject {
            mailbox,
            run_state,
            worker,
        })
    }
}

impl Default for ActiveObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the object stopped even if the behavior unwinds.
struct StopGuard<'a>(&'a RunStateCell);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.set(RunState::Stopped);
    }
}

fn run<B: ActiveBehavior>(mut behavior: B, mut ctx: ActiveContext<B::Message>, run_state: &RunStateCell) {
    let _guard = StopGuard(run_state);
    let queue = Arc::clone(&ctx.mailbox.queue);
    trace::emit(&ctx.trace, || TraceRecord::Started {
        object: ctx.name.to_string(),
    });
    behavior.initialize(&mut ctx);

    while !ctx.stopping {
        run_state.set(RunState::Waiting);
        let msg = match ctx.timers.next_deadline() {
            None => {
                log::trace!("{}: no timers, waiting for a message", ctx.name);
                queue.wait_pop()
            }
            Some(deadline) => queue.try_pop_until(deadline),
        };

        run_state.set(RunState::Processing);
        let fired = ctx.timers.update();
        if fired > 0 {
            log::trace!("{}: fired {fired} timer(s)", ctx.name);
        }

        if let Some(msg) = msg {
            if behavior.process(&mut ctx, msg).is_break() {
                break;
            }
        }
    }

    log::debug!("{}: stopping", ctx.name);
    behavior.shutdown(&mut ctx);
    ctx.timers.drain();
    trace::emit(&ctx.trace, || TraceRecord::Stopped {
        object: ctx.name.to_string(),
    });
}
