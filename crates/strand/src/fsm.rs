//! Finite state machines driven by closed event sets.
//!
//! A machine is an ordinary struct implementing [`StateMachine`]. Its states
//! are a separate enum ([`StateMachine::State`]) owned by the driver, so every
//! machine instance has its own current state and several instances of the
//! same machine type run independently.
//!
//! Handlers receive an [`FsmContext`] through which they request transitions,
//! arm and cancel timers, post events to themselves and ask to quit. A
//! requested transition runs to completion as soon as the handler returns and
//! before the next event is dispatched:
//!
//! 1. `exit` of the current state,
//! 2. the transition action, if any,
//! 3. the new state replaces the old one,
//! 4. `entry` of the new state.
//!
//! [`Fsm`] drives a machine on the caller's thread. [`ActiveStateMachine`]
//! gives the machine its own worker thread, inbox and timer queue.

use core::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::active::{ActiveBehavior, ActiveContext, ActiveObject, ActiveObjectBuilder, Mailbox, RunState};
use crate::config::ThreadConfig;
use crate::error::StrandResult;
use crate::event::EventVariant;
use crate::timer::TimerId;
use crate::trace::{TraceHook, TraceRecord};

/// Upper bound on transitions chained from `entry`/`exit` within one step.
const MAX_TRANSITION_CHAIN: usize = 32;

/// Outcome of [`StateMachine::react`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The current state dealt with the event.
    Handled,
    /// Fall back to [`StateMachine::unhandled`].
    Unhandled,
}

/// Application state machine.
pub trait StateMachine: Send + Sized + 'static {
    type Event: EventVariant;
    type State: fmt::Debug + Send + 'static;

    /// State entered when the machine starts.
    fn initial_state(&mut self) -> Self::State;

    fn entry(&mut self, _state: &mut Self::State, _ctx: &mut FsmContext<'_, Self>) {}

    fn exit(&mut self, _state: &mut Self::State, _ctx: &mut FsmContext<'_, Self>) {}

    /// Reacts to `event` in `state`.
    fn react(
        &mut self,
        state: &mut Self::State,
        event: &Self::Event,
        ctx: &mut FsmContext<'_, Self>,
    ) -> Reaction;

    /// Machine-wide default for events the current state leaves unhandled.
    fn unhandled(
        &mut self,
        state: &Self::State,
        event: &Self::Event,
        _ctx: &mut FsmContext<'_, Self>,
    ) {
        log::trace!("{state:?}: ignoring {}", event.alternative_name());
    }

    /// Name used in log lines and trace records.
    fn state_name(&self, state: &Self::State) -> String {
        format!("{state:?}")
    }
}

type Action<M> = Box<dyn FnOnce(&mut M)>;

/// A pending move to `target`.
pub struct Transition<M: StateMachine> {
    target: M::State,
    action: Option<Action<M>>,
}

impl<M: StateMachine> Transition<M> {
    pub fn target(&self) -> &M::State {
        &self.target
    }
}

impl<M: StateMachine> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("target", &self.target)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// Capabilities available to state handlers during one run-to-completion step.
pub struct FsmContext<'a, M: StateMachine> {
    active: &'a mut ActiveContext<M::Event>,
    transition: Option<Transition<M>>,
    quit: bool,
}

impl<'a, M: StateMachine> FsmContext<'a, M> {
    fn new(active: &'a mut ActiveContext<M::Event>) -> Self {
        Self {
            active,
            transition: None,
            quit: false,
        }
    }

    pub fn name(&self) -> &str {
        self.active.name()
    }

    /// Requests a transition to `target` once the current handler returns.
    ///
    /// A later request in the same handler replaces an earlier one.
    pub fn transit(&mut self, target: M::State) {
        self.transition = Some(Transition {
            target,
            action: None,
        });
    }

    /// Like [`transit`](Self::transit), running `action` between the old
    /// state's `exit` and the new state's `entry`.
    pub fn transit_with<A>(&mut self, target: M::State, action: A)
    where
        A: FnOnce(&mut M) + 'static,
    {
        self.transition = Some(Transition {
            target,
            action: Some(Box::new(action)),
        });
    }

    /// Guarded transition. `guard` is evaluated now; when it is false nothing
    /// happens and the event still counts as handled. Returns the guard value.
    pub fn transit_if<A, G>(&mut self, target: M::State, action: A, guard: G) -> bool
    where
        A: FnOnce(&mut M) + 'static,
        G: FnOnce() -> bool,
    {
        let pass = guard();
        if pass {
            self.transit_with(target, action);
        }
        pass
    }

    pub fn pending_transition(&self) -> Option<&Transition<M>> {
        self.transition.as_ref()
    }

    /// Posts `event` back to this machine once `delay` has elapsed.
    pub fn add_timer(&mut self, delay: Duration, event: impl Into<M::Event>) -> TimerId {
        self.active.add_timer_message(delay, event.into())
    }

    /// Runs an arbitrary callback on the machine's thread once `delay` has elapsed.
    pub fn add_timer_fn<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.active.add_timer(delay, callback)
    }

    /// Best-effort cancellation; `false` means the timer may already have fired.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.active.cancel_timer(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.active.pending_timers()
    }

    /// Posts `event` to this machine's own inbox.
    pub fn push(&self, event: impl Into<M::Event>) {
        self.active.push(event.into());
    }

    pub fn mailbox(&self) -> Mailbox<M::Event> {
        self.active.mailbox()
    }

    /// Stops the machine after the current step.
    pub fn quit(&mut self) {
        self.quit = true;
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }
}

/// Machine plus its current state, shared by both drivers.
struct FsmCore<M: StateMachine> {
    machine: M,
    state: Option<M::State>,
    quitting: bool,
}

impl<M: StateMachine> FsmCore<M> {
    fn new(machine: M) -> Self {
        Self {
            machine,
            state: None,
            quitting: false,
        }
    }

    fn start(&mut self, active: &mut ActiveContext<M::Event>) -> ControlFlow<()> {
        if self.state.is_some() {
            return ControlFlow::Continue(());
        }
        let mut ctx = FsmContext::new(active);
        let state = self.state.insert(self.machine.initial_state());
        let name = self.machine.state_name(state);
        log::debug!("{}: starting in {name}", ctx.name());
        ctx.active.emit_trace(TraceRecord::StateEntry {
            object: ctx.name().to_owned(),
            state: name,
        });
        self.machine.entry(state, &mut ctx);
        self.settle(ctx)
    }

    fn dispatch(&mut self, active: &mut ActiveContext<M::Event>, event: M::Event) -> ControlFlow<()> {
        if self.quitting {
            return ControlFlow::Break(());
        }
        let Some(state) = self.state.as_mut() else {
            log::warn!("{}: event before start, dropping", active.name());
            return ControlFlow::Continue(());
        };
        active.emit_trace(TraceRecord::Dispatched {
            object: active.name().to_owned(),
            discriminant: event.discriminant(),
        });
        let mut ctx = FsmContext::new(active);
        if self.machine.react(state, &event, &mut ctx) == Reaction::Unhandled {
            self.machine.unhandled(state, &event, &mut ctx);
        }
        self.settle(ctx)
    }

    /// Applies pending transitions, including ones requested by `entry`/`exit`.
    fn settle(&mut self, mut ctx: FsmContext<'_, M>) -> ControlFlow<()> {
        let mut chained = 0;
        while let Some(transition) = ctx.transition.take() {
            if chained == MAX_TRANSITION_CHAIN {
                log::error!(
                    "{}: more than {MAX_TRANSITION_CHAIN} chained transitions, dropping {transition:?}",
                    ctx.name()
                );
                break;
            }
            chained += 1;
            self.apply(transition, &mut ctx);
        }
        if ctx.quit {
            self.quitting = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn apply(&mut self, transition: Transition<M>, ctx: &mut FsmContext<'_, M>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let from = self.machine.state_name(state);
        self.machine.exit(state, ctx);
        ctx.active.emit_trace(TraceRecord::StateExit {
            object: ctx.name().to_owned(),
            state: from.clone(),
        });

        if let Some(action) = transition.action {
            action(&mut self.machine);
        }

        *state = transition.target;
        let to = self.machine.state_name(state);
        log::debug!("{}: {from} -> {to}", ctx.name());
        ctx.active.emit_trace(TraceRecord::StateEntry {
            object: ctx.name().to_owned(),
            state: to,
        });
        self.machine.entry(state, ctx);
    }
}

/// Drives a machine on the caller's thread.
///
/// Events posted by handlers and by expired timers are queued and processed
/// by [`run_pending`](Self::run_pending) and [`update_timers`](Self::update_timers).
pub struct Fsm<M: StateMachine> {
    core: FsmCore<M>,
    ctx: ActiveContext<M::Event>,
}

impl<M: StateMachine> Fsm<M> {
    pub fn new(machine: M) -> Self {
        Self::with_name("fsm", machine)
    }

    pub fn with_name(name: &str, machine: M) -> Self {
        Self::build(name, None, machine)
    }

    pub fn with_trace_hook(name: &str, hook: TraceHook, machine: M) -> Self {
        Self::build(name, Some(hook), machine)
    }

    fn build(name: &str, hook: Option<TraceHook>, machine: M) -> Self {
        Self {
            core: FsmCore::new(machine),
            ctx: ActiveContext::new(Arc::from(name), Mailbox::new(), hook),
        }
    }

    /// Enters the initial state. Calling it again has no effect.
    pub fn start(&mut self) {
        // Quitting is tracked by the core; no run loop needs waking.
        let _ = self.core.start(&mut self.ctx);
    }

    /// Dispatches one event and completes any transition it requests.
    /// Events arriving after the machine quit are dropped.
    pub fn dispatch(&mut self, event: impl Into<M::Event>) {
        if self.core.quitting {
            log::trace!("{}: quit, dropping event", self.ctx.name());
            return;
        }
        let _ = self.core.dispatch(&mut self.ctx, event.into());
    }

    /// Dispatches events posted to the machine's own inbox until it is empty
    /// or the machine quits. Returns the number of events dispatched.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while !self.core.quitting {
            let Some(event) = self.ctx.mailbox().queue().try_pop() else {
                break;
            };
            self.dispatch(event);
            count += 1;
        }
        count
    }

    /// Fires due timers, then runs the events they posted.
    pub fn update_timers(&mut self) -> usize {
        self.ctx.timers_mut().update();
        self.run_pending()
    }

    /// Deadline of the earliest armed timer.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.ctx.timers_mut().next_deadline()
    }

    /// Current state; `None` before [`start`](Self::start).
    pub fn state(&self) -> Option<&M::State> {
        self.core.state.as_ref()
    }

    pub fn machine(&self) -> &M {
        &self.core.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.core.machine
    }

    pub fn is_quitting(&self) -> bool {
        self.core.quitting
    }

    pub fn pending_timers(&self) -> usize {
        self.ctx.pending_timers()
    }

    /// Handle for posting events that [`run_pending`](Self::run_pending) will pick up.
    pub fn mailbox(&self) -> Mailbox<M::Event> {
        self.ctx.mailbox()
    }
}

/// Adapts a machine to the active object run loop.
struct FsmBehavior<M: StateMachine> {
    core: FsmCore<M>,
}

impl<M: StateMachine> ActiveBehavior for FsmBehavior<M> {
    type Message = M::Event;

    fn initialize(&mut self, ctx: &mut ActiveContext<M::Event>) {
        if self.core.start(ctx).is_break() {
            ctx.stop();
        }
    }

    fn process(&mut self, ctx: &mut ActiveContext<M::Event>, event: M::Event) -> ControlFlow<()> {
        self.core.dispatch(ctx, event)
    }
}

/// A state machine running on its own worker thread.
///
/// Events are delivered in push order; timers armed through
/// [`FsmContext::add_timer`] post their event back into the same inbox.
pub struct ActiveStateMachine<M: StateMachine> {
    object: ActiveObject<M::Event>,
    _machine: PhantomData<fn() -> M>,
}

impl<M: StateMachine> ActiveStateMachine<M> {
    pub fn spawn(machine: M) -> StrandResult<Self> {
        Self::spawn_with(ActiveObjectBuilder::new().name("fsm"), machine)
    }

    pub fn spawn_with_config(config: ThreadConfig, machine: M) -> StrandResult<Self> {
        Self::spawn_with(ActiveObjectBuilder::new().config(config), machine)
    }

    /// Spawns with a fully configured builder (name, stack size, trace hook).
    pub fn spawn_with(builder: ActiveObjectBuilder, machine: M) -> StrandResult<Self> {
        let object = builder.spawn(FsmBehavior {
            core: FsmCore::new(machine),
        })?;
        Ok(Self {
            object,
            _machine: PhantomData,
        })
    }

    /// Enqueues an event. Never blocks; callable from any thread.
    pub fn push(&self, event: impl Into<M::Event>) {
        self.object.push(event.into());
    }

    pub fn mailbox(&self) -> Mailbox<M::Event> {
        self.object.mailbox()
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn run_state(&self) -> RunState {
        self.object.state()
    }

    pub fn is_finished(&self) -> bool {
        self.object.is_finished()
    }

    /// Blocks until the machine has quit and its thread has terminated.
    pub fn join(&mut self) -> StrandResult<()> {
        self.object.join()
    }
}

impl<M: StateMachine> fmt::Debug for ActiveStateMachine<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveStateMachine")
            .field("object", &self.object)
            .finish()
    }
}
