use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::event::EventVariant;
use crate::fsm::{Fsm, FsmContext, Reaction, StateMachine};
use crate::timer::TimerId;
use crate::trace::{TraceHook, TraceRecord};

#[derive(Debug, Clone, Copy)]
struct Start;
#[derive(Debug, Clone, Copy)]
struct Stop;
#[derive(Debug, Clone, Copy)]
struct Timeout;
#[derive(Debug, Clone, Copy)]
struct Speed(u32);
#[derive(Debug, Clone, Copy)]
struct Quit;

crate::event_variant! {
    enum MotorEvent {
        Start(Start),
        Stop(Stop),
        Timeout(Timeout),
        Speed(Speed),
        Quit(Quit),
    }
}

#[derive(Debug, PartialEq)]
enum MotorState {
    Idle,
    Running { speed: u32, watchdog: TimerId },
    Faulted,
}

impl MotorState {
    fn running() -> Self {
        MotorState::Running {
            speed: 0,
            watchdog: TimerId::INVALID,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            MotorState::Idle => "Idle",
            MotorState::Running { .. } => "Running",
            MotorState::Faulted => "Faulted",
        }
    }
}

struct Motor {
    log: Vec<String>,
    unhandled: usize,
    limit: u32,
    watchdog: Duration,
}

impl Default for Motor {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            unhandled: 0,
            limit: 50,
            watchdog: Duration::from_millis(100),
        }
    }
}

impl StateMachine for Motor {
    type Event = MotorEvent;
    type State = MotorState;

    fn initial_state(&mut self) -> MotorState {
        MotorState::Idle
    }

    fn entry(&mut self, state: &mut MotorState, ctx: &mut FsmContext<'_, Self>) {
        self.log.push(format!("entry {}", state.label()));
        if let MotorState::Running { watchdog, .. } = state {
            *watchdog = ctx.add_timer(self.watchdog, Timeout);
        }
    }

    fn exit(&mut self, state: &mut MotorState, ctx: &mut FsmContext<'_, Self>) {
        self.log.push(format!("exit {}", state.label()));
        if let MotorState::Running { watchdog, .. } = state {
            ctx.cancel_timer(*watchdog);
        }
    }

    fn react(
        &mut self,
        state: &mut MotorState,
        event: &MotorEvent,
        ctx: &mut FsmContext<'_, Self>,
    ) -> Reaction {
        match (state, event) {
            (MotorState::Idle, MotorEvent::Start(_)) => {
                ctx.transit(MotorState::running());
                Reaction::Handled
            }
            (MotorState::Running { speed, .. }, MotorEvent::Speed(Speed(requested))) => {
                let limit = self.limit;
                let requested = *requested;
                let faulted = ctx.transit_if(
                    MotorState::Faulted,
                    |motor: &mut Motor| motor.log.push("action overspeed".into()),
                    || requested > limit,
                );
                if !faulted {
                    *speed = requested;
                }
                Reaction::Handled
            }
            (MotorState::Running { .. }, MotorEvent::Stop(_)) => {
                ctx.transit_with(MotorState::Idle, |motor: &mut Motor| {
                    motor.log.push("action stop".into())
                });
                Reaction::Handled
            }
            (MotorState::Running { .. }, MotorEvent::Timeout(_)) => {
                ctx.transit(MotorState::Faulted);
                Reaction::Handled
            }
            (_, MotorEvent::Quit(_)) => {
                ctx.quit();
                Reaction::Handled
            }
            _ => Reaction::Unhandled,
        }
    }

    fn unhandled(&mut self, _state: &MotorState, _event: &MotorEvent, _ctx: &mut FsmContext<'_, Self>) {
        self.unhandled += 1;
    }

    fn state_name(&self, state: &MotorState) -> String {
        state.label().to_owned()
    }
}

fn started(motor: Motor) -> Fsm<Motor> {
    let mut fsm = Fsm::with_name("motor", motor);
    fsm.start();
    fsm
}

#[test]
fn start_enters_initial_state_once() {
    let mut fsm = Fsm::new(Motor::default());
    assert!(fsm.state().is_none());

    fsm.start();
    fsm.start();
    assert_eq!(fsm.state(), Some(&MotorState::Idle));
    assert_eq!(fsm.machine().log, vec!["entry Idle"]);
}

#[test]
fn start_and_stop_run_exit_and_entry_once_each() {
    let mut fsm = started(Motor::default());

    fsm.dispatch(Start);
    assert_eq!(fsm.machine().log, vec!["entry Idle", "exit Idle", "entry Running"]);
    assert!(matches!(fsm.state(), Some(MotorState::Running { .. })));
    assert_eq!(fsm.pending_timers(), 1);

    fsm.machine_mut().log.clear();
    fsm.dispatch(Stop);
    assert_eq!(fsm.machine().log, vec!["exit Running", "action stop", "entry Idle"]);
    assert_eq!(fsm.state(), Some(&MotorState::Idle));
    assert_eq!(fsm.pending_timers(), 0);
}

#[test]
fn stop_while_idle_is_unhandled_without_transition() {
    let mut fsm = started(Motor::default());

    fsm.dispatch(Stop);
    assert_eq!(fsm.state(), Some(&MotorState::Idle));
    assert_eq!(fsm.machine().log, vec!["entry Idle"]);
    assert_eq!(fsm.machine().unhandled, 1);
}

#[test]
fn false_guard_keeps_state_and_true_guard_runs_action() {
    let mut fsm = started(Motor::default());
    fsm.dispatch(Start);
    fsm.machine_mut().log.clear();

    fsm.dispatch(Speed(20));
    assert!(matches!(fsm.state(), Some(MotorState::Running { speed: 20, .. })));
    assert!(fsm.machine().log.is_empty());

    fsm.dispatch(Speed(80));
    assert_eq!(fsm.state(), Some(&MotorState::Faulted));
    assert_eq!(
        fsm.machine().log,
        vec!["exit Running", "action overspeed", "entry Faulted"]
    );
    assert_eq!(fsm.pending_timers(), 0);
}

#[test]
fn quit_stops_dispatching() {
    let mut fsm = started(Motor::default());

    fsm.dispatch(Quit);
    assert!(fsm.is_quitting());

    fsm.dispatch(Start);
    assert_eq!(fsm.state(), Some(&MotorState::Idle));
    assert_eq!(fsm.machine().log, vec!["entry Idle"]);
}

#[test]
fn quitting_leaves_no_wake_tokens_behind() {
    let mut fsm = started(Motor::default());
    let mailbox = fsm.mailbox();

    fsm.dispatch(Quit);
    fsm.dispatch(Start);
    fsm.dispatch(Quit);

    let start = Instant::now();
    assert!(mailbox.queue().try_pop_until(start + Duration::from_millis(40)).is_none());
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn events_posted_to_the_mailbox_run_on_demand() {
    let mut fsm = started(Motor::default());
    let mailbox = fsm.mailbox();

    mailbox.push(MotorEvent::from(Start));
    mailbox.push(MotorEvent::from(Speed(30)));
    assert_eq!(fsm.state(), Some(&MotorState::Idle));

    assert_eq!(fsm.run_pending(), 2);
    assert!(matches!(fsm.state(), Some(MotorState::Running { speed: 30, .. })));
    assert_eq!(fsm.run_pending(), 0);
}

#[test]
fn watchdog_timer_fires_through_update() {
    let motor = Motor {
        watchdog: Duration::from_millis(5),
        ..Motor::default()
    };
    let mut fsm = started(motor);
    fsm.dispatch(Start);
    assert!(fsm.next_deadline().is_some());

    thread::sleep(Duration::from_millis(20));
    assert_eq!(fsm.update_timers(), 1);
    assert_eq!(fsm.state(), Some(&MotorState::Faulted));
    assert_eq!(fsm.next_deadline(), None);
}

#[test]
fn trace_hook_reports_transitions() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let hook: TraceHook = Arc::new(move |record: &TraceRecord| sink.lock().unwrap().push(record.clone()));

    let mut fsm = Fsm::with_trace_hook("motor", hook, Motor::default());
    fsm.start();
    fsm.dispatch(Start);

    let object = || "motor".to_string();
    let start = MotorEvent::from(Start);
    assert_eq!(
        *records.lock().unwrap(),
        vec![
            TraceRecord::StateEntry {
                object: object(),
                state: "Idle".into(),
            },
            TraceRecord::Dispatched {
                object: object(),
                discriminant: start.discriminant(),
            },
            TraceRecord::StateExit {
                object: object(),
                state: "Idle".into(),
            },
            TraceRecord::StateEntry {
                object: object(),
                state: "Running".into(),
            },
            TraceRecord::TimerArmed {
                object: object(),
                id: TimerId(1),
            },
        ]
    );
}

#[derive(Debug)]
enum Bounce {
    Left,
    Right,
}

#[derive(Default)]
struct PingPong {
    entries: usize,
}

impl StateMachine for PingPong {
    type Event = MotorEvent;
    type State = Bounce;

    fn initial_state(&mut self) -> Bounce {
        Bounce::Left
    }

    fn entry(&mut self, state: &mut Bounce, ctx: &mut FsmContext<'_, Self>) {
        self.entries += 1;
        match state {
            Bounce::Left => ctx.transit(Bounce::Right),
            Bounce::Right => ctx.transit(Bounce::Left),
        }
    }

    fn react(&mut self, _: &mut Bounce, _: &MotorEvent, _: &mut FsmContext<'_, Self>) -> Reaction {
        Reaction::Unhandled
    }
}

#[test]
fn runaway_transition_chains_are_cut_off() {
    let mut fsm = Fsm::new(PingPong::default());
    fsm.start();

    assert_eq!(fsm.machine().entries, 33);
    assert!(matches!(fsm.state(), Some(Bounce::Left)));
}
