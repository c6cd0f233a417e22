//! End-to-end scenarios for state machines running on their own threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use strand::{
    ActiveObjectBuilder, ActiveStateMachine, FsmContext, Reaction, RunState, StateMachine,
    ThreadConfig, TimerId, TraceHook, TraceRecord,
};

const PATIENCE: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy)]
pub struct Start;
#[derive(Debug, Clone, Copy)]
pub struct Stop;
#[derive(Debug, Clone, Copy)]
pub struct Poke;
#[derive(Debug, Clone, Copy)]
pub struct Quit;

strand::event_variant! {
    pub enum PumpEvent {
        Start(Start),
        Stop(Stop),
        Poke(Poke),
        Quit(Quit),
    }
}

#[derive(Debug)]
enum PumpState {
    Idle,
    Running { timeout: TimerId },
}

struct Pump {
    out: Sender<String>,
    delay: Duration,
}

impl Pump {
    fn note(&self, what: impl Into<String>) {
        let _ = self.out.send(what.into());
    }
}

impl StateMachine for Pump {
    type Event = PumpEvent;
    type State = PumpState;

    fn initial_state(&mut self) -> PumpState {
        PumpState::Idle
    }

    fn entry(&mut self, state: &mut PumpState, ctx: &mut FsmContext<'_, Self>) {
        match state {
            PumpState::Idle => self.note("entry Idle"),
            PumpState::Running { timeout } => {
                self.note("entry Running");
                let out = self.out.clone();
                *timeout = ctx.add_timer_fn(self.delay, move || {
                    let _ = out.send("timeout fired".into());
                });
            }
        }
    }

    fn exit(&mut self, state: &mut PumpState, ctx: &mut FsmContext<'_, Self>) {
        match state {
            PumpState::Idle => self.note("exit Idle"),
            PumpState::Running { timeout } => {
                let cancelled = ctx.cancel_timer(*timeout);
                self.note(format!("exit Running cancelled={cancelled}"));
            }
        }
    }

    fn react(
        &mut self,
        state: &mut PumpState,
        event: &PumpEvent,
        ctx: &mut FsmContext<'_, Self>,
    ) -> Reaction {
        match (state, event) {
            (PumpState::Idle, PumpEvent::Start(_)) => {
                ctx.transit(PumpState::Running {
                    timeout: TimerId::INVALID,
                });
                Reaction::Handled
            }
            (PumpState::Running { .. }, PumpEvent::Poke(_)) => {
                ctx.transit(PumpState::Idle);
                Reaction::Handled
            }
            (_, PumpEvent::Quit(_)) => {
                ctx.quit();
                Reaction::Handled
            }
            _ => Reaction::Unhandled,
        }
    }

    fn unhandled(&mut self, state: &PumpState, _event: &PumpEvent, _ctx: &mut FsmContext<'_, Self>) {
        self.note(format!("unhandled in {}", self.state_name(state)));
    }

    fn state_name(&self, state: &PumpState) -> String {
        match state {
            PumpState::Idle => "Idle".into(),
            PumpState::Running { .. } => "Running".into(),
        }
    }
}

fn pump(delay: Duration) -> (Pump, Receiver<String>) {
    let (out, rx) = unbounded();
    (Pump { out, delay }, rx)
}

fn expect(rx: &Receiver<String>, what: &str) {
    assert_eq!(rx.recv_timeout(PATIENCE).unwrap(), what);
}

#[test]
fn idle_running_idle_round_trip() {
    init_logging();
    let (machine, rx) = pump(Duration::from_secs(60));
    let mut fsm = ActiveStateMachine::spawn(machine).unwrap();

    fsm.push(Start);
    fsm.push(Poke);
    fsm.push(Stop);
    fsm.push(Quit);
    fsm.join().unwrap();

    let seen: Vec<String> = rx.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            "entry Idle",
            "exit Idle",
            "entry Running",
            "exit Running cancelled=true",
            "entry Idle",
            "unhandled in Idle",
        ]
    );
    assert_eq!(fsm.run_state(), RunState::Stopped);
}

#[test]
fn timer_cancelled_on_exit_never_fires() {
    init_logging();
    let (machine, rx) = pump(Duration::from_millis(100));
    let mut fsm = ActiveStateMachine::spawn_with_config(ThreadConfig::named("pump"), machine).unwrap();
    assert_eq!(fsm.name(), "pump");

    fsm.push(Start);
    expect(&rx, "entry Idle");
    expect(&rx, "exit Idle");
    expect(&rx, "entry Running");

    thread::sleep(Duration::from_millis(20));
    fsm.push(Poke);
    expect(&rx, "exit Running cancelled=true");
    expect(&rx, "entry Idle");

    assert!(rx.recv_timeout(Duration::from_millis(250)).is_err());

    fsm.push(Quit);
    fsm.join().unwrap();
    assert!(rx.try_iter().all(|line| line != "timeout fired"));
}

#[test]
fn uncancelled_timer_fires_on_the_machine_thread() {
    init_logging();
    let (machine, rx) = pump(Duration::from_millis(10));
    let mut fsm = ActiveStateMachine::spawn(machine).unwrap();

    fsm.push(Start);
    expect(&rx, "entry Idle");
    expect(&rx, "exit Idle");
    expect(&rx, "entry Running");
    expect(&rx, "timeout fired");

    fsm.push(Poke);
    expect(&rx, "exit Running cancelled=false");

    fsm.push(Quit);
    fsm.join().unwrap();
}

#[test]
fn independent_instances_keep_their_own_state() {
    init_logging();
    let (first, first_rx) = pump(Duration::from_secs(60));
    let (second, second_rx) = pump(Duration::from_secs(60));
    let mut a = ActiveStateMachine::spawn(first).unwrap();
    let mut b = ActiveStateMachine::spawn(second).unwrap();

    a.push(Start);
    expect(&first_rx, "entry Idle");
    expect(&first_rx, "exit Idle");
    expect(&first_rx, "entry Running");

    b.push(Poke);
    expect(&second_rx, "entry Idle");
    expect(&second_rx, "unhandled in Idle");

    a.push(Quit);
    b.push(Quit);
    a.join().unwrap();
    b.join().unwrap();
}

#[derive(Debug, Clone, Copy)]
pub struct Item {
    producer: u8,
    seq: u32,
}
#[derive(Debug, Clone, Copy)]
pub struct Done;

strand::event_variant! {
    pub enum SinkEvent {
        Item(Item),
        Done(Done),
    }
}

struct Sink {
    next: [u32; 4],
    done: usize,
    report: Sender<[u32; 4]>,
}

impl StateMachine for Sink {
    type Event = SinkEvent;
    type State = ();

    fn initial_state(&mut self) {}

    fn react(&mut self, _: &mut (), event: &SinkEvent, ctx: &mut FsmContext<'_, Self>) -> Reaction {
        match event {
            SinkEvent::Item(item) => {
                let expected = &mut self.next[item.producer as usize];
                assert_eq!(*expected, item.seq, "producer {} out of order", item.producer);
                *expected += 1;
            }
            SinkEvent::Done(_) => {
                self.done += 1;
                if self.done == self.next.len() {
                    let _ = self.report.send(self.next);
                    ctx.quit();
                }
            }
        }
        Reaction::Handled
    }
}

#[test]
fn concurrent_producers_keep_their_own_order() {
    init_logging();
    let (report, rx) = unbounded();
    let mut sink = ActiveStateMachine::spawn(Sink {
        next: [0; 4],
        done: 0,
        report,
    })
    .unwrap();

    let producers: Vec<_> = (0..4u8)
        .map(|producer| {
            let mailbox = sink.mailbox();
            thread::spawn(move || {
                for seq in 0..500 {
                    mailbox.push(SinkEvent::from(Item { producer, seq }));
                }
                mailbox.push(SinkEvent::from(Done));
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(rx.recv_timeout(PATIENCE).unwrap(), [500; 4]);
    sink.join().unwrap();
}

#[test]
fn trace_hook_follows_the_machine() {
    init_logging();
    let (tx, records) = unbounded();
    let hook: TraceHook = Arc::new(move |record: &TraceRecord| {
        let _ = tx.send(record.clone());
    });
    let (machine, _rx) = pump(Duration::from_secs(60));
    let builder = ActiveObjectBuilder::new().name("traced-pump").trace_hook(hook);
    let mut fsm = ActiveStateMachine::spawn_with(builder, machine).unwrap();

    fsm.push(Start);
    fsm.push(Quit);
    fsm.join().unwrap();

    let object = || "traced-pump".to_string();
    let start = PumpEvent::from(Start);
    let quit = PumpEvent::from(Quit);
    let seen: Vec<TraceRecord> = records.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            TraceRecord::Started { object: object() },
            TraceRecord::StateEntry {
                object: object(),
                state: "Idle".into(),
            },
            TraceRecord::Dispatched {
                object: object(),
                discriminant: strand::EventVariant::discriminant(&start),
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
            TraceRecord::Dispatched {
                object: object(),
                discriminant: strand::EventVariant::discriminant(&quit),
            },
            TraceRecord::Stopped { object: object() },
        ]
    );
}
