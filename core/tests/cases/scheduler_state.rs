use std::cell::RefCell;
use std::rc::Rc;

use crate::common::{Recorder, Seen, TestHarness};
use wsim_core::components::LinearMobility;
use wsim_core::{Callback, EventKind, NodeState, Position, SchedulerState, SimConfig, SimError, StopReason};

#[test]
fn test_state_machine_idle_to_stopped() {
    let mut h = TestHarness::new();
    assert_eq!(h.sim.state(), SchedulerState::Idle);
    assert_eq!(h.sim.now(), 0);

    h.add_recorder(1, 5);
    assert!(h.sim.step().unwrap());
    assert_eq!(h.sim.state(), SchedulerState::Running);
    assert_eq!(h.sim.now(), 5);

    let report = h.run();
    assert_eq!(report.reason, StopReason::QueueExhausted);
    assert_eq!(h.sim.state(), SchedulerState::Stopped);

    // Then: a stopped scheduler rejects new work
    assert_eq!(h.sim.add_event(10, EventKind::Quit).unwrap_err(), SimError::AlreadyStopped);
    assert_eq!(h.sim.step().unwrap_err(), SimError::AlreadyStopped);
    assert_eq!(h.run(), report, "a second run reports the first one");
}

#[test]
fn test_past_deadline_and_same_instant() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 100);
    h.ctx().schedule(200, 1, None, Callback::new(2)).unwrap();

    assert!(h.sim.step().unwrap());
    assert_eq!(h.sim.now(), 100);

    // Given: now == 100, an event at 50 is time travel
    let err = h.sim.add_event(50, EventKind::Milestone).unwrap_err();
    assert_eq!(err, SimError::PastDeadline { requested: 50, now: 100 });

    // An event at exactly now runs before the next timestamp
    let journal = Rc::clone(&h.journal);
    h.ctx()
        .schedule_hook(100, move |ctx| {
            journal.borrow_mut().push(Seen::Callback {
                clock: ctx.now(),
                node: 0,
                tag: 100,
            });
            Ok(())
        })
        .unwrap();

    h.run();
    assert_eq!(
        h.seen(),
        vec![
            Seen::Birth { clock: 100, node: 1 },
            Seen::Callback { clock: 100, node: 0, tag: 100 },
            Seen::Callback { clock: 200, node: 1, tag: 2 },
        ]
    );
}

#[test]
fn test_beyond_simulation_end_is_rejected() {
    let mut h = TestHarness::with_config(SimConfig::default().with_trace().with_end(1_000));
    assert_eq!(
        h.sim.add_event(1_001, EventKind::Milestone).unwrap_err(),
        SimError::BeyondSimulationEnd {
            requested: 1_001,
            end: 1_000
        }
    );
    assert!(h.sim.add_event(1_000, EventKind::Milestone).is_ok());

    let report = h.run();
    assert_eq!(report.reason, StopReason::Quit);
    assert_eq!(report.clock, 1_000);
    assert_eq!(h.labels(), vec!["milestone", "quit"]);
}

#[test]
fn test_unknown_callback_target() {
    let mut h = TestHarness::new();
    let err = h.ctx().schedule(5, 42, None, Callback::new(0)).unwrap_err();
    assert_eq!(err, SimError::UnknownNode(42));
}

#[test]
fn test_callback_to_dead_node_is_dropped() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 0);
    h.add_recorder(2, 0);
    h.ctx().schedule(10, 2, Some(1), Callback::new(1)).unwrap();
    h.ctx().schedule(10, 1, Some(2), Callback::new(2)).unwrap();
    h.ctx()
        .schedule_hook(5, |ctx| {
            assert!(ctx.kill(2));
            assert!(!ctx.kill(2), "already dead");
            Ok(())
        })
        .unwrap();

    h.run();

    assert_eq!(h.sim.context().node_state(2), Some(NodeState::Dead));
    assert_eq!(h.seen().last(), Some(&Seen::Callback { clock: 10, node: 1, tag: 2 }));
    assert!(!h.seen().contains(&Seen::Callback { clock: 10, node: 2, tag: 1 }));
    assert_eq!(h.count("callback"), 2, "the dropped callback is still dispatched");
}

#[test]
fn test_callback_before_birth_is_dropped() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 50);
    h.ctx().schedule(10, 1, None, Callback::new(1)).unwrap();

    h.run();

    assert_eq!(h.seen(), vec![Seen::Birth { clock: 50, node: 1 }]);
}

#[test]
fn test_moving_simulation_end_while_running() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 0);
    h.ctx().schedule(15, 1, None, Callback::new(15)).unwrap();
    h.ctx().schedule(30, 1, None, Callback::new(30)).unwrap();
    h.ctx().schedule_hook(10, |ctx| ctx.set_simulation_end(20)).unwrap();

    let report = h.run();

    assert_eq!(report.reason, StopReason::Quit);
    assert_eq!(report.clock, 20);
    assert_eq!(h.sim.context().simulation_end(), Some(20));
    assert_eq!(h.seen().last(), Some(&Seen::Callback { clock: 15, node: 1, tag: 15 }));
}

#[test]
fn test_handler_error_aborts_run() {
    let mut h = TestHarness::with_config(SimConfig::default().with_end(100));
    h.add_recorder(1, 0);
    h.ctx().schedule_hook(7, |_| Err(SimError::model("boom"))).unwrap();
    h.ctx().schedule(9, 1, None, Callback::new(1)).unwrap();

    let report = h.run();

    assert_eq!(report.reason, StopReason::Aborted(SimError::Model("boom".into())));
    assert_eq!(report.clock, 7);
    assert!(report.ended_early(Some(100)));
    assert_eq!(h.seen(), vec![Seen::Birth { clock: 0, node: 1 }]);
}

#[test]
fn test_event_capacity_is_enforced() {
    let mut config = SimConfig::default();
    config.event_capacity = Some(2);
    let mut h = TestHarness::with_config(config);

    h.add_recorder(1, 0);
    h.sim.add_event(5, EventKind::Milestone).unwrap();
    let err = h.sim.add_event(6, EventKind::Milestone).unwrap_err();
    assert_eq!(
        err,
        SimError::Exhausted {
            what: "event queue",
            capacity: 2
        }
    );

    // The failed insert leaves the queue usable
    let report = h.run();
    assert_eq!(report.dispatched, 2);
}

#[test]
fn test_duplicate_node_is_a_config_error() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 0);
    let journal = Rc::new(RefCell::new(Vec::new()));
    let err = h
        .sim
        .add_node(1, 0, Box::new(Recorder::new(journal)))
        .unwrap_err();
    assert!(matches!(err, SimError::Config(_)));
}

#[test]
fn test_rejected_birth_leaves_no_node() {
    let mut h = TestHarness::with_config(SimConfig::default().with_end(100));
    let recorder = Recorder::new(Rc::clone(&h.journal));
    let err = h.sim.add_node(1, 500, Box::new(recorder)).unwrap_err();
    assert_eq!(err, SimError::BeyondSimulationEnd { requested: 500, end: 100 });
    assert_eq!(h.sim.context().node_state(1), None);
    assert!(h.sim.model(1).is_none());

    // the same id is free for a valid retry
    h.add_recorder(1, 50);
    assert_eq!(h.sim.context().node_state(1), Some(NodeState::Unborn));

    h.run();
    assert_eq!(h.seen(), vec![Seen::Birth { clock: 50, node: 1 }]);
}

#[test]
fn test_rejected_mobility_leaves_no_node() {
    let mut config = SimConfig::default();
    config.event_capacity = Some(1);
    let mut h = TestHarness::with_config(config);

    // the birth takes the only slot, the first position update has none
    let walk = LinearMobility::new(Position::default(), Position::new(1.0, 0.0, 0.0)).with_updates(10);
    let recorder = Recorder::new(Rc::clone(&h.journal));
    let err = h.sim.add_mobile_node(1, 0, Box::new(recorder), Box::new(walk)).unwrap_err();
    assert!(matches!(err, SimError::Exhausted { capacity: 1, .. }));

    let ctx = h.sim.context();
    assert_eq!(ctx.node_state(1), None);
    assert_eq!(ctx.position(1), None);
    assert!(ctx.queue().is_empty());
    assert!(h.sim.model(1).is_none());

    h.add_recorder(1, 0);
    h.run();
    assert_eq!(h.seen(), vec![Seen::Birth { clock: 0, node: 1 }]);
}

#[test]
fn test_run_until_arms_end_and_milestones() {
    let config = SimConfig::default()
        .with_trace()
        .with_end(1_000)
        .with_milestones(250);
    let mut h = TestHarness::with_config(config);
    h.add_recorder(1, 0);

    h.sim.run_until(600).unwrap();
    assert_eq!(h.sim.state(), SchedulerState::Running);
    assert_eq!(h.count("milestone"), 2);

    h.sim.run_until(5_000).unwrap();

    assert_eq!(h.sim.state(), SchedulerState::Stopped);
    assert_eq!(h.count("milestone"), 4);
    assert_eq!(h.labels().last().map(String::as_str), Some("quit"));
    let report = h.sim.report().cloned().unwrap();
    assert_eq!(report.reason, StopReason::Quit);
    assert_eq!(report.clock, 1_000);
}
