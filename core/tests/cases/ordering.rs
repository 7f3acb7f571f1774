use crate::common::{Seen, TestHarness};
use wsim_core::{Callback, EventKind, EventQueue, Slab, StopReason};

#[test]
fn test_birth_before_callback_at_same_clock() {
    let mut h = TestHarness::new();

    // Given: birth(1) queued first, then a callback, then birth(2), all at t=10
    h.add_recorder(1, 10);
    h.ctx().schedule(10, 1, None, Callback::new(7)).unwrap();
    h.add_recorder(2, 10);

    h.run();

    // Then: both births run in insertion order before the callback
    assert_eq!(
        h.seen(),
        vec![
            Seen::Birth { clock: 10, node: 1 },
            Seen::Birth { clock: 10, node: 2 },
            Seen::Callback { clock: 10, node: 1, tag: 7 },
        ]
    );
}

#[test]
fn test_quit_halts_later_events() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 100);
    h.ctx().schedule(100, 1, None, Callback::new(1)).unwrap();
    h.sim.add_event(50, EventKind::Quit).unwrap();

    let report = h.run();

    assert_eq!(report.reason, StopReason::Quit);
    assert_eq!(report.clock, 50);
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.labels(), vec!["quit"]);
    assert!(h.seen().is_empty(), "nothing after quit may run");
}

#[test]
fn test_priority_ranks_at_one_instant() {
    let mut keys = Slab::new("keys");
    let key = keys.insert(()).unwrap();
    let mut q = EventQueue::new();

    // Inserted in reverse rank order
    q.push(5, EventKind::Quit).unwrap();
    q.push(5, EventKind::Milestone).unwrap();
    q.push(5, EventKind::TxEnd { signal: key }).unwrap();
    q.push(5, EventKind::Hook(Box::new(|_| Ok(())))).unwrap();
    q.push(5, EventKind::RxBegin { reception: key }).unwrap();
    q.push(5, EventKind::RxEnd { reception: key }).unwrap();
    q.push(5, EventKind::Mobility { node: 1 }).unwrap();
    q.push(5, EventKind::Birth { node: 1 }).unwrap();

    let order: Vec<&str> = std::iter::from_fn(|| q.pop()).map(|e| e.kind.label()).collect();
    assert_eq!(
        order,
        vec!["birth", "mobility", "rx-end", "rx-begin", "hook", "tx-end", "milestone", "quit"]
    );
}

#[test]
fn test_clock_dominates_priority() {
    let mut q = EventQueue::new();
    q.push(20, EventKind::Birth { node: 1 }).unwrap();
    q.push(10, EventKind::Quit).unwrap();

    assert_eq!(q.pop().map(|e| e.clock), Some(10));
    assert_eq!(q.pop().map(|e| e.clock), Some(20));
    assert!(q.pop().is_none());
}

#[test]
fn test_cancelled_event_never_runs() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 0);
    let keep = h.ctx().schedule(5, 1, None, Callback::new(1)).unwrap();
    let dropped = h.ctx().schedule(5, 1, None, Callback::new(2)).unwrap();

    assert!(h.sim.cancel(dropped));
    assert!(!h.sim.cancel(dropped), "second cancel is a no-op");

    h.run();

    assert_eq!(
        h.seen(),
        vec![
            Seen::Birth { clock: 0, node: 1 },
            Seen::Callback { clock: 5, node: 1, tag: 1 },
        ]
    );
    assert!(!h.sim.cancel(keep), "executed handles cannot be cancelled");
}

#[test]
fn test_outstanding_work_ignores_housekeeping() {
    let mut q = EventQueue::new();
    q.push(1, EventKind::Milestone).unwrap();
    q.push(1, EventKind::Mobility { node: 3 }).unwrap();
    let birth = q.push(2, EventKind::Birth { node: 3 }).unwrap();

    assert_eq!(q.len(), 3);
    assert_eq!(q.outstanding_work(), 1);

    assert!(q.cancel(birth));
    assert_eq!(q.outstanding_work(), 0);
    assert_eq!(q.len(), 2);
    assert!(!q.is_pending(birth));
    assert_eq!(q.iter().count(), 2);
    assert_eq!(q.peek().map(|e| e.clock), Some(1));
}

#[test]
fn test_callback_argument_round_trip() {
    let mut h = TestHarness::new();
    h.add_recorder(1, 0);
    h.ctx()
        .schedule_hook(3, |ctx| {
            let cb = Callback::with_arg(9, String::from("payload"));
            assert_eq!(cb.arg::<String>().map(String::as_str), Some("payload"));
            assert!(cb.arg::<u32>().is_none());
            ctx.schedule(ctx.now(), 1, Some(1), cb)?;
            Ok(())
        })
        .unwrap();

    h.run();

    assert_eq!(h.seen().last(), Some(&Seen::Callback { clock: 3, node: 1, tag: 9 }));
}
