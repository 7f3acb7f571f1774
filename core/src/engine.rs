use std::any::Any;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arena::Key;
use crate::context::Context;
use crate::error::{Result, SimError};
use crate::traits::NodeId;
use crate::Time;

/// Tie-break rank for events sharing a timestamp. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Birth = 1,
    Mobility = 2,
    RxEnd = 3,
    RxBegin = 4,
    Callback = 5,
    TxEnd = 6,
    Milestone = 7,
    Quit = 8,
}

/// Argument handed to a model when its callback fires.
pub struct Callback {
    pub tag: u32,
    pub arg: Option<Box<dyn Any>>,
}

impl Callback {
    pub fn new(tag: u32) -> Self {
        Self { tag, arg: None }
    }

    pub fn with_arg<T: Any>(tag: u32, arg: T) -> Self {
        Self {
            tag,
            arg: Some(Box::new(arg)),
        }
    }

    pub fn arg<T: Any>(&self) -> Option<&T> {
        self.arg.as_ref().and_then(|a| a.downcast_ref())
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("tag", &self.tag)
            .field("arg", &self.arg.is_some())
            .finish()
    }
}

/// Target-less callback run against the kernel context.
pub type Hook = Box<dyn FnOnce(&mut Context) -> Result<()>>;

pub enum EventKind {
    Birth { node: NodeId },
    Quit,
    Mobility { node: NodeId },
    Milestone,
    TxEnd { signal: Key },
    RxBegin { reception: Key },
    RxEnd { reception: Key },
    Callback {
        target: NodeId,
        source: Option<NodeId>,
        callback: Callback,
    },
    Hook(Hook),
}

impl EventKind {
    pub fn priority(&self) -> Priority {
        match self {
            EventKind::Birth { .. } => Priority::Birth,
            EventKind::Quit => Priority::Quit,
            EventKind::Mobility { .. } => Priority::Mobility,
            EventKind::Milestone => Priority::Milestone,
            EventKind::TxEnd { .. } => Priority::TxEnd,
            EventKind::RxBegin { .. } => Priority::RxBegin,
            EventKind::RxEnd { .. } => Priority::RxEnd,
            EventKind::Callback { .. } | EventKind::Hook(_) => Priority::Callback,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Birth { .. } => "birth",
            EventKind::Quit => "quit",
            EventKind::Mobility { .. } => "mobility",
            EventKind::Milestone => "milestone",
            EventKind::TxEnd { .. } => "tx-end",
            EventKind::RxBegin { .. } => "rx-begin",
            EventKind::RxEnd { .. } => "rx-end",
            EventKind::Callback { .. } => "callback",
            EventKind::Hook(_) => "hook",
        }
    }

    /// The node this event is addressed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            EventKind::Birth { node } | EventKind::Mobility { node } => Some(*node),
            EventKind::Callback { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Housekeeping never counts as outstanding work.
    pub fn is_housekeeping(&self) -> bool {
        matches!(self, EventKind::Milestone | EventKind::Mobility { .. })
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Birth { node } => write!(f, "Birth({node})"),
            EventKind::Quit => write!(f, "Quit"),
            EventKind::Mobility { node } => write!(f, "Mobility({node})"),
            EventKind::Milestone => write!(f, "Milestone"),
            EventKind::TxEnd { signal } => write!(f, "TxEnd({signal})"),
            EventKind::RxBegin { reception } => write!(f, "RxBegin({reception})"),
            EventKind::RxEnd { reception } => write!(f, "RxEnd({reception})"),
            EventKind::Callback {
                target,
                source,
                callback,
            } => write!(f, "Callback({target} <- {source:?}, tag {})", callback.tag),
            EventKind::Hook(_) => write!(f, "Hook"),
        }
    }
}

#[derive(Debug)]
pub struct Event {
    pub clock: Time,
    pub priority: Priority,
    pub uid: u64,
    pub kind: EventKind,
}

impl Event {
    fn key(&self) -> (Time, Priority, u64) {
        (self.clock, self.priority, self.uid)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Event {}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Cancellation handle returned when an event is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventHandle(u64);

impl EventHandle {
    pub fn uid(self) -> u64 {
        self.0
    }
}

/// Min-queue over `(clock, priority, uid)`.
///
/// Cancellation is lazy: a cancelled event stays in the heap but has left
/// the pending set, and `pop` discards it when it surfaces.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    /// uid -> housekeeping flag
    pending: HashMap<u64, bool>,
    work: usize,
    next_uid: u64,
    limit: Option<usize>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Number of live (not cancelled, not executed) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Live events other than housekeeping.
    pub fn outstanding_work(&self) -> usize {
        self.work
    }

    pub fn push(&mut self, clock: Time, kind: EventKind) -> Result<EventHandle> {
        if let Some(limit) = self.limit {
            if self.pending.len() >= limit {
                return Err(SimError::Exhausted {
                    what: "event queue",
                    capacity: limit,
                });
            }
        }
        self.heap.try_reserve(1).map_err(|_| SimError::Exhausted {
            what: "event queue",
            capacity: self.heap.len(),
        })?;

        let uid = self.next_uid;
        self.next_uid += 1;
        let housekeeping = kind.is_housekeeping();
        if !housekeeping {
            self.work += 1;
        }
        self.pending.insert(uid, housekeeping);
        self.heap.push(Reverse(Event {
            clock,
            priority: kind.priority(),
            uid,
            kind,
        }));
        Ok(EventHandle(uid))
    }

    /// Removes the earliest live event.
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(Reverse(event)) = self.heap.pop() {
            if let Some(housekeeping) = self.pending.remove(&event.uid) {
                if !housekeeping {
                    self.work -= 1;
                }
                return Some(event);
            }
        }
        None
    }

    /// Earliest live event without removing it.
    pub fn peek(&mut self) -> Option<&Event> {
        while let Some(Reverse(event)) = self.heap.peek() {
            if self.pending.contains_key(&event.uid) {
                break;
            }
            self.heap.pop();
        }
        self.heap.peek().map(|Reverse(event)| event)
    }

    /// Returns `true` if the event was pending and is now cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        match self.pending.remove(&handle.0) {
            Some(housekeeping) => {
                if !housekeeping {
                    self.work -= 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains_key(&handle.0)
    }

    /// Live events in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.heap
            .iter()
            .map(|Reverse(event)| event)
            .filter(|event| self.pending.contains_key(&event.uid))
    }
}
