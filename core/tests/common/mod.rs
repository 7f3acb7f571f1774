#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use wsim_core::components::{Beacon, BeaconConfig, Sink, SinkConfig, StaticPosition};
use wsim_core::*;

/// What a [`Recorder`] saw, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Birth { clock: Time, node: NodeId },
    Callback { clock: Time, node: NodeId, tag: u32 },
    RxBegin { clock: Time, node: NodeId },
    RxEnd { clock: Time, node: NodeId, per: f64, late_join: bool },
    TxEnd { clock: Time, node: NodeId },
}

pub type Journal = Rc<RefCell<Vec<Seen>>>;

/// Model that only records what reaches it.
pub struct Recorder {
    journal: Journal,
}

impl Recorder {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl Model for Recorder {
    fn kind(&self) -> &str {
        "Recorder"
    }

    fn on_birth(&mut self, node: NodeId, ctx: &mut Context) -> Result<()> {
        self.journal.borrow_mut().push(Seen::Birth { clock: ctx.now(), node });
        Ok(())
    }

    fn on_callback(&mut self, node: NodeId, _source: Option<NodeId>, callback: Callback, ctx: &mut Context) -> Result<()> {
        self.journal.borrow_mut().push(Seen::Callback {
            clock: ctx.now(),
            node,
            tag: callback.tag,
        });
        Ok(())
    }

    fn on_rx_begin(&mut self, node: NodeId, _reception: &Reception, ctx: &mut Context) -> Result<()> {
        self.journal.borrow_mut().push(Seen::RxBegin { clock: ctx.now(), node });
        Ok(())
    }

    fn on_rx_end(&mut self, node: NodeId, reception: &Reception, per: f64, ctx: &mut Context) -> Result<()> {
        self.journal.borrow_mut().push(Seen::RxEnd {
            clock: ctx.now(),
            node,
            per,
            late_join: reception.late_join,
        });
        Ok(())
    }

    fn on_tx_end(&mut self, node: NodeId, _signal: &Signal, ctx: &mut Context) -> Result<()> {
        self.journal.borrow_mut().push(Seen::TxEnd { clock: ctx.now(), node });
        Ok(())
    }

    fn encode_config(&self) -> Value {
        Value::Null
    }

    fn snapshot(&self) -> Value {
        serde_json::json!({ "seen": self.journal.borrow().len() })
    }
}

pub struct TestHarness {
    pub sim: Scheduler,
    pub journal: Journal,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default().with_trace())
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self::with_config(SimConfig::default().with_trace().with_seed(seed))
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            sim: Scheduler::new(config).expect("valid config"),
            journal: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.sim.context_mut()
    }

    pub fn add_recorder(&mut self, id: NodeId, birth: Time) -> EventHandle {
        let recorder = Recorder::new(Rc::clone(&self.journal));
        self.sim.add_node(id, birth, Box::new(recorder)).expect("add recorder")
    }

    pub fn add_recorder_at(&mut self, id: NodeId, birth: Time, position: Position) -> EventHandle {
        let recorder = Recorder::new(Rc::clone(&self.journal));
        self.sim
            .add_mobile_node(id, birth, Box::new(recorder), Box::new(StaticPosition(position)))
            .expect("add recorder")
    }

    pub fn add_sink(&mut self, id: NodeId, position: Position) {
        self.sim
            .add_mobile_node(id, 0, Box::new(Sink::new(SinkConfig::default())), Box::new(StaticPosition(position)))
            .expect("add sink");
    }

    pub fn add_beacon(&mut self, id: NodeId, birth: Time, position: Position, config: BeaconConfig) {
        self.sim
            .add_mobile_node(id, birth, Box::new(Beacon::new(config)), Box::new(StaticPosition(position)))
            .expect("add beacon");
    }

    pub fn run(&mut self) -> RunReport {
        self.sim.run()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.journal.borrow().clone()
    }

    /// Labels of every dispatched event, in order.
    pub fn labels(&self) -> Vec<String> {
        self.sim
            .context()
            .trace()
            .map(|t| t.iter().map(|r| r.kind.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels().iter().filter(|l| *l == label).count()
    }

    pub fn snapshot(&self, id: NodeId) -> Value {
        self.sim.model(id).map(|m| m.snapshot()).unwrap_or(Value::Null)
    }
}

/// 1 MHz band at 2.4 GHz used by the reference models.
pub fn band() -> Band {
    Band::new(2400.0, 2401.0)
}

pub fn signal(node: NodeId, begin: Time, end: Time) -> Signal {
    Signal::new(InterfaceId::new(node, 0), band(), begin, end)
}

pub fn receiver(node: NodeId) -> Receiver {
    Receiver::new(InterfaceId::new(node, 0), vec![band()])
}
