//! Driving loop: pops the earliest event, advances the clock and dispatches.
//!
//! State machine: `Idle -> Running -> Draining -> Stopped`. A quit event
//! moves the run to `Draining`; the loop exits after that dispatch and the
//! scheduler is `Stopped` for good.

use std::collections::BTreeMap;

use tracing::{info, trace, warn};

use crate::config::SimConfig;
use crate::context::{Context, SchedulerState};
use crate::engine::{Event, EventHandle, EventKind};
use crate::error::{Result, SimError};
use crate::traits::{Mobility, Model, NodeId};
use crate::Time;

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// A quit event ran, usually the one armed at the simulation end.
    Quit,
    /// Nothing left to dispatch.
    QueueExhausted,
    /// A handler failed; the run stopped at the failing event.
    Aborted(SimError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub clock: Time,
    pub reason: StopReason,
    pub dispatched: u64,
}

impl RunReport {
    /// Stopped before the configured end for any reason other than quit.
    pub fn ended_early(&self, end: Option<Time>) -> bool {
        match self.reason {
            StopReason::Quit => false,
            _ => end.is_some_and(|end| self.clock < end),
        }
    }
}

pub struct Scheduler {
    ctx: Context,
    models: BTreeMap<NodeId, Box<dyn Model>>,
    report: Option<RunReport>,
}

impl Scheduler {
    pub fn new(config: SimConfig) -> Result<Self> {
        Ok(Self {
            ctx: Context::new(config)?,
            models: BTreeMap::new(),
            report: None,
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn state(&self) -> SchedulerState {
        self.ctx.state
    }

    pub fn now(&self) -> Time {
        self.ctx.now()
    }

    pub fn model(&self, node: NodeId) -> Option<&dyn Model> {
        self.models.get(&node).map(|m| m.as_ref())
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.models.keys().copied()
    }

    /// Adds a node whose model becomes active at `birth`.
    /// A rejected node leaves no trace and may be added again.
    pub fn add_node(&mut self, node: NodeId, birth: Time, model: Box<dyn Model>) -> Result<EventHandle> {
        self.ctx.add_node(node)?;
        let handle = match self.ctx.add_event(birth, EventKind::Birth { node }) {
            Ok(handle) => handle,
            Err(err) => {
                self.ctx.forget_node(node);
                return Err(err);
            }
        };
        self.models.insert(node, model);
        Ok(handle)
    }

    pub fn add_mobile_node(&mut self, node: NodeId, birth: Time, model: Box<dyn Model>, mobility: Box<dyn Mobility>) -> Result<EventHandle> {
        let handle = self.add_node(node, birth, model)?;
        if let Some(next) = self.ctx.set_mobility(node, mobility) {
            if let Err(err) = self.ctx.schedule_mobility(node, next) {
                self.ctx.cancel(handle);
                self.ctx.forget_node(node);
                self.models.remove(&node);
                return Err(err);
            }
        }
        Ok(handle)
    }

    pub fn add_event(&mut self, clock: Time, kind: EventKind) -> Result<EventHandle> {
        self.ctx.add_event(clock, kind)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.ctx.cancel(handle)
    }

    /// Dispatches one event. Returns `Ok(false)` when the queue is empty.
    pub fn step(&mut self) -> Result<bool> {
        match self.ctx.state {
            SchedulerState::Idle => self.start()?,
            SchedulerState::Running => {}
            SchedulerState::Draining | SchedulerState::Stopped => return Err(SimError::AlreadyStopped),
        }

        let Some(event) = self.ctx.pop_event() else {
            return Ok(false);
        };
        if event.clock > self.ctx.now() {
            self.ctx.advance_clock(event.clock);
        }
        self.ctx.record_dispatch(&event);
        trace!(clock = event.clock, uid = event.uid, kind = ?event.kind, "dispatch");
        self.dispatch(event)?;
        Ok(true)
    }

    /// Runs until a quit event or until the queue drains.
    pub fn run(&mut self) -> RunReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        if self.ctx.state == SchedulerState::Idle {
            if let Err(err) = self.start() {
                return self.finish(StopReason::Aborted(err));
            }
        }

        let reason = loop {
            match self.step() {
                Ok(true) if self.ctx.state == SchedulerState::Draining => break StopReason::Quit,
                Ok(true) => {}
                Ok(false) => break StopReason::QueueExhausted,
                Err(err) => {
                    warn!(clock = self.ctx.now(), error = %err, "simulation aborted");
                    break StopReason::Aborted(err);
                }
            }
        };
        self.finish(reason)
    }

    /// Runs until the clock would pass `until`, leaving later events queued.
    /// The first call starts the run like [`run`](Self::run) does.
    pub fn run_until(&mut self, until: Time) -> Result<()> {
        if self.ctx.state == SchedulerState::Idle {
            self.start()?;
        }
        loop {
            let Some(next) = self.ctx.next_clock() else {
                break;
            };
            if next > until || !self.step()? || self.ctx.state == SchedulerState::Draining {
                break;
            }
        }
        if self.ctx.state == SchedulerState::Draining {
            self.finish(StopReason::Quit);
        }
        Ok(())
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Leaves `Idle`: arms the quit event at the configured end and the
    /// first milestone.
    fn start(&mut self) -> Result<()> {
        self.ctx.state = SchedulerState::Running;
        self.ctx.arm_end()?;
        self.arm_milestones()?;
        info!(
            clock = self.ctx.now(),
            end = ?self.ctx.simulation_end(),
            nodes = self.models.len(),
            pending = self.ctx.queue().len(),
            "simulation started"
        );
        Ok(())
    }

    fn arm_milestones(&mut self) -> Result<()> {
        if let Some(period) = self.ctx.config().milestone_period {
            let first = self.ctx.now().saturating_add(period);
            match self.ctx.add_event(first, EventKind::Milestone) {
                Ok(_) | Err(SimError::BeyondSimulationEnd { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn finish(&mut self, reason: StopReason) -> RunReport {
        self.ctx.state = SchedulerState::Stopped;
        let report = RunReport {
            clock: self.ctx.now(),
            reason,
            dispatched: self.ctx.stats().dispatched(),
        };
        if report.ended_early(self.ctx.simulation_end()) {
            warn!(clock = report.clock, reason = ?report.reason, "simulation ended before its configured end");
        }
        info!(clock = report.clock, dispatched = report.dispatched, reason = ?report.reason, "simulation stopped");
        self.report = Some(report.clone());
        report
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        let ctx = &mut self.ctx;
        match event.kind {
            EventKind::Birth { node } => {
                if !ctx.mark_born(node) {
                    return Ok(());
                }
                if let Some(model) = self.models.get_mut(&node) {
                    model.on_birth(node, ctx)?;
                }
            }
            EventKind::Quit => {
                ctx.state = SchedulerState::Draining;
            }
            EventKind::Mobility { node } => ctx.update_mobility(node)?,
            EventKind::Milestone => ctx.milestone()?,
            EventKind::TxEnd { signal } => {
                let Some(signal) = ctx.end_transmission(signal) else {
                    return Ok(());
                };
                let node = signal.source.node;
                if !ctx.is_alive(node) {
                    return Ok(());
                }
                if let Some(model) = self.models.get_mut(&node) {
                    model.on_tx_end(node, &signal, ctx)?;
                }
            }
            EventKind::RxBegin { reception } => {
                let Some(reception) = ctx.begin_reception(reception) else {
                    return Ok(());
                };
                let node = reception.interface.node;
                if !ctx.is_alive(node) {
                    return Ok(());
                }
                if let Some(model) = self.models.get_mut(&node) {
                    model.on_rx_begin(node, &reception, ctx)?;
                }
            }
            EventKind::RxEnd { reception } => {
                let Some((reception, per)) = ctx.finish_reception(reception) else {
                    return Ok(());
                };
                let node = reception.interface.node;
                if !ctx.is_alive(node) {
                    return Ok(());
                }
                if let Some(model) = self.models.get_mut(&node) {
                    model.on_rx_end(node, &reception, per, ctx)?;
                }
            }
            EventKind::Callback {
                target,
                source,
                callback,
            } => {
                if !ctx.is_alive(target) {
                    trace!(target, tag = callback.tag, "callback dropped, target not alive");
                    return Ok(());
                }
                if let Some(model) = self.models.get_mut(&target) {
                    model.on_callback(target, source, callback, ctx)?;
                }
            }
            EventKind::Hook(hook) => hook(ctx)?,
        }
        Ok(())
    }
}
