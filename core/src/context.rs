//! Kernel state shared with model code during dispatch.
//!
//! Everything a model may touch while handling an event lives here: the
//! clock, the event queue, the spectrum registry, the noise accumulator, node
//! liveness and positions. The scheduler keeps the models themselves apart
//! so that a model and the context can be borrowed mutably at the same time.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::analytics::DispatchStats;
use crate::arena::{Key, Slab};
use crate::config::SimConfig;
use crate::engine::{Callback, Event, EventHandle, EventKind, EventQueue, Hook, Priority};
use crate::error::{Result, SimError};
use crate::noise::NoiseAccumulator;
use crate::radio::{InterfaceId, Position, Receiver, Reception, Signal};
use crate::spectrum::{SpectrumRegistry, Transmission};
use crate::traits::{Mobility, NodeId};
use crate::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unborn,
    Alive,
    Dead,
}

/// One line of the dispatch trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub clock: Time,
    pub priority: Priority,
    pub uid: u64,
    pub kind: String,
    pub node: Option<NodeId>,
}

/// What a half-done kernel operation has queued so far.
#[derive(Default)]
struct Rollback {
    events: Vec<EventHandle>,
    receptions: Vec<Key>,
}

impl Rollback {
    fn apply(self, ctx: &mut Context) {
        for handle in self.events {
            ctx.queue.cancel(handle);
        }
        for key in self.receptions {
            ctx.receptions.remove(key);
        }
    }
}

struct InFlight {
    reception: Reception,
    /// Span accounted in the noise chain, once the reception has begun.
    noise_span: Option<(Time, Time)>,
}

pub struct Context {
    config: SimConfig,
    clock: Time,
    end: Option<Time>,
    end_event: Option<EventHandle>,
    pub(crate) state: SchedulerState,
    queue: EventQueue,
    spectrum: SpectrumRegistry,
    noise: NoiseAccumulator,
    receptions: Slab<InFlight>,
    nodes: HashMap<NodeId, NodeState>,
    mobility: BTreeMap<NodeId, Box<dyn Mobility>>,
    positions: HashMap<NodeId, Position>,
    rng: StdRng,
    stats: DispatchStats,
    trace: Option<Vec<DispatchRecord>>,
}

impl Context {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let queue = match config.event_capacity {
            Some(limit) => EventQueue::with_limit(limit),
            None => EventQueue::new(),
        };
        Ok(Self {
            clock: 0,
            end: config.simulation_end,
            end_event: None,
            state: SchedulerState::Idle,
            queue,
            spectrum: SpectrumRegistry::new(config.medium),
            noise: NoiseAccumulator::new(config.noise.clone()),
            receptions: Slab::new("receptions"),
            nodes: HashMap::new(),
            mobility: BTreeMap::new(),
            positions: HashMap::new(),
            rng: StdRng::seed_from_u64(config.seed),
            stats: DispatchStats::new(config.history_points)?,
            trace: config.record_trace.then(Vec::new),
            config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> Time {
        self.clock
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn simulation_end(&self) -> Option<Time> {
        self.end
    }

    /// Moves the end of the simulation. While running, the terminating quit
    /// event moves with it.
    pub fn set_simulation_end(&mut self, end: Time) -> Result<()> {
        if end < self.clock {
            return Err(SimError::PastDeadline {
                requested: end,
                now: self.clock,
            });
        }
        self.end = Some(end);
        if self.state == SchedulerState::Running {
            self.arm_end()?;
        }
        Ok(())
    }

    pub(crate) fn arm_end(&mut self) -> Result<()> {
        if let Some(handle) = self.end_event.take() {
            self.queue.cancel(handle);
        }
        if let Some(end) = self.end {
            self.end_event = Some(self.queue.push(end, EventKind::Quit)?);
        }
        Ok(())
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn spectrum(&self) -> &SpectrumRegistry {
        &self.spectrum
    }

    pub fn noise(&self) -> &NoiseAccumulator {
        &self.noise
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn trace(&self) -> Option<&[DispatchRecord]> {
        self.trace.as_deref()
    }

    // ===== Events =====

    /// Queues an event at absolute time `clock`.
    ///
    /// Fails with [`SimError::PastDeadline`] before the current clock, with
    /// [`SimError::BeyondSimulationEnd`] after the configured end and with
    /// [`SimError::AlreadyStopped`] once the run has finished. An event at
    /// exactly the current clock is legal and runs in this instant.
    pub fn add_event(&mut self, clock: Time, kind: EventKind) -> Result<EventHandle> {
        if matches!(self.state, SchedulerState::Draining | SchedulerState::Stopped) {
            return Err(SimError::AlreadyStopped);
        }
        if clock < self.clock {
            return Err(SimError::PastDeadline {
                requested: clock,
                now: self.clock,
            });
        }
        if let Some(end) = self.end {
            if clock > end {
                return Err(SimError::BeyondSimulationEnd { requested: clock, end });
            }
        }
        let handle = self.queue.push(clock, kind)?;
        trace!(clock, uid = handle.uid(), "event queued");
        Ok(handle)
    }

    /// Follow-up events that land after the end of the run are dropped quietly.
    fn add_follow_up(&mut self, clock: Time, kind: EventKind) -> Result<Option<EventHandle>> {
        match self.add_event(clock, kind) {
            Ok(handle) => Ok(Some(handle)),
            Err(SimError::BeyondSimulationEnd { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Schedules `callback` on `target`'s model at absolute time `clock`.
    /// If the target is not alive when the event fires, it is dropped.
    pub fn schedule(&mut self, clock: Time, target: NodeId, source: Option<NodeId>, callback: Callback) -> Result<EventHandle> {
        if !self.nodes.contains_key(&target) {
            return Err(SimError::UnknownNode(target));
        }
        self.add_event(
            clock,
            EventKind::Callback {
                target,
                source,
                callback,
            },
        )
    }

    pub fn schedule_after(&mut self, delay: Time, target: NodeId, source: Option<NodeId>, callback: Callback) -> Result<EventHandle> {
        self.schedule(self.clock.saturating_add(delay), target, source, callback)
    }

    pub fn schedule_hook(&mut self, clock: Time, hook: impl FnOnce(&mut Context) -> Result<()> + 'static) -> Result<EventHandle> {
        let hook: Hook = Box::new(hook);
        self.add_event(clock, EventKind::Hook(hook))
    }

    /// Cancels a pending event. Executed, cancelled or unknown handles are a
    /// no-op returning `false`.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let cancelled = self.queue.cancel(handle);
        if cancelled {
            trace!(uid = handle.uid(), "event cancelled");
        }
        cancelled
    }

    // ===== Nodes =====

    pub(crate) fn add_node(&mut self, node: NodeId) -> Result<()> {
        if self.nodes.contains_key(&node) {
            return Err(SimError::config(format!("node {node} added twice")));
        }
        self.nodes.insert(node, NodeState::Unborn);
        Ok(())
    }

    /// Undoes `add_node` for a node that never made it into the run.
    pub(crate) fn forget_node(&mut self, node: NodeId) {
        self.nodes.remove(&node);
        self.mobility.remove(&node);
        self.positions.remove(&node);
    }

    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        self.nodes.get(&node).copied()
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.node_state(node) == Some(NodeState::Alive)
    }

    /// Returns `false` if the node cannot be born (unknown, alive or dead).
    pub(crate) fn mark_born(&mut self, node: NodeId) -> bool {
        match self.nodes.get_mut(&node) {
            Some(state) if *state == NodeState::Unborn => {
                *state = NodeState::Alive;
                true
            }
            _ => false,
        }
    }

    /// Kills a node: pending callbacks to it are dropped when they fire and
    /// its receivers leave the spectrum.
    pub fn kill(&mut self, node: NodeId) -> bool {
        let Some(state) = self.nodes.get_mut(&node) else {
            return false;
        };
        if *state == NodeState::Dead {
            return false;
        }
        *state = NodeState::Dead;
        for key in self.spectrum.receivers_of(node) {
            self.spectrum.unregister_receiver(key);
        }
        debug!(node, clock = self.clock, "node killed");
        true
    }

    // ===== Positions =====

    pub fn position(&self, node: NodeId) -> Option<Position> {
        self.positions.get(&node).copied()
    }

    pub fn set_position(&mut self, node: NodeId, position: Position) {
        self.positions.insert(node, position);
    }

    pub(crate) fn set_mobility(&mut self, node: NodeId, mut mobility: Box<dyn Mobility>) -> Option<Time> {
        self.positions.insert(node, mobility.position(self.clock));
        let next = mobility.next_update(self.clock);
        self.mobility.insert(node, mobility);
        next
    }

    /// Moves the clock forward and refreshes the position snapshot.
    pub(crate) fn advance_clock(&mut self, clock: Time) {
        debug_assert!(clock >= self.clock, "clock moved backwards");
        self.clock = clock;
        for (node, mobility) in self.mobility.iter_mut() {
            self.positions.insert(*node, mobility.position(clock));
        }
    }

    /// Discrete mobility update requested by the model itself.
    pub(crate) fn update_mobility(&mut self, node: NodeId) -> Result<()> {
        let Some(mobility) = self.mobility.get_mut(&node) else {
            return Ok(());
        };
        let position = mobility.position(self.clock);
        let next = mobility.next_update(self.clock);
        self.positions.insert(node, position);
        trace!(node, x = position.x, y = position.y, z = position.z, "mobility snapshot");
        if let Some(next) = next.filter(|&t| t > self.clock) {
            if self.queue.outstanding_work() > 0 {
                self.add_follow_up(next, EventKind::Mobility { node })?;
            }
        }
        Ok(())
    }

    pub(crate) fn schedule_mobility(&mut self, node: NodeId, at: Time) -> Result<()> {
        self.add_follow_up(at.max(self.clock), EventKind::Mobility { node })?;
        Ok(())
    }

    // ===== Medium =====

    /// Puts a signal on the air. Its `[begin, end)` span must not start in
    /// the past. Schedules the transmitter's tx-end and one rx-begin/rx-end
    /// pair per reached receiver, shifted by propagation delay.
    ///
    /// On error nothing is left behind: the signal leaves the air and every
    /// event queued for it is cancelled.
    pub fn begin_transmission(&mut self, mut signal: Signal) -> Result<Key> {
        if signal.begin < self.clock {
            return Err(SimError::PastDeadline {
                requested: signal.begin,
                now: self.clock,
            });
        }
        assert!(signal.begin <= signal.end, "signal ends before it begins");
        signal.band.validate()?;
        self.check_channel(signal.channel)?;
        if let Some(origin) = self.position(signal.source.node) {
            signal.origin = origin;
        }

        let positions = &self.positions;
        let transmission = self
            .spectrum
            .add_transmission(signal, &|node| Some(positions.get(&node).copied().unwrap_or_default()))?;
        let key = transmission.key;

        let mut undo = Rollback::default();
        if let Err(err) = self.queue_transmission(transmission, &mut undo) {
            undo.apply(self);
            self.spectrum.end_transmission(key);
            warn!(signal = %key, error = %err, "transmission rolled back");
            return Err(err);
        }
        Ok(key)
    }

    fn queue_transmission(&mut self, transmission: Transmission, undo: &mut Rollback) -> Result<()> {
        let tx_end = EventKind::TxEnd {
            signal: transmission.key,
        };
        self.queue_follow_up(undo, transmission.end, tx_end)?;
        for reception in transmission.deliveries {
            let (begin, end) = (reception.begin, reception.end);
            let key = self.receptions.insert(InFlight {
                reception,
                noise_span: None,
            })?;
            undo.receptions.push(key);
            self.queue_follow_up(undo, begin, EventKind::RxBegin { reception: key })?;
            self.queue_follow_up(undo, end, EventKind::RxEnd { reception: key })?;
        }
        Ok(())
    }

    /// Takes a signal off the air. Stale keys are a no-op.
    pub fn end_transmission(&mut self, signal: Key) -> Option<Signal> {
        self.spectrum.end_transmission(signal)
    }

    /// Registers a receiver at its node's current position and returns the
    /// signals already reaching it. Receptions in progress get only an
    /// rx-end event; their noise is accounted from now on.
    ///
    /// On error the receiver is unregistered again and no event or noise is
    /// left behind.
    pub fn register_receiver(&mut self, receiver: Receiver) -> Result<(Key, Vec<Reception>)> {
        for band in &receiver.bands {
            band.validate()?;
        }
        let at = self.position(receiver.interface.node).unwrap_or_default();
        let (key, in_flight) = self.spectrum.register_receiver(receiver, at, self.clock)?;

        let mut undo = Rollback::default();
        if let Err(err) = self.queue_receptions(&in_flight, &mut undo) {
            undo.apply(self);
            self.spectrum.unregister_receiver(key);
            warn!(receiver = %key, error = %err, "receiver registration rolled back");
            return Err(err);
        }

        // noise goes in last, once nothing can fail any more
        for reception in in_flight.iter().filter(|r| r.late_join) {
            self.noise.add_signal(
                reception.interface,
                self.clock,
                reception.end,
                reception.signal.channel,
                reception.rx_power_mw(),
            );
        }
        Ok((key, in_flight))
    }

    fn queue_receptions(&mut self, in_flight: &[Reception], undo: &mut Rollback) -> Result<()> {
        for reception in in_flight {
            let (begin, end) = (reception.begin, reception.end);
            let noise_span = reception.late_join.then_some((self.clock, end));
            let key = self.receptions.insert(InFlight {
                reception: reception.clone(),
                noise_span,
            })?;
            undo.receptions.push(key);
            if !reception.late_join {
                self.queue_follow_up(undo, begin, EventKind::RxBegin { reception: key })?;
            }
            self.queue_follow_up(undo, end, EventKind::RxEnd { reception: key })?;
        }
        Ok(())
    }

    fn queue_follow_up(&mut self, undo: &mut Rollback, clock: Time, kind: EventKind) -> Result<()> {
        if let Some(handle) = self.add_follow_up(clock, kind)? {
            undo.events.push(handle);
        }
        Ok(())
    }

    fn check_channel(&self, channel: usize) -> Result<()> {
        let channels = self.noise.config().channels;
        if channel >= channels {
            return Err(SimError::config(format!("channel {channel} out of range ({channels} channels)")));
        }
        Ok(())
    }

    pub fn unregister_receiver(&mut self, receiver: Key) -> Option<Receiver> {
        self.spectrum.unregister_receiver(receiver)
    }

    pub fn reception(&self, key: Key) -> Option<&Reception> {
        self.receptions.get(key).map(|f| &f.reception)
    }

    /// Receptions scheduled or in progress.
    pub fn pending_receptions(&self) -> usize {
        self.receptions.len()
    }

    /// Accounts the reception's noise. `None` when its receiver is gone.
    pub(crate) fn begin_reception(&mut self, key: Key) -> Option<Reception> {
        let inflight = self.receptions.get(key)?;
        if self.spectrum.receiver(inflight.reception.receiver).is_none() {
            self.receptions.remove(key);
            return None;
        }
        let reception = inflight.reception.clone();
        let span = (reception.begin.max(self.clock), reception.end);
        self.noise.add_signal(
            reception.interface,
            span.0,
            span.1,
            reception.signal.channel,
            reception.rx_power_mw(),
        );
        if let Some(inflight) = self.receptions.get_mut(key) {
            inflight.noise_span = Some(span);
        }
        Some(reception)
    }

    /// Integrates the error rate and releases the reception's noise. `None`
    /// when the reception never began or its receiver is gone.
    pub(crate) fn finish_reception(&mut self, key: Key) -> Option<(Reception, f64)> {
        let InFlight {
            reception,
            noise_span,
        } = self.receptions.remove(key)?;
        let (begin, end) = noise_span?;

        let live = self.spectrum.receiver(reception.receiver).is_some();
        let per = live.then(|| {
            self.noise
                .integrate_packet_error_since(reception.interface, &reception, begin)
        });
        self.noise.remove_signal(reception.interface, begin, end);

        let per = per?;
        self.stats.record_per(per);
        Some((reception, per))
    }

    // ===== Noise =====

    /// Interference plus white noise on `channel` at the current clock, mW.
    pub fn current_noise(&self, interface: InterfaceId, channel: usize) -> f64 {
        self.noise.current_noise(interface, channel, self.clock)
    }

    pub fn integrate_packet_error(&self, interface: InterfaceId, reception: &Reception) -> f64 {
        self.noise.integrate_packet_error(interface, reception)
    }

    // ===== Housekeeping =====

    pub(crate) fn milestone(&mut self) -> Result<()> {
        let released = self.noise.sweep();
        self.stats.sample(self.clock, self.queue.len());
        info!(
            clock = self.clock,
            dispatched = self.stats.dispatched(),
            pending = self.queue.len(),
            released,
            "milestone"
        );
        if let Some(period) = self.config.milestone_period {
            if self.queue.outstanding_work() > 0 {
                self.add_follow_up(self.clock.saturating_add(period), EventKind::Milestone)?;
            }
        }
        Ok(())
    }

    pub(crate) fn record_dispatch(&mut self, event: &Event) {
        self.stats.record_dispatch(event.kind.label(), self.queue.len());
        if let Some(trace) = self.trace.as_mut() {
            trace.push(DispatchRecord {
                clock: event.clock,
                priority: event.priority,
                uid: event.uid,
                kind: event.kind.label().to_string(),
                node: event.kind.node(),
            });
        }
    }

    pub(crate) fn pop_event(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Timestamp of the next live event.
    pub fn next_clock(&mut self) -> Option<Time> {
        self.queue.peek().map(|event| event.clock)
    }
}
