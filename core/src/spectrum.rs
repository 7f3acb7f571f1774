//! Routes transmissions to the receivers whose bands they overlap.
//!
//! The registry owns every registered receiver and every signal currently on
//! the air in generational slabs. Two interval trees index them by frequency;
//! tree payloads are slab keys, so an entry whose owner is gone resolves to
//! nothing and is skipped.
//!
//! A receiver's bands are fixed for the lifetime of its registration. There
//! is no way to mutate them in place: retuning means unregistering and
//! registering again, which keeps the receiver tree consistent.

use tracing::debug;

use crate::arena::{Key, Slab};
use crate::error::Result;
use crate::interval_tree::{IntervalHandle, IntervalTree};
use crate::medium::{MediumConfig, Propagation};
use crate::radio::{Position, Receiver, Reception, RegisteredReceiver, Signal};
use crate::traits::NodeId;
use crate::Time;

struct ActiveSignal {
    signal: Signal,
    handle: Option<IntervalHandle>,
}

/// What a new transmission needs from the scheduler: its own expiry and one
/// delivery per reached receiver.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub key: Key,
    pub end: Time,
    pub deliveries: Vec<Reception>,
}

pub struct SpectrumRegistry {
    medium: MediumConfig,
    propagation: Box<dyn Propagation>,
    receivers: Slab<RegisteredReceiver>,
    signals: Slab<ActiveSignal>,
    receiver_tree: IntervalTree<f64, Key>,
    signal_tree: IntervalTree<f64, Key>,
}

impl SpectrumRegistry {
    pub fn new(medium: MediumConfig) -> Self {
        Self::with_propagation(medium, Box::new(medium.propagation))
    }

    pub fn with_propagation(medium: MediumConfig, propagation: Box<dyn Propagation>) -> Self {
        Self {
            medium,
            propagation,
            receivers: Slab::new("receivers"),
            signals: Slab::new("signals"),
            receiver_tree: IntervalTree::new(),
            signal_tree: IntervalTree::new(),
        }
    }

    pub fn medium(&self) -> &MediumConfig {
        &self.medium
    }

    pub fn receiver(&self, key: Key) -> Option<&Receiver> {
        self.receivers.get(key).map(|r| &r.receiver)
    }

    pub fn signal(&self, key: Key) -> Option<&Signal> {
        self.signals.get(key).map(|s| &s.signal)
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn active_signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Keys of every receiver registered for `node`.
    pub fn receivers_of(&self, node: NodeId) -> Vec<Key> {
        self.receivers
            .iter()
            .filter(|(_, r)| r.receiver.interface.node == node)
            .map(|(key, _)| key)
            .collect()
    }

    /// Registers `receiver` located at `at` and returns the signals already
    /// on the air that reach it, timed for this receiver. Receptions whose
    /// adjusted start is not after `now` are flagged `late_join`.
    pub fn register_receiver(&mut self, receiver: Receiver, at: Position, now: Time) -> Result<(Key, Vec<Reception>)> {
        let key = self.receivers.insert(RegisteredReceiver {
            receiver: receiver.clone(),
            handles: Vec::with_capacity(receiver.bands.len()),
        })?;

        let mut handles = Vec::with_capacity(receiver.bands.len());
        for band in &receiver.bands {
            match self.receiver_tree.insert(band.low, band.high, key) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        self.receiver_tree.delete(handle);
                    }
                    self.receivers.remove(key);
                    return Err(err);
                }
            }
        }
        if let Some(registered) = self.receivers.get_mut(key) {
            registered.handles = handles;
        }

        let mut found: Vec<Key> = Vec::new();
        for band in &receiver.bands {
            for entry in self.signal_tree.find_all_intersections(band.low, band.high) {
                if !found.contains(entry.payload) {
                    found.push(*entry.payload);
                }
            }
        }

        let mut in_flight = Vec::new();
        for signal_key in found {
            let Some(active) = self.signals.get(signal_key) else {
                continue;
            };
            if active.signal.source.node == receiver.interface.node {
                continue;
            }
            let mut reception = self.reception(signal_key, &active.signal, key, &receiver, &at);
            if reception.end <= now {
                continue;
            }
            reception.late_join = reception.begin <= now;
            in_flight.push(reception);
        }

        debug!(
            interface = %receiver.interface,
            receiver = %key,
            in_flight = in_flight.len(),
            "receiver registered"
        );
        Ok((key, in_flight))
    }

    /// Removes every band of the receiver from the index. Idempotent.
    pub fn unregister_receiver(&mut self, key: Key) -> Option<Receiver> {
        let registered = self.receivers.remove(key)?;
        for handle in &registered.handles {
            self.receiver_tree.delete(*handle);
        }
        debug!(interface = %registered.receiver.interface, receiver = %key, "receiver unregistered");
        Some(registered.receiver)
    }

    /// Puts `signal` on the air and computes a delivery for every live
    /// receiver whose bands overlap it. `locate` resolves node positions;
    /// receivers it cannot place are skipped.
    pub fn add_transmission(&mut self, signal: Signal, locate: &dyn Fn(NodeId) -> Option<Position>) -> Result<Transmission> {
        let (low, high) = (signal.band.low, signal.band.high);
        let end = signal.end;
        let key = self.signals.insert(ActiveSignal { signal, handle: None })?;
        let handle = match self.signal_tree.insert(low, high, key) {
            Ok(handle) => handle,
            Err(err) => {
                self.signals.remove(key);
                return Err(err);
            }
        };

        let mut targets: Vec<Key> = Vec::new();
        for entry in self.receiver_tree.find_all_intersections(low, high) {
            if !targets.contains(entry.payload) {
                targets.push(*entry.payload);
            }
        }

        if let Some(active) = self.signals.get_mut(key) {
            active.handle = Some(handle);
        }
        let Some(signal) = self.signal(key) else {
            return Ok(Transmission { key, end, deliveries: Vec::new() });
        };

        let mut deliveries = Vec::with_capacity(targets.len());
        for receiver_key in targets {
            let Some(registered) = self.receivers.get(receiver_key) else {
                continue;
            };
            let receiver = &registered.receiver;
            if receiver.interface.node == signal.source.node {
                continue;
            }
            let Some(at) = locate(receiver.interface.node) else {
                debug!(interface = %receiver.interface, "receiver has no position, skipped");
                continue;
            };
            deliveries.push(self.reception(key, signal, receiver_key, receiver, &at));
        }

        debug!(
            source = %signal.source,
            signal = %key,
            begin = signal.begin,
            end = signal.end,
            deliveries = deliveries.len(),
            "transmission started"
        );
        Ok(Transmission { key, end, deliveries })
    }

    /// Takes the signal off the air. Stale keys are a no-op.
    pub fn end_transmission(&mut self, key: Key) -> Option<Signal> {
        let active = self.signals.remove(key)?;
        if let Some(handle) = active.handle {
            self.signal_tree.delete(handle);
        }
        debug!(source = %active.signal.source, signal = %key, "transmission ended");
        Some(active.signal)
    }

    fn reception(&self, signal_key: Key, signal: &Signal, receiver_key: Key, receiver: &Receiver, at: &Position) -> Reception {
        let delay = self.medium.propagation_delay(&signal.origin, at);
        Reception {
            signal: signal.clone(),
            transmission: signal_key,
            receiver: receiver_key,
            interface: receiver.interface,
            begin: signal.begin + delay,
            end: signal.end + delay,
            rx_power_dbm: self.propagation.rx_power_dbm(signal, at),
            late_join: false,
        }
    }
}
