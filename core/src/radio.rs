//! Value types shared by the spectrum registry, the noise accumulator and
//! model code.

use serde::{Deserialize, Serialize};

use crate::arena::Key;
use crate::error::{Result, SimError};
use crate::interval_tree::IntervalHandle;
use crate::modulation::{dbm_to_mw, Modulation};
use crate::traits::NodeId;
use crate::Time;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Frequency band in MHz, closed on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub fn new(low: f64, high: f64) -> Self {
        assert!(low <= high, "inverted band [{low}, {high}]");
        Self { low, high }
    }

    /// Rejects bands that bypassed [`Band::new`], e.g. from JSON.
    pub fn validate(&self) -> Result<()> {
        if !(self.low <= self.high) {
            return Err(SimError::config(format!("inverted band [{}, {}]", self.low, self.high)));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &Band) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

/// A radio interface: node plus interface slot on that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId {
    pub node: NodeId,
    pub index: u16,
}

impl InterfaceId {
    pub fn new(node: NodeId, index: u16) -> Self {
        Self { node, index }
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.index)
    }
}

/// A transmission on the air.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub source: InterfaceId,
    pub band: Band,
    pub channel: usize,
    pub tx_power_dbm: f64,
    pub modulation: Modulation,
    /// Nanoseconds per bit.
    pub bit_duration: Time,
    /// On-air span at the transmitter, `[begin, end)`.
    pub begin: Time,
    pub end: Time,
    /// Transmitter position, stamped when the transmission starts.
    pub origin: Position,
    pub data: Vec<u8>,
}

impl Signal {
    pub fn new(source: InterfaceId, band: Band, begin: Time, end: Time) -> Self {
        Self {
            source,
            band,
            channel: 0,
            tx_power_dbm: 0.0,
            modulation: Modulation::default(),
            bit_duration: 1_000,
            begin,
            end,
            origin: Position::default(),
            data: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_power(mut self, tx_power_dbm: f64) -> Self {
        self.tx_power_dbm = tx_power_dbm;
        self
    }

    pub fn with_modulation(mut self, modulation: Modulation, bit_duration: Time) -> Self {
        self.modulation = modulation;
        self.bit_duration = bit_duration;
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn duration(&self) -> Time {
        self.end - self.begin
    }
}

/// A receiver as described by model code.
#[derive(Debug, Clone, PartialEq)]
pub struct Receiver {
    pub interface: InterfaceId,
    pub bands: Vec<Band>,
}

impl Receiver {
    pub fn new(interface: InterfaceId, bands: Vec<Band>) -> Self {
        Self { interface, bands }
    }
}

/// A receiver owned by the spectrum registry, with one tree entry per band.
#[derive(Debug, Clone)]
pub struct RegisteredReceiver {
    pub receiver: Receiver,
    pub(crate) handles: Vec<IntervalHandle>,
}

/// One receiver's copy of a signal, with timing shifted by propagation delay.
#[derive(Debug, Clone, PartialEq)]
pub struct Reception {
    pub signal: Signal,
    pub transmission: Key,
    pub receiver: Key,
    pub interface: InterfaceId,
    pub begin: Time,
    pub end: Time,
    pub rx_power_dbm: f64,
    /// The receiver registered while the signal was already on the air.
    pub late_join: bool,
}

impl Reception {
    pub fn rx_power_mw(&self) -> f64 {
        dbm_to_mw(self.rx_power_dbm)
    }

    pub fn duration(&self) -> Time {
        self.end - self.begin
    }
}
