use serde::{Deserialize, Serialize};

use crate::radio::{Position, Signal};
use crate::Time;

/// Physical properties of the shared medium.
#[derive(Serialize, Deserialize, Clone, Debug, Copy, PartialEq)]
#[serde(default)]
pub struct MediumConfig {
    /// Propagation speed in m/s.
    pub speed_of_light: f64,
    pub propagation: LogDistance,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            speed_of_light: 299_792_458.0,
            propagation: LogDistance::default(),
        }
    }
}

impl MediumConfig {
    /// Delay in nanoseconds for a signal to cover the distance between two
    /// positions.
    pub fn propagation_delay(&self, from: &Position, to: &Position) -> Time {
        let seconds = from.distance(to) / self.speed_of_light;
        (seconds * 1e9).round() as Time
    }
}

/// Received power model. Pathloss, shadowing and fading live behind this
/// seam.
pub trait Propagation {
    fn rx_power_dbm(&self, signal: &Signal, at: &Position) -> f64;
}

/// Deterministic log-distance pathloss:
/// `PL(d) = PL(d0) + 10 * n * log10(d / d0)`.
#[derive(Serialize, Deserialize, Clone, Debug, Copy, PartialEq)]
#[serde(default)]
pub struct LogDistance {
    pub exponent: f64,
    /// Loss at `reference_distance`, in dB.
    pub reference_loss_db: f64,
    /// Meters.
    pub reference_distance: f64,
}

impl Default for LogDistance {
    fn default() -> Self {
        Self {
            exponent: 2.0,
            reference_loss_db: 40.0,
            reference_distance: 1.0,
        }
    }
}

impl LogDistance {
    pub fn loss_db(&self, distance: f64) -> f64 {
        if distance <= self.reference_distance {
            return self.reference_loss_db;
        }
        self.reference_loss_db
            + 10.0 * self.exponent * (distance / self.reference_distance).log10()
    }
}

impl Propagation for LogDistance {
    fn rx_power_dbm(&self, signal: &Signal, at: &Position) -> f64 {
        signal.tx_power_dbm - self.loss_db(signal.origin.distance(at))
    }
}
