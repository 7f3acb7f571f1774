use serde::{Deserialize, Serialize};

use crate::radio::Position;
use crate::traits::Mobility;
use crate::Time;

/// A node that never moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticPosition(pub Position);

impl Mobility for StaticPosition {
    fn position(&mut self, _now: Time) -> Position {
        self.0
    }
}

/// Constant velocity from `origin`, starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearMobility {
    pub origin: Position,
    /// Meters per second along each axis.
    pub velocity: Position,
    pub start: Time,
    /// Discrete re-evaluation period, ns.
    pub update_period: Option<Time>,
}

impl LinearMobility {
    pub fn new(origin: Position, velocity: Position) -> Self {
        Self {
            origin,
            velocity,
            start: 0,
            update_period: None,
        }
    }

    pub fn with_updates(mut self, period: Time) -> Self {
        self.update_period = Some(period);
        self
    }
}

impl Mobility for LinearMobility {
    fn position(&mut self, now: Time) -> Position {
        let dt = now.saturating_sub(self.start) as f64 / 1e9;
        Position::new(
            self.origin.x + self.velocity.x * dt,
            self.origin.y + self.velocity.y * dt,
            self.origin.z + self.velocity.z * dt,
        )
    }

    fn next_update(&self, now: Time) -> Option<Time> {
        self.update_period
            .filter(|&p| p > 0)
            .map(|p| now.saturating_add(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MobilityConfig {
    Static { position: Position },
    Linear(LinearMobility),
}

impl MobilityConfig {
    pub fn build(self) -> Box<dyn Mobility> {
        match self {
            MobilityConfig::Static { position } => Box::new(StaticPosition(position)),
            MobilityConfig::Linear(linear) => Box::new(linear),
        }
    }
}
