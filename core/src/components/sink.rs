use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::arena::Key;
use crate::context::Context;
use crate::error::{Result, SimError};
use crate::radio::{Band, InterfaceId, Receiver, Reception};
use crate::traits::{Model, NodeId};
use crate::Time;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    pub bands: Vec<Band>,
    pub interface: u16,
    /// A reception counts as delivered when its PER is below this.
    pub per_threshold: f64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            bands: vec![Band::new(2400.0, 2401.0)],
            interface: 0,
            per_threshold: 0.5,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        for band in &self.bands {
            band.validate()?;
        }
        if !(0.0..=1.0).contains(&self.per_threshold) {
            return Err(SimError::config(format!("per_threshold {} outside [0, 1]", self.per_threshold)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionRecord {
    pub source: InterfaceId,
    pub begin: Time,
    pub end: Time,
    pub rx_power_dbm: f64,
    pub late_join: bool,
    pub per: f64,
}

/// Listens from birth and logs every completed reception.
#[derive(Default)]
pub struct Sink {
    pub config: SinkConfig,
    pub receiver: Option<Key>,
    pub started: u64,
    pub delivered: u64,
    pub lost: u64,
    pub log: Vec<ReceptionRecord>,
}

impl Sink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn mean_per(&self) -> Option<f64> {
        if self.log.is_empty() {
            return None;
        }
        Some(self.log.iter().map(|r| r.per).sum::<f64>() / self.log.len() as f64)
    }
}

impl Model for Sink {
    fn kind(&self) -> &str {
        "Sink"
    }

    fn on_birth(&mut self, node: NodeId, ctx: &mut Context) -> Result<()> {
        let receiver = Receiver::new(InterfaceId::new(node, self.config.interface), self.config.bands.clone());
        let (key, in_flight) = ctx.register_receiver(receiver)?;
        debug!(node, receiver = %key, in_flight = in_flight.len(), "sink listening");
        self.receiver = Some(key);
        Ok(())
    }

    fn on_rx_begin(&mut self, _node: NodeId, _reception: &Reception, _ctx: &mut Context) -> Result<()> {
        self.started += 1;
        Ok(())
    }

    fn on_rx_end(&mut self, _node: NodeId, reception: &Reception, per: f64, _ctx: &mut Context) -> Result<()> {
        if per < self.config.per_threshold {
            self.delivered += 1;
        } else {
            self.lost += 1;
        }
        self.log.push(ReceptionRecord {
            source: reception.signal.source,
            begin: reception.begin,
            end: reception.end,
            rx_power_dbm: reception.rx_power_dbm,
            late_join: reception.late_join,
            per,
        });
        Ok(())
    }

    fn encode_config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn snapshot(&self) -> Value {
        json!({
            "started": self.started,
            "delivered": self.delivered,
            "lost": self.lost,
            "mean_per": self.mean_per(),
            "log": self.log,
        })
    }
}
