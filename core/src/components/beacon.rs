use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::context::Context;
use crate::engine::Callback;
use crate::error::{Result, SimError};
use crate::modulation::Modulation;
use crate::radio::{Band, InterfaceId, Signal};
use crate::traits::{Model, NodeId};
use crate::Time;

const TICK: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BeaconConfig {
    /// Nanoseconds between frames.
    pub period: Time,
    /// Uniform random extra delay added to every period, ns.
    pub jitter: Time,
    pub payload_bytes: usize,
    pub tx_power_dbm: f64,
    pub band: Band,
    pub channel: usize,
    pub modulation: Modulation,
    pub bit_duration: Time,
    pub interface: u16,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            period: 1_000_000,
            jitter: 0,
            payload_bytes: 32,
            tx_power_dbm: 0.0,
            band: Band::new(2400.0, 2401.0),
            channel: 0,
            modulation: Modulation::default(),
            bit_duration: 1_000,
            interface: 0,
        }
    }
}

impl BeaconConfig {
    /// On-air time of one frame.
    pub fn airtime(&self) -> Time {
        (self.payload_bytes as Time * 8).saturating_mul(self.bit_duration)
    }

    /// Channel range depends on the kernel config and is checked when a
    /// frame goes out.
    pub fn validate(&self) -> Result<()> {
        self.band.validate()?;
        if self.period == 0 {
            return Err(SimError::config("beacon period must be positive"));
        }
        if self.bit_duration == 0 {
            return Err(SimError::config("beacon bit_duration must be positive"));
        }
        Ok(())
    }
}

/// Periodic transmitter.
#[derive(Default)]
pub struct Beacon {
    pub config: BeaconConfig,
    pub sent: u64,
    pub completed: u64,
    seq: u32,
}

impl Beacon {
    pub fn new(config: BeaconConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    fn next_delay(&self, ctx: &mut Context) -> Time {
        let jitter = match self.config.jitter {
            0 => 0,
            j => ctx.rng().gen_range(0..=j),
        };
        self.config.period.saturating_add(jitter)
    }

    fn arm(&self, node: NodeId, delay: Time, ctx: &mut Context) -> Result<()> {
        match ctx.schedule_after(delay, node, Some(node), Callback::new(TICK)) {
            Ok(_) | Err(SimError::BeyondSimulationEnd { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Model for Beacon {
    fn kind(&self) -> &str {
        "Beacon"
    }

    fn on_birth(&mut self, node: NodeId, ctx: &mut Context) -> Result<()> {
        let delay = self.next_delay(ctx) - self.config.period;
        self.arm(node, delay, ctx)
    }

    fn on_callback(&mut self, node: NodeId, _source: Option<NodeId>, callback: Callback, ctx: &mut Context) -> Result<()> {
        if callback.tag != TICK {
            return Ok(());
        }
        let cfg = &self.config;
        let begin = ctx.now();
        let signal = Signal::new(
            InterfaceId::new(node, cfg.interface),
            cfg.band,
            begin,
            begin.saturating_add(cfg.airtime()),
        )
        .with_channel(cfg.channel)
        .with_power(cfg.tx_power_dbm)
        .with_modulation(cfg.modulation, cfg.bit_duration)
        .with_data(self.seq.to_be_bytes().to_vec());

        let key = ctx.begin_transmission(signal)?;
        debug!(node, seq = self.seq, signal = %key, "beacon sent");
        self.seq = self.seq.wrapping_add(1);
        self.sent += 1;

        let delay = self.next_delay(ctx);
        self.arm(node, delay, ctx)
    }

    fn on_tx_end(&mut self, _node: NodeId, _signal: &Signal, _ctx: &mut Context) -> Result<()> {
        self.completed += 1;
        Ok(())
    }

    fn encode_config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn snapshot(&self) -> Value {
        json!({
            "sent": self.sent,
            "completed": self.completed,
        })
    }
}
