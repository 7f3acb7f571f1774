use std::any::Any;

use crate::context::Context;
use crate::engine::Callback;
use crate::error::Result;
use crate::radio::{Position, Reception, Signal};
use crate::Time;

pub type NodeId = u32;

/// Protocol-stack entry point for one node.
///
/// The scheduler owns every model and calls into it while handing over the
/// kernel [`Context`], through which the model schedules events, transmits
/// and registers receivers. Returning an error aborts the run.
pub trait Model: Any {
    fn kind(&self) -> &str;

    fn on_birth(&mut self, node: NodeId, ctx: &mut Context) -> Result<()>;

    fn on_callback(&mut self, _node: NodeId, _source: Option<NodeId>, _callback: Callback, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn on_rx_begin(&mut self, _node: NodeId, _reception: &Reception, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// `per` is the integrated packet error rate over the reception.
    fn on_rx_end(&mut self, _node: NodeId, _reception: &Reception, _per: f64, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn on_tx_end(&mut self, _node: NodeId, _signal: &Signal, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    // Serialization
    fn encode_config(&self) -> serde_json::Value;

    // Metrics
    fn snapshot(&self) -> serde_json::Value;
}

/// Position source for a node.
pub trait Mobility {
    fn position(&mut self, now: Time) -> Position;

    /// When this model next wants a discrete re-evaluation, if ever.
    fn next_update(&self, _now: Time) -> Option<Time> {
        None
    }
}
