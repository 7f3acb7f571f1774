//! Error types for the simulation kernel.

use thiserror::Error;

use crate::traits::NodeId;
use crate::Time;

/// Errors surfaced to callers of the kernel.
///
/// Structural violations (inverted intervals, NaN boundaries) are not listed
/// here: they panic, because the invariant is already broken upstream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// An event was scheduled before the current clock.
    #[error("event at {requested}ns is in the past (now = {now}ns)")]
    PastDeadline { requested: Time, now: Time },

    /// An event was scheduled after the configured end of the simulation.
    #[error("event at {requested}ns is beyond the simulation end ({end}ns)")]
    BeyondSimulationEnd { requested: Time, end: Time },

    /// The scheduler has stopped and accepts no further events.
    #[error("scheduler already stopped")]
    AlreadyStopped,

    /// A bounded table ran out of room.
    #[error("{what} exhausted (capacity {capacity})")]
    Exhausted { what: &'static str, capacity: usize },

    /// The referenced node was never added to the simulation.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Configuration could not be parsed or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A model handler aborted the run.
    #[error("model error: {0}")]
    Model(String),
}

impl SimError {
    /// Creates a model error.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err)
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
