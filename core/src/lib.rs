pub mod analytics;
pub mod arena;
pub mod components;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod interval_tree;
pub mod medium;
pub mod modulation;
pub mod noise;
pub mod radio;
pub mod scheduler;
pub mod spectrum;
pub mod traits;

pub use analytics::{DispatchStats, MetricPoint};
pub use arena::{Key, Slab};
pub use components::{create_model, model_kinds};
pub use config::SimConfig;
pub use context::{Context, DispatchRecord, NodeState, SchedulerState};
pub use engine::{Callback, Event, EventHandle, EventKind, EventQueue, Priority};
pub use error::{Result, SimError};
pub use interval_tree::{IntervalHandle, IntervalRef, IntervalTree};
pub use medium::{LogDistance, MediumConfig, Propagation};
pub use modulation::Modulation;
pub use noise::{FrameNoise, NoiseAccumulator, NoiseConfig};
pub use radio::{Band, InterfaceId, Position, Receiver, Reception, Signal};
pub use scheduler::{RunReport, Scheduler, StopReason};
pub use spectrum::SpectrumRegistry;
pub use traits::{Mobility, Model, NodeId};

/// Simulation time in nanoseconds.
pub type Time = u64;

pub const NANOS_PER_US: Time = 1_000;
pub const NANOS_PER_MS: Time = 1_000_000;
pub const NANOS_PER_SEC: Time = 1_000_000_000;
