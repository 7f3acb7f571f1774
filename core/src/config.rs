use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::medium::MediumConfig;
use crate::noise::NoiseConfig;
use crate::Time;

/// Run-level settings. Node tables and topology come from the caller; this
/// only covers the kernel itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the kernel RNG handed to models.
    pub seed: u64,
    /// Absolute end time in nanoseconds. `None` runs until the queue drains.
    pub simulation_end: Option<Time>,
    /// Housekeeping period in nanoseconds. `None` disables milestones.
    pub milestone_period: Option<Time>,
    /// Maximum number of pending events.
    pub event_capacity: Option<usize>,
    /// Keep a record of every dispatched event.
    pub record_trace: bool,
    /// Number of milestone samples kept in the stats history.
    pub history_points: usize,
    pub noise: NoiseConfig,
    pub medium: MediumConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            simulation_end: None,
            milestone_period: None,
            event_capacity: None,
            record_trace: false,
            history_points: 600,
            noise: NoiseConfig::default(),
            medium: MediumConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.noise.channels == 0 {
            return Err(SimError::config("noise.channels must be at least 1"));
        }
        if self.noise.frame_duration == 0 {
            return Err(SimError::config("noise.frame_duration must be positive"));
        }
        if !(self.medium.speed_of_light > 0.0) {
            return Err(SimError::config("medium.speed_of_light must be positive"));
        }
        if self.milestone_period == Some(0) {
            return Err(SimError::config("milestone_period must be positive"));
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_end(mut self, end: Time) -> Self {
        self.simulation_end = Some(end);
        self
    }

    pub fn with_milestones(mut self, period: Time) -> Self {
        self.milestone_period = Some(period);
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.record_trace = true;
        self
    }
}
