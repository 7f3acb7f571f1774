use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::error::{Result, SimError};
use crate::Time;

/// PER is recorded in parts per million.
const PER_SCALE: f64 = 1_000_000.0;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct MetricPoint {
    pub sim_time: Time,
    pub dispatched: u64,
    pub pending: usize,
    pub p50_per: f64,
}

pub struct DispatchStats {
    pub history: VecDeque<MetricPoint>,
    pub max_points: usize,
    counts: BTreeMap<&'static str, u64>,
    dispatched: u64,
    queue_depth: Histogram<u64>,
    per: Histogram<u64>,
}

impl DispatchStats {
    pub fn new(max_points: usize) -> Result<Self> {
        let queue_depth = Histogram::new(3).map_err(SimError::config)?;
        let per = Histogram::new_with_max(PER_SCALE as u64, 3).map_err(SimError::config)?;
        Ok(Self {
            history: VecDeque::with_capacity(max_points),
            max_points,
            counts: BTreeMap::new(),
            dispatched: 0,
            queue_depth,
            per,
        })
    }

    pub fn record_dispatch(&mut self, label: &'static str, pending: usize) {
        *self.counts.entry(label).or_insert(0) += 1;
        self.dispatched += 1;
        self.queue_depth.saturating_record(pending as u64);
    }

    pub fn record_per(&mut self, per: f64) {
        self.per
            .saturating_record((per.clamp(0.0, 1.0) * PER_SCALE).round() as u64);
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Dispatch count per event kind.
    pub fn counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.counts
    }

    pub fn count(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn receptions(&self) -> u64 {
        self.per.len()
    }

    /// PER at percentile `p` (0-100) over every completed reception.
    pub fn per_percentile(&self, p: f64) -> Option<f64> {
        if self.per.is_empty() {
            return None;
        }
        Some(self.per.value_at_percentile(p) as f64 / PER_SCALE)
    }

    pub fn queue_depth_percentile(&self, p: f64) -> Option<u64> {
        if self.queue_depth.is_empty() {
            return None;
        }
        Some(self.queue_depth.value_at_percentile(p))
    }

    pub fn sample(&mut self, sim_time: Time, pending: usize) {
        self.history.push_back(MetricPoint {
            sim_time,
            dispatched: self.dispatched,
            pending,
            p50_per: self.per_percentile(50.0).unwrap_or(0.0),
        });

        if self.history.len() > self.max_points {
            self.history.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.counts.clear();
        self.dispatched = 0;
        self.queue_depth.reset();
        self.per.reset();
    }
}
