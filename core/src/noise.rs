//! Interference accounting per receiving interface.
//!
//! Each interface owns a chain of disjoint, contiguous time intervals keyed
//! by their start. An interval carries the number of receptions active over
//! it and the linear (mW) interference each channel sees there. Adding a
//! reception splits the intervals at its edges and adds its contribution to
//! every piece it covers; completing a reception decrements the counts and
//! releases drained intervals from the head of the chain.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::modulation::{dbm_to_mw, mw_to_dbm};
use crate::radio::{InterfaceId, Reception};
use crate::Time;

/// How interference overlapping one frame collapses to a single value.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Averaging {
    /// Worst interval overlapping the frame.
    #[default]
    Max,
    /// Time-weighted mean over the frame.
    Mean,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct NoiseConfig {
    pub channels: usize,
    /// Linear fraction of a signal's power leaking into each adjacent channel.
    pub coupling: f64,
    pub white_noise_dbm: f64,
    pub thermal_floor_dbm: f64,
    /// Frame granularity for error integration, in nanoseconds.
    pub frame_duration: Time,
    pub averaging: Averaging,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            channels: 16,
            coupling: 0.0,
            white_noise_dbm: -100.0,
            thermal_floor_dbm: -174.0,
            frame_duration: 100_000,
            averaging: Averaging::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseInterval {
    pub begin: Time,
    pub end: Time,
    pub active_count: u32,
    /// Accumulated interference per channel, mW.
    pub noise: Vec<f64>,
}

/// Noise seen by one frame of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameNoise {
    pub begin: f64,
    pub end: f64,
    pub noise_mw: f64,
    pub snr_db: f64,
    pub ber: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NoiseChain {
    intervals: BTreeMap<Time, NoiseInterval>,
}

impl NoiseChain {
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> impl Iterator<Item = &NoiseInterval> {
        self.intervals.values()
    }

    pub fn at(&self, t: Time) -> Option<&NoiseInterval> {
        self.intervals
            .range(..=t)
            .next_back()
            .map(|(_, iv)| iv)
            .filter(|iv| t < iv.end)
    }

    /// Cuts the interval straddling `t` in two so that `t` is a boundary.
    fn split_at(&mut self, t: Time) {
        let Some((_, iv)) = self.intervals.range_mut(..t).next_back() else {
            return;
        };
        if iv.end <= t {
            return;
        }
        let tail = NoiseInterval {
            begin: t,
            end: iv.end,
            active_count: iv.active_count,
            noise: iv.noise.clone(),
        };
        iv.end = t;
        self.intervals.insert(t, tail);
    }

    fn add(&mut self, begin: Time, end: Time, contribution: &[f64]) {
        self.split_at(begin);
        self.split_at(end);

        let mut gaps = Vec::new();
        let mut cursor = begin;
        for (&start, iv) in self.intervals.range_mut(begin..end) {
            if start > cursor {
                gaps.push((cursor, start));
            }
            iv.active_count += 1;
            for (n, c) in iv.noise.iter_mut().zip(contribution) {
                *n += c;
            }
            cursor = iv.end;
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        for (b, e) in gaps {
            self.intervals.insert(
                b,
                NoiseInterval {
                    begin: b,
                    end: e,
                    active_count: 1,
                    noise: contribution.to_vec(),
                },
            );
        }

        // keep the chain contiguous around the new span
        let channels = contribution.len();
        if let Some(prev_end) = self.intervals.range(..begin).next_back().map(|(_, iv)| iv.end) {
            if prev_end < begin {
                self.insert_silence(prev_end, begin, channels);
            }
        }
        if let Some(&next_begin) = self.intervals.range(end..).next().map(|(k, _)| k) {
            if next_begin > end {
                self.insert_silence(end, next_begin, channels);
            }
        }
    }

    fn insert_silence(&mut self, begin: Time, end: Time, channels: usize) {
        self.intervals.insert(
            begin,
            NoiseInterval {
                begin,
                end,
                active_count: 0,
                noise: vec![0.0; channels],
            },
        );
    }

    fn release(&mut self, begin: Time, end: Time) {
        for (_, iv) in self.intervals.range_mut(begin..end) {
            iv.active_count = iv.active_count.saturating_sub(1);
        }
    }

    /// Drops drained intervals from the head. Returns how many were released.
    fn collect_garbage(&mut self) -> usize {
        let mut released = 0;
        while let Some(entry) = self.intervals.first_entry() {
            if entry.get().active_count != 0 {
                break;
            }
            entry.remove();
            released += 1;
        }
        released
    }
}

pub struct NoiseAccumulator {
    config: NoiseConfig,
    alpha: Vec<Vec<f64>>,
    white_mw: f64,
    floor_mw: f64,
    chains: HashMap<InterfaceId, NoiseChain>,
}

impl NoiseAccumulator {
    pub fn new(config: NoiseConfig) -> Self {
        assert!(config.channels > 0, "noise accumulator needs at least one channel");
        let alpha = (0..config.channels)
            .map(|i| {
                (0..config.channels)
                    .map(|c| match i.abs_diff(c) {
                        0 => 1.0,
                        1 => config.coupling,
                        _ => 0.0,
                    })
                    .collect()
            })
            .collect();
        Self {
            white_mw: dbm_to_mw(config.white_noise_dbm),
            floor_mw: dbm_to_mw(config.thermal_floor_dbm),
            alpha,
            config,
            chains: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Fraction of a signal on `from` that lands on `to`.
    pub fn alpha(&self, from: usize, to: usize) -> f64 {
        self.alpha[from][to]
    }

    pub fn chain(&self, interface: InterfaceId) -> Option<&NoiseChain> {
        self.chains.get(&interface)
    }

    fn contribution(&self, channel: usize, rx_mw: f64) -> Vec<f64> {
        assert!(
            channel < self.config.channels,
            "channel {channel} out of range ({} channels)",
            self.config.channels
        );
        self.alpha[channel].iter().map(|a| a * rx_mw).collect()
    }

    /// Accounts a signal received at `interface` over `[begin, end)`.
    pub fn add_signal(&mut self, interface: InterfaceId, begin: Time, end: Time, channel: usize, rx_mw: f64) {
        if begin >= end {
            return;
        }
        let contribution = self.contribution(channel, rx_mw);
        let chain = self.chains.entry(interface).or_default();
        chain.add(begin, end, &contribution);
        debug!(%interface, begin, end, channel, rx_mw, intervals = chain.len(), "noise added");
    }

    /// Marks a signal previously added over `[begin, end)` as finished and
    /// releases drained head intervals.
    pub fn remove_signal(&mut self, interface: InterfaceId, begin: Time, end: Time) {
        let Some(chain) = self.chains.get_mut(&interface) else {
            return;
        };
        chain.release(begin, end);
        let released = chain.collect_garbage();
        if chain.is_empty() {
            self.chains.remove(&interface);
        }
        debug!(%interface, begin, end, released, "noise released");
    }

    /// Runs head garbage collection on every chain.
    pub fn sweep(&mut self) -> usize {
        let mut released = 0;
        self.chains.retain(|_, chain| {
            released += chain.collect_garbage();
            !chain.is_empty()
        });
        released
    }

    /// Interference plus white noise on `channel` at time `at`, in mW.
    pub fn current_noise(&self, interface: InterfaceId, channel: usize, at: Time) -> f64 {
        let interference = self
            .chains
            .get(&interface)
            .and_then(|chain| chain.at(at))
            .and_then(|iv| iv.noise.get(channel).copied())
            .unwrap_or(0.0);
        self.floor(interference)
    }

    fn floor(&self, interference_mw: f64) -> f64 {
        (interference_mw.max(0.0) + self.white_mw).max(self.floor_mw)
    }

    /// Splits the reception into equal frames and evaluates noise, SNR and
    /// bit error probability for each, walking the chain backwards from the
    /// end of the packet.
    pub fn compute_frame_noise(&self, interface: InterfaceId, reception: &Reception) -> Vec<FrameNoise> {
        self.frame_noise_since(interface, reception, reception.begin)
    }

    /// Like [`compute_frame_noise`](Self::compute_frame_noise) for a
    /// reception whose own power sits in the chain only from
    /// `accounted_from` on, as after a late join. Earlier intervals are
    /// interference in full.
    pub fn frame_noise_since(&self, interface: InterfaceId, reception: &Reception, accounted_from: Time) -> Vec<FrameNoise> {
        let (begin, end) = (reception.begin, reception.end);
        if begin >= end {
            return Vec::new();
        }
        let channel = reception.signal.channel;
        let rx_mw = reception.rx_power_mw();
        let own = self.alpha[channel][channel] * rx_mw;

        let frame_duration = self.config.frame_duration.max(1);
        let count = (end - begin).div_ceil(frame_duration).max(1) as usize;
        let frame_len = (end - begin) as f64 / count as f64;

        let overlapping: Vec<&NoiseInterval> = match self.chains.get(&interface) {
            Some(chain) => chain
                .intervals
                .range(..end)
                .rev()
                .map(|(_, iv)| iv)
                .take_while(|iv| iv.end > begin)
                .collect(),
            None => Vec::new(),
        };

        let mut frames = vec![FrameNoise::default(); count];
        let mut first = 0;
        for k in (0..count).rev() {
            let fb = begin as f64 + k as f64 * frame_len;
            let fe = fb + frame_len;
            while first < overlapping.len() && overlapping[first].begin as f64 >= fe {
                first += 1;
            }

            let mut worst = 0.0_f64;
            let mut weighted = 0.0_f64;
            for iv in overlapping[first..].iter().take_while(|iv| iv.end as f64 > fb) {
                let interference = if iv.begin >= accounted_from {
                    (iv.noise[channel] - own).max(0.0)
                } else {
                    iv.noise[channel]
                };
                let span = fe.min(iv.end as f64) - fb.max(iv.begin as f64);
                worst = worst.max(interference);
                weighted += interference * span.max(0.0);
            }
            let interference = match self.config.averaging {
                Averaging::Max => worst,
                Averaging::Mean => weighted / frame_len,
            };

            let noise_mw = self.floor(interference);
            let snr_db = mw_to_dbm(rx_mw) - mw_to_dbm(noise_mw);
            frames[k] = FrameNoise {
                begin: fb,
                end: fe,
                noise_mw,
                snr_db,
                ber: reception.signal.modulation.bit_error_rate(snr_db),
            };
        }
        frames
    }

    /// `PER = 1 - prod(1 - ber_frame)^(frame_duration / bit_duration)`.
    pub fn integrate_packet_error(&self, interface: InterfaceId, reception: &Reception) -> f64 {
        self.integrate_packet_error_since(interface, reception, reception.begin)
    }

    pub fn integrate_packet_error_since(&self, interface: InterfaceId, reception: &Reception, accounted_from: Time) -> f64 {
        let frames = self.frame_noise_since(interface, reception, accounted_from);
        packet_error_rate(&frames, reception.signal.bit_duration)
    }
}

pub fn packet_error_rate(frames: &[FrameNoise], bit_duration: Time) -> f64 {
    let bit_duration = bit_duration.max(1) as f64;
    let mut log_success = 0.0;
    for frame in frames {
        if frame.ber >= 1.0 {
            return 1.0;
        }
        let bits = (frame.end - frame.begin) / bit_duration;
        log_success += bits * (-frame.ber).ln_1p();
    }
    (1.0 - log_success.exp()).clamp(0.0, 1.0)
}
