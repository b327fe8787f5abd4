//! Adaptive signal timing engine.
//!
//! `compute_timing` is a pure function over (count, waiting, history, config)
//! plus an injected RNG. The waiting-time jitter is deliberate; injecting the
//! RNG keeps the control loop testable with a seeded generator.

use anyhow::{Result, ensure};
use rand::Rng;
use serde::Serialize;

use crate::history::CountHistory;

/// Upper bound on the waiting-time estimate, in seconds.
pub const MAX_WAITING_SECONDS: u32 = 45;

/// Process-wide signal timing configuration, loaded once at startup.
#[derive(Clone, Copy, Debug)]
pub struct SignalConfig {
    pub min_green: u32,
    pub base_green: u32,
    pub max_green: u32,
    pub red_time: u32,
    pub vehicle_increment: f64,
    pub max_waiting_penalty: f64,
    /// Density label boundaries, inclusive: `count <= low` is Low,
    /// `count <= medium` is Medium, anything above is High.
    pub low_threshold: u32,
    pub medium_threshold: u32,
    pub bottleneck_threshold: u32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_green: 20,
            base_green: 30,
            max_green: 60,
            red_time: 25,
            vehicle_increment: 1.5,
            max_waiting_penalty: 15.0,
            low_threshold: 8,
            medium_threshold: 20,
            bottleneck_threshold: 25,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.min_green > 0, "min_green must be positive");
        ensure!(
            self.min_green <= self.base_green && self.base_green <= self.max_green,
            "green times must satisfy min_green <= base_green <= max_green"
        );
        ensure!(self.red_time > 0, "red_time must be positive");
        ensure!(
            self.vehicle_increment > 0.0,
            "vehicle_increment must be positive"
        );
        ensure!(
            self.max_waiting_penalty > 0.0,
            "max_waiting_penalty must be positive"
        );
        ensure!(
            self.low_threshold < self.medium_threshold,
            "low_threshold must be below medium_threshold"
        );
        ensure!(
            self.bottleneck_threshold > 0,
            "bottleneck_threshold must be positive"
        );
        Ok(())
    }
}

/// Output of one timing computation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingResult {
    pub green: u32,
    pub waiting: u32,
    pub co2_reduction: f64,
    pub efficiency_ratio: f64,
    pub cycle_time: u32,
}

/// Coarse traffic-load classification derived from the vehicle count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DensityLabel {
    Low,
    Medium,
    High,
}

impl DensityLabel {
    pub fn label(self) -> &'static str {
        match self {
            DensityLabel::Low => "Low",
            DensityLabel::Medium => "Medium",
            DensityLabel::High => "High",
        }
    }
}

pub fn density_label(count: u32, config: &SignalConfig) -> DensityLabel {
    if count <= config.low_threshold {
        DensityLabel::Low
    } else if count <= config.medium_threshold {
        DensityLabel::Medium
    } else {
        DensityLabel::High
    }
}

/// Map the current vehicle count and waiting-time estimate to a green-time
/// recommendation plus derived quantities.
///
/// `history` is read-only here; the caller pushes the current count before
/// computing, so trend correction engages from the fourth sample onward.
/// Total over all non-negative counts and waiting times in `[0, 45]`.
pub fn compute_timing(
    count: u32,
    waiting: u32,
    history: &CountHistory,
    config: &SignalConfig,
    rng: &mut impl Rng,
) -> TimingResult {
    // Step 1: base response by count band.
    let mut green = match count {
        0 => config.min_green as f64,
        1..=5 => config.base_green as f64,
        6..=15 => config.base_green as f64 + (count - 5) as f64 * config.vehicle_increment,
        _ => {
            config.base_green as f64
                + 10.0 * config.vehicle_increment
                + ((count - 15) as f64 * 0.25).min(config.max_waiting_penalty)
        }
    };
    let next_waiting = match count {
        0 => waiting.saturating_sub(2) as f64,
        1..=5 => waiting.saturating_sub(1) as f64,
        6..=15 => waiting as f64 + rng.random_range(0..=2u32) as f64,
        _ => waiting as f64 + rng.random_range(2..=4u32) as f64,
    };

    // Step 2: trend correction, damping single-frame spikes against the
    // short rolling average. Skipped for short windows and zero averages;
    // the startup transient intentionally runs uncorrected.
    if history.len() > 3 {
        let recent = history.recent_average(3);
        if recent > 0.0 {
            let trend = (count as f64 / recent).clamp(0.8, 1.2);
            green *= trend;
        }
    }

    // Step 3: clamp into configured bounds.
    let green = (green.round() as i64).clamp(config.min_green as i64, config.max_green as i64)
        as u32;
    let waiting =
        (next_waiting.round() as i64).clamp(0, MAX_WAITING_SECONDS as i64) as u32;

    // Step 4: derived quantities.
    let cycle_time = green + config.red_time;
    let efficiency_ratio = green as f64 / cycle_time as f64;
    let mut co2_reduction = count as f64 * 0.08 * (efficiency_ratio * 1.2).min(1.0);
    if count > 10 && green < config.max_green {
        co2_reduction *= 1.1;
    }

    TimingResult {
        green,
        waiting,
        co2_reduction,
        efficiency_ratio,
        cycle_time,
    }
}
