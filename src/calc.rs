//! Derived values: counter reading and instantaneous gauge
//!
//! The gauge is computed from the interval between the last two accepted
//! edges:
//!
//! ```text
//! rate = 3600 / (dt[s] * counter_constant) * scale_factor
//! ```
//!
//! When the time since the last edge exceeds that interval, `dt` is widened
//! to the time since the penultimate edge, so the rate decays towards zero
//! once pulses stop instead of freezing at its last value. Before any edge
//! has been seen both timestamps sit at the Unix epoch, which yields a tiny
//! but finite rate.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MeterConfig;
use crate::meter::MeterState;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// A computed reading of one meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the reading was computed
    #[serde(rename = "TimeStamp")]
    pub timestamp: DateTime<Utc>,
    /// Cumulative counter value, e.g. kWh
    #[serde(rename = "Counter")]
    pub counter: f64,
    /// Unit of the counter value
    #[serde(rename = "UnitCounter")]
    pub unit_counter: String,
    /// Instantaneous rate, e.g. kW
    #[serde(rename = "Gauge")]
    pub gauge: f64,
    /// Unit of the gauge value
    #[serde(rename = "UnitGauge")]
    pub unit_gauge: String,
}

impl Reading {
    /// Compute a reading from a state copy taken under one read lock
    pub fn compute(state: &MeterState, config: &MeterConfig, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            counter: counter_value(state.ticks, config.counter_constant),
            unit_counter: config.unit_counter.clone(),
            gauge: gauge_value(state, config, now),
            unit_gauge: config.unit_gauge.clone(),
        }
    }
}

/// Cumulative counter value: `ticks / counter_constant`, unrounded
pub fn counter_value(ticks: u64, counter_constant: f64) -> f64 {
    ticks as f64 / counter_constant
}

/// Instantaneous gauge at `now`, rounded to the configured precision
pub fn gauge_value(state: &MeterState, config: &MeterConfig, now: DateTime<Utc>) -> f64 {
    let mut dt = state.last_edge - state.previous_edge;

    if now - state.last_edge > dt {
        dt = now - state.previous_edge;
    }

    let rate = SECONDS_PER_HOUR / (seconds(dt) * config.counter_constant) * config.scale_factor;
    round_half_away(rate, config.precision)
}

/// Round to `precision` decimal places, halves away from zero
pub fn round_half_away(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(i32::MAX as u32) as i32);
    if !factor.is_finite() {
        return value;
    }
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

fn seconds(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) * 1e-9
}
