//! Per-meter counter state
//!
//! Each [`Meter`] owns its [`MeterState`] behind a dedicated reader/writer
//! lock, so edges on unrelated meters never contend. Every read-modify-write
//! happens inside a single critical section.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::calc::{self, Reading};
use crate::config::MeterConfig;

/// Mutable counter state of a meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterState {
    /// Accepted edges; never decreases
    pub ticks: u64,
    /// Timestamp of the most recent accepted edge
    pub last_edge: DateTime<Utc>,
    /// Timestamp of the edge before that
    pub previous_edge: DateTime<Utc>,
}

impl Default for MeterState {
    fn default() -> Self {
        Self {
            ticks: 0,
            last_edge: DateTime::<Utc>::UNIX_EPOCH,
            previous_edge: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A configured meter and its counter state
pub struct Meter {
    config: MeterConfig,
    state: RwLock<MeterState>,
}

impl Meter {
    /// Create a meter with zero-valued state
    pub fn new(config: MeterConfig) -> Self {
        Self {
            config,
            state: RwLock::new(MeterState::default()),
        }
    }

    /// Meter name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Meter configuration
    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Count one accepted edge observed at `timestamp`.
    ///
    /// Returns the tick count after the edge.
    pub fn record_edge(&self, timestamp: DateTime<Utc>) -> u64 {
        let mut state = self.write();
        state.previous_edge = state.last_edge;
        state.last_edge = timestamp;
        state.ticks = state.ticks.saturating_add(1);
        state.ticks
    }

    /// Copy of the current state
    pub fn state(&self) -> MeterState {
        *self.read()
    }

    /// Current tick count
    pub fn ticks(&self) -> u64 {
        self.read().ticks
    }

    /// Cumulative counter value
    pub fn counter(&self) -> f64 {
        calc::counter_value(self.ticks(), self.config.counter_constant)
    }

    /// Instantaneous gauge at `now`
    pub fn gauge(&self, now: DateTime<Utc>) -> f64 {
        calc::gauge_value(&self.state(), &self.config, now)
    }

    /// Counter and gauge computed from one consistent state copy
    pub fn reading(&self, now: DateTime<Utc>) -> Reading {
        Reading::compute(&self.state(), &self.config, now)
    }

    /// Overwrite the state from a snapshot. The previous edge is reset so the
    /// first gauge after a restart relies on the staleness widening.
    pub fn restore(&self, ticks: u64, last_edge: DateTime<Utc>) {
        let mut state = self.write();
        state.ticks = ticks;
        state.last_edge = last_edge;
        state.previous_edge = DateTime::<Utc>::UNIX_EPOCH;
    }

    fn read(&self) -> RwLockReadGuard<'_, MeterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MeterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter")
            .field("name", &self.config.name)
            .field("line", &self.config.line)
            .field("state", &self.state())
            .finish()
    }
}
