// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Pulse emulator for running without hardware.
//!
//! Drives one emulated line per meter with a periodic low-then-high pulse,
//! held low long enough to survive the meter's debounce window.

use std::sync::Arc;
use std::time::Duration;

use s0counter::{EmulatedLine, Level};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MIN_PULSE_WIDTH: Duration = Duration::from_millis(30);

/// Configuration for one emulated pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseConfig {
    /// Time between the starts of two pulses
    pub interval: Duration,
    /// Time the line is held low
    pub width: Duration,
}

impl PulseConfig {
    /// Pulse train for a meter with the given debounce window
    pub fn new(interval: Duration, debounce: Duration) -> Self {
        Self {
            interval,
            width: (debounce * 2).max(MIN_PULSE_WIDTH),
        }
    }
}

/// Spawn a task emitting pulses on `line` until `cancel` fires.
pub fn spawn_pulses(
    line: Arc<EmulatedLine>,
    config: PulseConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    line.inject(Level::Low);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            line.set_level(Level::High);
                            break;
                        }
                        _ = tokio::time::sleep(config.width) => line.inject(Level::High),
                    }
                }
            }
        }
        debug!("pulse emulator stopped");
    })
}
