//! Hardware line abstraction
//!
//! A [`LineProvider`] hands out exclusive [`Line`] handles. A line reports
//! raw level transitions to a registered handler and can be asked for its
//! current level. Two backends exist: [`EmulatedChip`] keeps the level in
//! memory and lets callers inject transitions, and (with the `gpio` feature)
//! [`CdevChip`] drives a Linux GPIO character device.

mod emulated;

#[cfg(feature = "gpio")]
mod cdev;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HardwareError;

pub use emulated::{EmulatedChip, EmulatedLine};

#[cfg(feature = "gpio")]
pub use cdev::{CdevChip, CdevLine};

/// Hardware line identifier (GPIO offset)
pub type LineId = u32;

/// Callback invoked for every raw transition with the time it was observed
pub type RawTransitionHandler = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Logical level of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Line pulled to ground
    Low,
    /// Line at supply voltage
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

/// Which settled levels produce a logical edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    /// Never dispatch
    None,
    /// Dispatch when the line settles high
    Rising,
    /// Dispatch when the line settles low (S0 outputs pull an idle-high line low)
    #[default]
    Falling,
    /// Dispatch whenever the settled level differs from the previous one
    Both,
}

impl EdgePolicy {
    /// Decide whether a settled `level` is a logical edge, given the level
    /// that was stable before the evaluation window began.
    pub fn accepts(self, previous: Level, level: Level) -> bool {
        match self {
            Self::None => false,
            Self::Rising => level == Level::High,
            Self::Falling => level == Level::Low,
            Self::Both => level != previous,
        }
    }
}

impl fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

/// A single requested hardware line
pub trait Line: Send + Sync {
    /// Line identifier
    fn id(&self) -> LineId;

    /// Read the current level
    fn read_level(&self) -> Result<Level, HardwareError>;

    /// Start delivering raw transitions to `handler`, replacing any previous one
    fn watch(&self, handler: RawTransitionHandler) -> Result<(), HardwareError>;

    /// Stop delivering raw transitions. Once this returns no further call
    /// into the previously registered handler is started.
    fn unwatch(&self);
}

/// Source of exclusive line handles (a GPIO chip)
pub trait LineProvider: Send + Sync {
    /// Request exclusive use of a line
    fn request_line(&self, id: LineId) -> Result<Arc<dyn Line>, HardwareError>;

    /// Release a line so it can be requested again
    fn release(&self, id: LineId) -> Result<(), HardwareError>;
}
