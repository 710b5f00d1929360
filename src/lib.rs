//! # s0counter - S0 pulse counting
//!
//! Turns noisy level transitions on digital input lines ("S0 pulses" from
//! utility meters) into a cumulative tick count and an instantaneous rate.
//!
//! ## Pipeline
//!
//! - **Line**: a hardware input reporting raw transitions
//! - **Debouncer**: collapses bounce into logical edges per edge policy
//! - **Registry**: maps lines to meters and counts edges under a per-meter lock
//! - **Calculator**: derives counter value and gauge from tick history
//! - **Snapshot**: exports and restores counter state across restarts
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use s0counter::{Debouncer, EmulatedChip, Level, LineProvider, MeterConfig, MeterRegistry};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> s0counter::Result<()> {
//! let config = MeterConfig::new("power", 17, 1000.0).with_units("kWh", "kW");
//! let registry = Arc::new(MeterRegistry::new(vec![config.clone()])?);
//!
//! let chip = EmulatedChip::new();
//! let line = chip.request_line(config.line)?;
//! let debouncer = Debouncer::new(line, config.edge, config.debounce, registry.clone())?;
//! debouncer.attach()?;
//!
//! let emulated = chip.line(17).unwrap();
//! emulated.inject(Level::Low);
//! emulated.inject(Level::High);
//!
//! assert_eq!(registry.get("power").unwrap().ticks(), 1);
//! # Ok(())
//! # }
//! ```

pub mod calc;
pub mod config;
pub mod debounce;
pub mod error;
pub mod line;
pub mod meter;
pub mod publish;
pub mod registry;
pub mod snapshot;

// Re-exports for convenient access
pub use calc::Reading;
pub use config::{validate_meters, CollectionConfig, MeterConfig};
pub use debounce::{Debouncer, EdgeSink, LogicalEdge};
pub use error::{ConfigError, HardwareError, PersistenceError, PublishError, Result, S0Error};
pub use line::{
    EdgePolicy, EmulatedChip, EmulatedLine, Level, Line, LineId, LineProvider,
    RawTransitionHandler,
};
pub use meter::{Meter, MeterState};
pub use publish::{publish_readings, Publisher, RecordingPublisher};
pub use registry::MeterRegistry;
pub use snapshot::{MemorySnapshotStore, SnapshotEntry, SnapshotStore};

#[cfg(feature = "gpio")]
pub use line::{CdevChip, CdevLine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
