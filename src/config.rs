//! Configuration types for the S0 counter
//!
//! Configurations are immutable once a [`MeterRegistry`](crate::MeterRegistry)
//! has been built from them. Validation happens up front so that an invalid
//! meter is rejected before any hardware line is touched.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::ConfigError;
use crate::line::{EdgePolicy, LineId};

/// Per-meter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MeterConfig {
    /// Meter name, unique within a registry
    pub name: String,

    /// Hardware line the S0 output is wired to
    pub line: LineId,

    /// Debounce window (zero disables debouncing)
    pub debounce: Duration,

    /// Which settled levels count as a pulse
    pub edge: EdgePolicy,

    /// Pulses per physical unit, e.g. 1000 imp/kWh (must be > 0)
    pub counter_constant: f64,

    /// Multiplier applied to the gauge (default: 1)
    pub scale_factor: f64,

    /// Decimal places the gauge is rounded to
    pub precision: u32,

    /// Unit of the counter value, e.g. kWh
    pub unit_counter: String,

    /// Unit of the gauge value, e.g. kW
    pub unit_gauge: String,

    /// Topic readings of this meter are published under
    pub topic: String,
}

impl MeterConfig {
    /// Create a configuration with default debounce, edge, scale and units
    pub fn new(name: impl Into<String>, line: LineId, counter_constant: f64) -> Self {
        let name = name.into();
        Self {
            topic: format!("s0counter/{}", name),
            name,
            line,
            debounce: Duration::ZERO,
            edge: EdgePolicy::default(),
            counter_constant,
            scale_factor: 1.0,
            precision: 0,
            unit_counter: String::new(),
            unit_gauge: String::new(),
        }
    }

    /// Set the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the edge policy
    pub fn with_edge(mut self, edge: EdgePolicy) -> Self {
        self.edge = edge;
        self
    }

    /// Set the gauge scale factor
    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    /// Set the gauge precision
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Set the counter and gauge units
    pub fn with_units(mut self, counter: impl Into<String>, gauge: impl Into<String>) -> Self {
        self.unit_counter = counter.into();
        self.unit_gauge = gauge.into();
        self
    }

    /// Set the publish topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Check the invariants of a single meter
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.counter_constant.is_finite() && self.counter_constant > 0.0) {
            return Err(ConfigError::InvalidCounterConstant {
                meter: self.name.clone(),
                value: self.counter_constant,
            });
        }
        if !self.scale_factor.is_finite() {
            return Err(ConfigError::InvalidScaleFactor {
                meter: self.name.clone(),
                value: self.scale_factor,
            });
        }
        Ok(())
    }
}

/// Check a full meter set: at least one meter, every meter valid, names and
/// lines unique.
pub fn validate_meters(configs: &[MeterConfig]) -> Result<(), ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::NoMeters);
    }

    let mut names = HashSet::new();
    let mut lines: HashMap<LineId, &str> = HashMap::new();

    for config in configs {
        config.validate()?;

        if !names.insert(config.name.as_str()) {
            return Err(ConfigError::DuplicateMeter(config.name.clone()));
        }
        if let Some(first) = lines.insert(config.line, &config.name) {
            return Err(ConfigError::DuplicateLine {
                line: config.line,
                first: first.to_string(),
                second: config.name.clone(),
            });
        }
    }

    Ok(())
}

/// Periodic task intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionConfig {
    /// How often readings are computed and published (default: 5s)
    pub data_collection_interval: Duration,

    /// How often a snapshot is saved (default: 60s)
    pub backup_interval: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            data_collection_interval: Duration::from_secs(5),
            backup_interval: Duration::from_secs(60),
        }
    }
}

impl CollectionConfig {
    /// Both intervals must be > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_collection_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("data collection interval"));
        }
        if self.backup_interval.is_zero() {
            return Err(ConfigError::InvalidInterval("backup interval"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_config_defaults() {
        let config = MeterConfig::new("power", 17, 1000.0);
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.edge, EdgePolicy::Falling);
        assert_eq!(config.scale_factor, 1.0);
        assert_eq!(config.precision, 0);
        assert_eq!(config.topic, "s0counter/power");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_meter_config_builders() {
        let config = MeterConfig::new("water", 27, 1.0)
            .with_debounce(Duration::from_millis(50))
            .with_edge(EdgePolicy::Rising)
            .with_scale_factor(1000.0)
            .with_precision(2)
            .with_units("m³", "l/h")
            .with_topic("home/water");
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.edge, EdgePolicy::Rising);
        assert_eq!(config.unit_gauge, "l/h");
        assert_eq!(config.topic, "home/water");
    }

    #[test]
    fn test_counter_constant_must_be_positive() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = MeterConfig::new("bad", 1, value);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidCounterConstant { .. })
            ));
        }
    }

    #[test]
    fn test_scale_factor_must_be_finite() {
        let config = MeterConfig::new("bad", 1, 100.0).with_scale_factor(f64::NAN);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScaleFactor { .. })
        ));
    }

    #[test]
    fn test_validate_meters_duplicates() {
        let result = validate_meters(&[
            MeterConfig::new("power", 17, 1000.0),
            MeterConfig::new("heat", 17, 100.0),
        ]);
        assert_eq!(
            result,
            Err(ConfigError::DuplicateLine {
                line: 17,
                first: "power".to_string(),
                second: "heat".to_string(),
            })
        );

        let result = validate_meters(&[
            MeterConfig::new("power", 17, 1000.0),
            MeterConfig::new("power", 18, 1000.0),
        ]);
        assert_eq!(result, Err(ConfigError::DuplicateMeter("power".to_string())));

        assert_eq!(validate_meters(&[]), Err(ConfigError::NoMeters));
    }

    #[test]
    fn test_collection_config() {
        assert!(CollectionConfig::default().validate().is_ok());
        let config = CollectionConfig {
            backup_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidInterval("backup interval"))
        );
    }
}
