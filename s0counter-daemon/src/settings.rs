// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Settings file
//!
//! The daemon reads a YAML file describing the meters, the periodic
//! intervals, the snapshot file, the HTTP listener and the MQTT broker.
//! Everything except the meter list has a default.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use s0counter::{CollectionConfig, ConfigError, EdgePolicy, LineId, MeterConfig};
use serde::Deserialize;

use crate::error::DaemonError;

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between published readings
    pub data_collection_interval_secs: u64,
    /// Seconds between snapshot saves
    pub backup_interval_secs: u64,
    /// Snapshot file
    pub data_file: String,
    /// GPIO character device
    pub gpio_chip: String,
    pub webserver: WebserverSettings,
    pub mqtt: MqttSettings,
    /// Meters keyed by name
    pub meters: BTreeMap<String, MeterSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_collection_interval_secs: 5,
            backup_interval_secs: 60,
            data_file: "/opt/s0counter/measurement.yaml".to_string(),
            gpio_chip: "/dev/gpiochip0".to_string(),
            webserver: WebserverSettings::default(),
            mqtt: MqttSettings::default(),
            meters: BTreeMap::new(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebserverSettings {
    /// Listen address, `host:port`
    pub listen: String,
    pub webservices: Webservices,
}

impl Default for WebserverSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".to_string(),
            webservices: Webservices::default(),
        }
    }
}

/// Which HTTP routes are registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Webservices {
    /// `GET /version`
    pub version: bool,
    /// `GET /health`
    pub health: bool,
    /// `GET /currentdata`, readings of every meter
    pub currentdata: bool,
    /// `GET /metrics`, Prometheus text format
    pub metrics: bool,
}

impl Default for Webservices {
    fn default() -> Self {
        Self {
            version: true,
            health: true,
            currentdata: true,
            metrics: true,
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Publish readings to the broker; otherwise they are only logged
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Must not be empty or start with a space
    pub client_id: String,
    /// Publish with the retain flag set
    pub retained: bool,
    /// Seconds between keep-alive pings
    pub keep_alive_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "s0counter".to_string(),
            retained: false,
            keep_alive_secs: 30,
        }
    }
}

/// Settings of one meter
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterSettings {
    /// GPIO line offset (required)
    pub gpio: Option<LineId>,
    #[serde(default)]
    pub bounce_time_ms: u64,
    #[serde(default)]
    pub edge: EdgePolicy,
    pub counter_constant: f64,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub unit_counter: String,
    #[serde(default)]
    pub unit_gauge: String,
    pub topic: Option<String>,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl Settings {
    /// Read and parse a settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DaemonError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse settings from YAML text
    pub fn parse(content: &str) -> Result<Self, DaemonError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Build core meter configurations; fails on the first invalid meter
    pub fn meter_configs(&self) -> Result<Vec<MeterConfig>, ConfigError> {
        self.meters
            .iter()
            .map(|(name, meter)| {
                let line = meter
                    .gpio
                    .ok_or_else(|| ConfigError::MissingLine(name.clone()))?;
                let mut config = MeterConfig::new(name.as_str(), line, meter.counter_constant)
                    .with_debounce(Duration::from_millis(meter.bounce_time_ms))
                    .with_edge(meter.edge)
                    .with_scale_factor(meter.scale_factor)
                    .with_precision(meter.precision)
                    .with_units(meter.unit_counter.as_str(), meter.unit_gauge.as_str());
                if let Some(topic) = &meter.topic {
                    config = config.with_topic(topic.as_str());
                }
                config.validate()?;
                Ok(config)
            })
            .collect()
    }

    /// Periodic task intervals
    pub fn collection(&self) -> Result<CollectionConfig, ConfigError> {
        let config = CollectionConfig {
            data_collection_interval: Duration::from_secs(self.data_collection_interval_secs),
            backup_interval: Duration::from_secs(self.backup_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_collection_interval_secs: 10
data_file: /tmp/measurement.yaml
webserver:
  listen: 127.0.0.1:8080
  webservices:
    metrics: false
mqtt:
  enabled: true
  host: broker.local
  retained: true
meters:
  power:
    gpio: 17
    bounce_time_ms: 20
    counter_constant: 1000
    precision: 2
    unit_counter: kWh
    unit_gauge: kW
  water:
    gpio: 27
    edge: rising
    counter_constant: 1
    scale_factor: 1000
    unit_counter: m³
    unit_gauge: l/h
    topic: home/water
"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.data_collection_interval_secs, 10);
        assert_eq!(settings.backup_interval_secs, 60);
        assert_eq!(settings.gpio_chip, "/dev/gpiochip0");
        assert_eq!(settings.webserver.listen, "127.0.0.1:8080");
        assert!(!settings.webserver.webservices.metrics);
        assert!(settings.webserver.webservices.currentdata);
        assert!(settings.mqtt.enabled);
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.meters.len(), 2);
    }

    #[test]
    fn test_meter_configs() {
        let settings = Settings::parse(SAMPLE).unwrap();
        let configs = settings.meter_configs().unwrap();

        let power = &configs[0];
        assert_eq!(power.name, "power");
        assert_eq!(power.line, 17);
        assert_eq!(power.debounce, Duration::from_millis(20));
        assert_eq!(power.edge, EdgePolicy::Falling);
        assert_eq!(power.scale_factor, 1.0);
        assert_eq!(power.topic, "s0counter/power");

        let water = &configs[1];
        assert_eq!(water.edge, EdgePolicy::Rising);
        assert_eq!(water.scale_factor, 1000.0);
        assert_eq!(water.topic, "home/water");
    }

    #[test]
    fn test_missing_gpio_rejected() {
        let settings = Settings::parse("meters:\n  heat:\n    counter_constant: 10\n").unwrap();
        assert_eq!(
            settings.meter_configs(),
            Err(ConfigError::MissingLine("heat".to_string()))
        );
    }

    #[test]
    fn test_zero_counter_constant_rejected() {
        let settings =
            Settings::parse("meters:\n  heat:\n    gpio: 4\n    counter_constant: 0\n").unwrap();
        assert!(matches!(
            settings.meter_configs(),
            Err(ConfigError::InvalidCounterConstant { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = Settings::parse("backup_interval_secs: 0\n").unwrap();
        assert_eq!(
            settings.collection(),
            Err(ConfigError::InvalidInterval("backup interval"))
        );
        assert!(Settings::default().collection().is_ok());
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../config/s0counter.yaml");
        let settings = Settings::load(path).unwrap();
        let configs = settings.meter_configs().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].scale_factor, 0.001);
        assert!(settings.collection().is_ok());
    }

    #[test]
    fn test_unknown_edge_rejected() {
        let result = Settings::parse("meters:\n  heat:\n    gpio: 4\n    edge: sideways\n    counter_constant: 1\n");
        assert!(matches!(result, Err(DaemonError::Yaml(_))));
    }
}
