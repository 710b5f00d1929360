//! Meter registry and counter updater
//!
//! The registry owns every configured [`Meter`] and maps hardware lines to
//! them. It is built once from validated configuration and shared by
//! reference; meters are never added or removed afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::calc::Reading;
use crate::config::{validate_meters, MeterConfig};
use crate::debounce::{EdgeSink, LogicalEdge};
use crate::error::ConfigError;
use crate::line::LineId;
use crate::meter::Meter;

/// The set of configured meters
#[derive(Debug)]
pub struct MeterRegistry {
    /// Sorted by name
    meters: Vec<Arc<Meter>>,
    by_line: HashMap<LineId, usize>,
    by_name: HashMap<String, usize>,
}

impl MeterRegistry {
    /// Build a registry from meter configurations.
    ///
    /// Fails if the set is empty, a meter is invalid, or a name or line is
    /// used twice.
    pub fn new(configs: Vec<MeterConfig>) -> Result<Self, ConfigError> {
        validate_meters(&configs)?;

        let mut configs = configs;
        configs.sort_by(|a, b| a.name.cmp(&b.name));

        let mut meters = Vec::with_capacity(configs.len());
        let mut by_line = HashMap::with_capacity(configs.len());
        let mut by_name = HashMap::with_capacity(configs.len());

        for (index, config) in configs.into_iter().enumerate() {
            by_line.insert(config.line, index);
            by_name.insert(config.name.clone(), index);
            meters.push(Arc::new(Meter::new(config)));
        }

        Ok(Self {
            meters,
            by_line,
            by_name,
        })
    }

    /// Look up a meter by name
    pub fn get(&self, name: &str) -> Option<&Arc<Meter>> {
        self.by_name.get(name).map(|&i| &self.meters[i])
    }

    /// Look up the meter bound to a line
    pub fn by_line(&self, line: LineId) -> Option<&Arc<Meter>> {
        self.by_line.get(&line).map(|&i| &self.meters[i])
    }

    /// Iterate meters in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Meter>> {
        self.meters.iter()
    }

    /// Number of meters
    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// Always false for a constructed registry
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Meter names in order
    pub fn names(&self) -> Vec<String> {
        self.meters.iter().map(|m| m.name().to_string()).collect()
    }

    /// Apply a logical edge to the meter bound to `line`.
    ///
    /// Returns the new tick count, or `None` if no meter is bound to the line;
    /// such edges are logged and dropped.
    pub fn on_logical_edge(&self, line: LineId, timestamp: DateTime<Utc>) -> Option<u64> {
        let Some(meter) = self.by_line(line) else {
            log::warn!("edge on unmapped line {} dropped", line);
            return None;
        };
        let ticks = meter.record_edge(timestamp);
        log::debug!("{}: tick {}", meter.name(), ticks);
        Some(ticks)
    }

    /// Current reading of every meter, keyed by name
    pub fn current_data(&self, now: DateTime<Utc>) -> BTreeMap<String, Reading> {
        self.meters
            .iter()
            .map(|m| (m.name().to_string(), m.reading(now)))
            .collect()
    }
}

impl EdgeSink for MeterRegistry {
    fn on_logical_edge(&self, edge: LogicalEdge) {
        MeterRegistry::on_logical_edge(self, edge.line, edge.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Level;
    use chrono::TimeDelta;

    fn registry() -> MeterRegistry {
        MeterRegistry::new(vec![
            MeterConfig::new("power", 17, 1000.0).with_units("kWh", "kW"),
            MeterConfig::new("gas", 22, 100.0).with_units("m³", "m³/h"),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["gas", "power"]);
        assert_eq!(registry.by_line(17).unwrap().name(), "power");
        assert_eq!(registry.get("gas").unwrap().config().line, 22);
        assert!(registry.by_line(99).is_none());
        assert!(registry.get("water").is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = MeterRegistry::new(vec![MeterConfig::new("power", 17, 0.0)]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidCounterConstant { .. })
        ));
        assert!(matches!(
            MeterRegistry::new(Vec::new()),
            Err(ConfigError::NoMeters)
        ));
    }

    #[test]
    fn test_edge_updates_only_its_meter() {
        let registry = registry();
        let t = Utc::now();

        assert_eq!(registry.on_logical_edge(17, t), Some(1));
        assert_eq!(registry.on_logical_edge(17, t + TimeDelta::seconds(1)), Some(2));
        assert_eq!(registry.get("power").unwrap().ticks(), 2);
        assert_eq!(registry.get("gas").unwrap().ticks(), 0);
    }

    #[test]
    fn test_unmapped_edge_dropped() {
        let registry = registry();
        assert_eq!(registry.on_logical_edge(3, Utc::now()), None);
        assert!(registry.iter().all(|m| m.ticks() == 0));
    }

    #[test]
    fn test_edge_sink() {
        let registry = registry();
        let sink: &dyn EdgeSink = &registry;
        sink.on_logical_edge(LogicalEdge {
            line: 22,
            level: Level::Low,
            timestamp: Utc::now(),
        });
        assert_eq!(registry.get("gas").unwrap().ticks(), 1);
    }

    #[test]
    fn test_current_data() {
        let registry = registry();
        registry.on_logical_edge(17, Utc::now());
        let data = registry.current_data(Utc::now());
        assert_eq!(data.len(), 2);
        assert_eq!(data["power"].counter, 0.001);
        assert_eq!(data["gas"].unit_counter, "m³");
    }
}
