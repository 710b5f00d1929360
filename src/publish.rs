//! Publisher port
//!
//! On every data-collection tick each meter's [`Reading`] is handed to a
//! [`Publisher`] under the meter's topic. Publishing is fire-and-forget: a
//! failure is logged and the next tick simply publishes again.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::calc::Reading;
use crate::error::PublishError;
use crate::registry::MeterRegistry;

/// Sink for meter readings, e.g. a message broker client
pub trait Publisher: Send + Sync {
    /// Publish one reading under `topic`
    fn publish(&self, topic: &str, reading: &Reading) -> Result<(), PublishError>;
}

/// Publish the current reading of every meter.
///
/// Returns the number of readings that failed to publish.
pub fn publish_readings(
    registry: &MeterRegistry,
    publisher: &dyn Publisher,
    now: DateTime<Utc>,
) -> usize {
    let mut failed = 0;
    for meter in registry.iter() {
        let reading = meter.reading(now);
        if let Err(e) = publisher.publish(&meter.config().topic, &reading) {
            log::warn!("{}: publish failed: {}", meter.name(), e);
            failed += 1;
        }
    }
    failed
}

/// Publisher that keeps every reading in memory
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<(String, Reading)>>,
}

impl RecordingPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Readings published so far, with their topics
    pub fn records(&self) -> Vec<(String, Reading)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, reading: &Reading) -> Result<(), PublishError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), reading.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;

    struct Offline;

    impl Publisher for Offline {
        fn publish(&self, _topic: &str, _reading: &Reading) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("connection refused".to_string()))
        }
    }

    fn registry() -> MeterRegistry {
        MeterRegistry::new(vec![
            MeterConfig::new("power", 17, 1000.0),
            MeterConfig::new("water", 27, 1.0).with_topic("home/water"),
        ])
        .unwrap()
    }

    #[test]
    fn test_publish_every_meter_under_its_topic() {
        let registry = registry();
        let publisher = RecordingPublisher::new();
        let now = Utc::now();

        assert_eq!(publish_readings(&registry, &publisher, now), 0);
        let topics: Vec<String> = publisher.records().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["s0counter/power", "home/water"]);
        assert!(publisher.records().iter().all(|(_, r)| r.timestamp == now));
    }

    #[test]
    fn test_publish_failures_counted() {
        let registry = registry();
        assert_eq!(publish_readings(&registry, &Offline, Utc::now()), 2);
    }
}
