// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Application wiring
//!
//! [`App::start`] validates the settings, restores the snapshot, opens and
//! watches every line, and starts the periodic tasks and the HTTP service.
//! [`App::shutdown`] tears everything down in reverse.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use s0counter::{
    publish_readings, CollectionConfig, Debouncer, EdgeSink, EmulatedChip, EmulatedLine,
    HardwareError, LineId, LineProvider, MeterRegistry, Publisher, SnapshotStore,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emulator::{spawn_pulses, PulseConfig};
use crate::error::DaemonError;
use crate::metrics::{record_backup_error, record_publish_errors, update_meter_metrics};
use crate::publisher::{mqtt_options, LogPublisher, MqttPublisher};
use crate::settings::Settings;
use crate::store::YamlFileStore;
use crate::web::{self, WebState};

/// Where line transitions come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hardware {
    /// GPIO character device named in the settings
    Gpio,
    /// In-memory lines, optionally pulsed every `pulse_interval`
    Emulated { pulse_interval: Option<Duration> },
}

/// A running daemon
pub struct App {
    registry: Arc<MeterRegistry>,
    chip: Arc<dyn LineProvider>,
    emulated: Option<Arc<EmulatedChip>>,
    debouncers: Vec<Arc<Debouncer>>,
    store: Arc<YamlFileStore>,
    mqtt: Option<Arc<MqttPublisher>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl App {
    /// Start counting. Configuration and hardware errors abort the start
    /// before any background task is spawned.
    pub async fn start(settings: Settings, hardware: Hardware) -> Result<Self, DaemonError> {
        let configs = settings.meter_configs()?;
        let collection = settings.collection()?;
        let broker = settings
            .mqtt
            .enabled
            .then(|| mqtt_options(&settings.mqtt))
            .transpose()?;
        let registry = Arc::new(MeterRegistry::new(configs)?);
        info!(meters = registry.len(), "meters configured");

        let store = Arc::new(YamlFileStore::new(&settings.data_file));
        registry.restore_from(store.as_ref());

        let (chip, emulated) = open_chip(&settings, hardware)?;
        let debouncers = watch_lines(&registry, chip.as_ref())?;

        let cancel = CancellationToken::new();
        let mqtt = broker
            .map(|options| Arc::new(MqttPublisher::connect(options, settings.mqtt.retained)));

        let mut app = Self {
            registry,
            chip,
            emulated,
            debouncers,
            store,
            mqtt,
            cancel,
            tasks: Vec::new(),
            local_addr: None,
        };

        if let Err(e) = app.start_tasks(&settings, collection, hardware).await {
            if let Err(shutdown) = app.shutdown().await {
                debug!(error = %shutdown, "cleanup after failed start");
            }
            return Err(e);
        }
        Ok(app)
    }

    async fn start_tasks(
        &mut self,
        settings: &Settings,
        collection: CollectionConfig,
        hardware: Hardware,
    ) -> Result<(), DaemonError> {
        let listener = TcpListener::bind(&settings.webserver.listen)
            .await
            .map_err(|e| DaemonError::Bind {
                addr: settings.webserver.listen.clone(),
                reason: e.to_string(),
            })?;
        self.local_addr = listener.local_addr().ok();

        let state = Arc::new(WebState {
            registry: Arc::clone(&self.registry),
            started: Instant::now(),
        });
        let router = web::router(state, settings.webserver.webservices);
        let server = web::serve(listener, router, self.cancel.clone());
        self.tasks.push(tokio::spawn(server));
        if let Some(addr) = self.local_addr {
            info!("Starting server on http://{}", addr);
        }

        let publisher: Arc<dyn Publisher> = match &self.mqtt {
            Some(mqtt) => Arc::clone(mqtt) as Arc<dyn Publisher>,
            None => Arc::new(LogPublisher),
        };
        self.tasks.push(spawn_collection(
            Arc::clone(&self.registry),
            publisher,
            collection.data_collection_interval,
            self.cancel.clone(),
        ));
        self.tasks.push(spawn_backup(
            Arc::clone(&self.registry),
            Arc::clone(&self.store) as Arc<dyn SnapshotStore>,
            collection.backup_interval,
            self.cancel.clone(),
        ));

        if let (Hardware::Emulated { pulse_interval: Some(interval) }, Some(chip)) =
            (hardware, &self.emulated)
        {
            for meter in self.registry.iter() {
                if let Some(line) = chip.line(meter.config().line) {
                    let pulses = PulseConfig::new(interval, meter.config().debounce);
                    self.tasks.push(spawn_pulses(line, pulses, self.cancel.clone()));
                }
            }
            info!(interval_ms = interval.as_millis() as u64, "emulating pulses");
        }

        Ok(())
    }

    /// The meter registry
    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    /// Address the HTTP service listens on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// An emulated line, when running without hardware
    pub fn emulated_line(&self, id: LineId) -> Option<Arc<EmulatedLine>> {
        self.emulated.as_ref().and_then(|chip| chip.line(id))
    }

    /// Stop counting and persist the final state. Every step runs even
    /// when the final save fails; that failure is returned at the end.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        info!("shutting down");

        for debouncer in &self.debouncers {
            debouncer.detach();
        }
        for debouncer in &self.debouncers {
            debouncer.close();
        }

        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed");
            }
        }

        let saved = self.registry.save_to(self.store.as_ref());
        match &saved {
            Ok(()) => info!(path = %self.store.path().display(), "final snapshot saved"),
            Err(e) => warn!(error = %e, "final snapshot save failed"),
        }

        if let Some(mqtt) = &self.mqtt {
            mqtt.disconnect().await;
        }

        for debouncer in &self.debouncers {
            if let Err(e) = self.chip.release(debouncer.line_id()) {
                debug!(error = %e, "line release failed");
            }
        }

        Ok(saved?)
    }
}

fn open_chip(
    settings: &Settings,
    hardware: Hardware,
) -> Result<(Arc<dyn LineProvider>, Option<Arc<EmulatedChip>>), HardwareError> {
    match hardware {
        Hardware::Emulated { .. } => {
            let chip = Arc::new(EmulatedChip::new());
            Ok((Arc::clone(&chip) as Arc<dyn LineProvider>, Some(chip)))
        }
        Hardware::Gpio => open_gpio(&settings.gpio_chip).map(|chip| (chip, None)),
    }
}

#[cfg(feature = "gpio")]
fn open_gpio(path: &str) -> Result<Arc<dyn LineProvider>, HardwareError> {
    info!(chip = path, "opening gpio chip");
    Ok(Arc::new(s0counter::CdevChip::open(path)?))
}

#[cfg(not(feature = "gpio"))]
fn open_gpio(path: &str) -> Result<Arc<dyn LineProvider>, HardwareError> {
    Err(HardwareError::Unsupported(format!(
        "{}: built without the gpio feature, use --emulate",
        path
    )))
}

/// Request and watch the line of every meter. On failure every line
/// acquired so far is released again.
fn watch_lines(
    registry: &Arc<MeterRegistry>,
    chip: &dyn LineProvider,
) -> Result<Vec<Arc<Debouncer>>, HardwareError> {
    let mut debouncers: Vec<Arc<Debouncer>> = Vec::with_capacity(registry.len());

    for meter in registry.iter() {
        let config = meter.config();
        let attached = chip.request_line(config.line).and_then(|line| {
            Debouncer::new(
                line,
                config.edge,
                config.debounce,
                Arc::clone(registry) as Arc<dyn EdgeSink>,
            )
            .and_then(|debouncer| debouncer.attach().map(|()| debouncer))
            .map_err(|e| {
                let _ = chip.release(config.line);
                e
            })
        });

        match attached {
            Ok(debouncer) => {
                debug!(
                    meter = %meter.name(),
                    line = config.line,
                    edge = %config.edge,
                    "line watched"
                );
                debouncers.push(debouncer);
            }
            Err(e) => {
                for debouncer in &debouncers {
                    debouncer.detach();
                    debouncer.close();
                    let _ = chip.release(debouncer.line_id());
                }
                return Err(e);
            }
        }
    }

    Ok(debouncers)
}

fn spawn_collection(
    registry: Arc<MeterRegistry>,
    publisher: Arc<dyn Publisher>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let failed = publish_readings(&registry, publisher.as_ref(), now);
                    record_publish_errors(failed);
                    update_meter_metrics(&registry, now);
                }
            }
        }
    })
}

fn spawn_backup(
    registry: Arc<MeterRegistry>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = registry.save_to(store.as_ref()) {
                        record_backup_error();
                        warn!(error = %e, "snapshot save failed, retrying next tick");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use s0counter::{Level, PublishError, S0Error, SnapshotEntry};
    use std::path::Path;
    use tempfile::tempdir;

    fn settings(data_file: &Path) -> Settings {
        let mut settings = Settings::parse(
            r#"
webserver:
  listen: 127.0.0.1:0
meters:
  power:
    gpio: 17
    counter_constant: 1000
    unit_counter: kWh
    unit_gauge: kW
  water:
    gpio: 27
    counter_constant: 1
"#,
        )
        .unwrap();
        settings.data_file = data_file.display().to_string();
        settings
    }

    const EMULATED: Hardware = Hardware::Emulated {
        pulse_interval: None,
    };

    #[tokio::test]
    async fn test_counts_and_persists_across_restart() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("measurement.yaml");

        let app = App::start(settings(&data_file), EMULATED).await.unwrap();
        assert!(data_file.exists());
        assert!(app.local_addr().is_some());

        let line = app.emulated_line(17).unwrap();
        for _ in 0..4 {
            line.inject(Level::Low);
            line.inject(Level::High);
        }
        assert_eq!(app.registry().get("power").unwrap().ticks(), 4);
        app.shutdown().await.unwrap();

        let saved = YamlFileStore::new(&data_file)
            .load(&["power".to_string()])
            .unwrap();
        assert_eq!(saved[0].name, "power");
        assert_eq!(saved[0].ticks, 4);

        let app = App::start(settings(&data_file), EMULATED).await.unwrap();
        assert_eq!(app.registry().get("power").unwrap().ticks(), 4);
        assert_eq!(app.registry().get("water").unwrap().ticks(), 0);
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_counting() {
        let dir = tempdir().unwrap();
        let app = App::start(settings(&dir.path().join("m.yaml")), EMULATED)
            .await
            .unwrap();
        let line = app.emulated_line(27).unwrap();
        let registry = Arc::clone(app.registry());

        app.shutdown().await.unwrap();
        line.inject(Level::Low);
        assert_eq!(registry.get("water").unwrap().ticks(), 0);
    }

    #[tokio::test]
    async fn test_invalid_meter_fails_before_touching_files() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("measurement.yaml");
        let mut settings = settings(&data_file);
        settings.meters.get_mut("water").unwrap().counter_constant = 0.0;

        let result = App::start(settings, EMULATED).await;
        assert!(matches!(result, Err(DaemonError::Core(_))));
        assert!(!data_file.exists());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_starts_from_zero() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("measurement.yaml");
        std::fs::write(&data_file, "power: [broken\n").unwrap();

        let app = App::start(settings(&data_file), EMULATED).await.unwrap();
        assert!(app.registry().export().iter().all(|e| e.ticks == 0));
        app.shutdown().await.unwrap();

        let saved = YamlFileStore::new(&data_file).load(&[]).unwrap();
        assert!(saved.contains(&SnapshotEntry::zero("water")));
    }

    #[tokio::test]
    async fn test_invalid_broker_settings_fail_before_touching_files() {
        let dir = tempdir().unwrap();
        let data_file = dir.path().join("measurement.yaml");
        let mut settings = settings(&data_file);
        settings.mqtt.enabled = true;
        settings.mqtt.client_id = String::new();

        let result = App::start(settings, EMULATED).await;
        assert!(matches!(
            result,
            Err(DaemonError::Core(S0Error::Publish(PublishError::InvalidOptions(_))))
        ));
        assert!(!data_file.exists());
    }

    #[tokio::test]
    async fn test_failed_final_save_is_reported() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let app = App::start(settings(&data_dir.join("m.yaml")), EMULATED)
            .await
            .unwrap();

        // A plain file where the snapshot directory was
        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, "").unwrap();

        let line = app.emulated_line(17).unwrap();
        let result = app.shutdown().await;
        assert!(matches!(
            result,
            Err(DaemonError::Core(S0Error::Persistence(_)))
        ));
        assert!(!line.is_watched());
    }

    #[tokio::test]
    async fn test_emulated_pulses_are_counted() {
        let dir = tempdir().unwrap();
        let hardware = Hardware::Emulated {
            pulse_interval: Some(Duration::from_millis(50)),
        };
        let app = App::start(settings(&dir.path().join("m.yaml")), hardware)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(app.registry().get("power").unwrap().ticks() >= 3);
        assert!(app.registry().get("water").unwrap().ticks() >= 3);
        app.shutdown().await.unwrap();
    }

    #[cfg(not(feature = "gpio"))]
    #[tokio::test]
    async fn test_gpio_requires_feature() {
        let dir = tempdir().unwrap();
        let result = App::start(settings(&dir.path().join("m.yaml")), Hardware::Gpio).await;
        assert!(matches!(
            result,
            Err(DaemonError::Core(S0Error::Hardware(
                HardwareError::Unsupported(_)
            )))
        ));
    }
}
