// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! Reading publishers
//!
//! [`MqttPublisher`] sends each reading as a JSON payload with QoS 0.
//! [`LogPublisher`] stands in when MQTT is disabled.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use s0counter::{PublishError, Publisher, Reading};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::settings::MqttSettings;

/// Outgoing requests buffered by the client
const REQUEST_CAPACITY: usize = 64;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long a disconnect may take to reach the broker
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

fn encode(reading: &Reading) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(reading).map_err(|e| PublishError::Encode(e.to_string()))
}

/// Validate the broker settings and build the client options
pub fn mqtt_options(settings: &MqttSettings) -> Result<MqttOptions, PublishError> {
    if settings.client_id.is_empty() || settings.client_id.starts_with(' ') {
        return Err(PublishError::InvalidOptions(format!(
            "invalid client id '{}'",
            settings.client_id
        )));
    }
    if settings.host.trim().is_empty() {
        return Err(PublishError::InvalidOptions("empty broker host".to_string()));
    }

    let mut options =
        MqttOptions::new(settings.client_id.as_str(), settings.host.as_str(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(1)));
    Ok(options)
}

/// Publisher backed by an MQTT broker
pub struct MqttPublisher {
    client: AsyncClient,
    retained: bool,
    stop: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Create the client and start driving its event loop. The connection
    /// is established in the background and re-established after errors
    /// until [`disconnect`](Self::disconnect) is called.
    pub fn connect(options: MqttOptions, retained: bool) -> Self {
        let (host, port) = options.broker_address();
        let broker = format!("{}:{}", host, port);
        let (client, mut events) = AsyncClient::new(options, REQUEST_CAPACITY);
        let stop = CancellationToken::new();
        let cancel = stop.clone();

        let event_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(broker = %broker, "connected to mqtt broker");
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(broker = %broker, error = %e, "mqtt connection error");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    },
                }
            }
            debug!("mqtt event loop stopped");
        });

        Self {
            client,
            retained,
            stop,
            event_loop: Mutex::new(Some(event_loop)),
        }
    }

    /// Send a disconnect and wait for the event loop to stop
    pub async fn disconnect(&self) {
        let Some(mut event_loop) = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt disconnect not sent");
        }
        let joined = match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut event_loop).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("broker unreachable, stopping mqtt event loop");
                self.stop.cancel();
                event_loop.await
            }
        };
        if let Err(e) = joined {
            warn!(error = %e, "mqtt event loop task failed");
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, reading: &Reading) -> Result<(), PublishError> {
        let payload = encode(reading)?;
        debug!(topic, bytes = payload.len(), "publishing reading");
        self.client
            .try_publish(topic, QoS::AtMostOnce, self.retained, payload)
            .map_err(|e| PublishError::Unavailable(e.to_string()))
    }
}

/// Publisher that only logs each reading
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, topic: &str, reading: &Reading) -> Result<(), PublishError> {
        let payload = encode(reading)?;
        info!(topic, payload = %String::from_utf8_lossy(&payload), "reading");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading() -> Reading {
        Reading {
            timestamp: Utc::now(),
            counter: 1.5,
            unit_counter: "kWh".to_string(),
            gauge: 0.36,
            unit_gauge: "kW".to_string(),
        }
    }

    #[test]
    fn test_payload_field_names() {
        let payload = encode(&reading()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        for field in ["TimeStamp", "Counter", "UnitCounter", "Gauge", "UnitGauge"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["Counter"], 1.5);
    }

    #[test]
    fn test_log_publisher_accepts() {
        assert!(LogPublisher.publish("s0counter/power", &reading()).is_ok());
    }

    #[test]
    fn test_mqtt_options_rejects_bad_client_id() {
        for client_id in ["", " s0counter"] {
            let settings = MqttSettings {
                client_id: client_id.to_string(),
                ..Default::default()
            };
            assert!(matches!(
                mqtt_options(&settings),
                Err(PublishError::InvalidOptions(_))
            ));
        }

        let settings = MqttSettings {
            host: " ".to_string(),
            ..Default::default()
        };
        assert!(mqtt_options(&settings).is_err());
        assert!(mqtt_options(&MqttSettings::default()).is_ok());
    }

    #[tokio::test]
    async fn test_mqtt_publish_without_broker_does_not_block() {
        let settings = MqttSettings {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let publisher = MqttPublisher::connect(mqtt_options(&settings).unwrap(), false);

        // Queued locally; the broker being down is reported by the event loop
        assert!(publisher.publish("s0counter/power", &reading()).is_ok());

        publisher.disconnect().await;
    }
}
