//! Connection settings, last-will registration and reconnect policy
//!
//! Pure values shared by the adapter and the client capabilities, plus the
//! mapping onto rumqttc options.

use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use std::time::Duration;
use thiserror::Error;

/// Keep-alive handed to clients the adapter creates
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Last-will registration, published by the broker on ungraceful disconnect
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything needed to create a client the adapter will own
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
    pub keep_alive: Duration,
}

/// How long to wait between connection attempts while disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay between every attempt
    Fixed { interval: Duration },
    /// Delay doubles per consecutive failed attempt, capped at `max`
    Backoff { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            interval: Duration::from_millis(crate::config::DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, given how many attempts were already
    /// made since the last successful connection
    pub fn delay_after(&self, attempts: u32) -> Duration {
        match *self {
            Self::Fixed { interval } => interval,
            Self::Backoff { initial, max } => {
                let exponent = attempts.saturating_sub(1).min(31);
                initial
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Client capability errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No tokio runtime available to drive the MQTT event loop")]
    NoRuntime,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Map adapter-level settings onto rumqttc options. The will is only honored
/// by the broker if it is part of the CONNECT packet, so it is set here.
pub fn configure_mqtt_options(settings: &ConnectSettings, will: Option<&Will>) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);

    if let Some((username, password)) = &settings.credentials {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(settings.keep_alive);

    if let Some(will) = will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        let lwt = LastWill::new(
            will.topic.as_str(),
            will.payload.clone(),
            will.qos,
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}
