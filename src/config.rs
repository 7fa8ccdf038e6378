//! Configuration for the MQTT transport adapter
//!
//! Every field has a default, so an empty `[mqtt]` table is a valid (if inert)
//! configuration: without a broker the standalone activation path does nothing.

use rumqttc::v5::mqttbytes::QoS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::transport::mqtt::ReconnectPolicy;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_BASE_TOPIC: &str = "espmole";
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
}

/// MQTT section, used by standalone mode to create and own the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker hostname/IP, or an `mqtt://host[:port]` URL
    pub broker: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Environment variable containing the username (used when `username` is unset)
    pub username_env: Option<String>,
    /// Environment variable containing the password (used when `password` is unset)
    pub password_env: Option<String>,
    /// Client ID (None = use the device id)
    pub client_id: Option<String>,

    pub base_topic: String,
    /// Device identifier (None = hardware address)
    pub device_id: Option<String>,

    /// Enable birth/last-will messages on the status topic
    pub enable_status: bool,
    pub birth_payload: String,
    pub lwt_payload: String,
    pub retain_status: bool,

    /// Reconnection attempt interval in milliseconds
    pub reconnect_interval_ms: u64,
    /// When set, reconnect delays double from `reconnect_interval_ms` up to this ceiling
    pub reconnect_backoff_max_ms: Option<u64>,
    /// QoS level for command/response topics
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            client_id: None,
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            device_id: None,
            enable_status: true,
            birth_payload: "online".to_string(),
            lwt_payload: "offline".to_string(),
            retain_status: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            reconnect_backoff_max_ms: None,
            qos: 0,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.mqtt.validate()?;
        Ok(config)
    }
}

impl MqttConfig {
    /// Config with only the broker set; everything else at defaults
    pub fn with_broker<S: Into<String>>(broker: S) -> Self {
        Self {
            broker: Some(broker.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if qos_from_level(self.qos).is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }
        if self.base_topic.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "base_topic cannot be empty".to_string(),
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(max) = self.reconnect_backoff_max_ms {
            if max < self.reconnect_interval_ms {
                return Err(ConfigError::InvalidConfig(format!(
                    "reconnect_backoff_max_ms ({max}) is below reconnect_interval_ms ({})",
                    self.reconnect_interval_ms
                )));
            }
        }
        if let Some(broker) = &self.broker {
            parse_broker(broker, self.port)?;
        }
        Ok(())
    }

    /// QoS for command/response traffic. Out-of-range levels fall back to QoS 0.
    pub fn qos_level(&self) -> QoS {
        qos_from_level(self.qos).unwrap_or(QoS::AtMostOnce)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let interval = Duration::from_millis(self.reconnect_interval_ms);
        match self.reconnect_backoff_max_ms {
            Some(max) => ReconnectPolicy::Backoff {
                initial: interval,
                max: Duration::from_millis(max),
            },
            None => ReconnectPolicy::Fixed { interval },
        }
    }

    /// Resolve the broker into host and port. `Ok(None)` when no broker is configured.
    pub fn broker_endpoint(&self) -> Result<Option<(String, u16)>, ConfigError> {
        self.broker
            .as_deref()
            .map(|broker| parse_broker(broker, self.port))
            .transpose()
    }

    /// Username/password pair, taken from the inline fields first and the
    /// named environment variables second
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let username = match (&self.username, &self.username_env) {
            (Some(username), _) => Some(username.clone()),
            (None, Some(env_name)) => Some(get_env_var_required(env_name)?),
            (None, None) => None,
        };
        let Some(username) = username else {
            return Ok(None);
        };

        let password = match (&self.password, &self.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(env_name)) => std::env::var(env_name).unwrap_or_default(),
            (None, None) => String::new(),
        };
        Ok(Some((username, password)))
    }
}

/// Map a numeric QoS level to the MQTT QoS enum
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

fn parse_broker(broker: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    if broker.trim().is_empty() {
        return Err(ConfigError::InvalidBroker(broker.to_string()));
    }
    if !broker.contains("://") {
        return Ok((broker.to_string(), default_port));
    }

    let url = Url::parse(broker).map_err(|_| ConfigError::InvalidBroker(broker.to_string()))?;
    if url.scheme() != "mqtt" && url.scheme() != "tcp" {
        return Err(ConfigError::InvalidBroker(format!(
            "unsupported scheme '{}' in {broker}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidBroker(broker.to_string()))?;
    Ok((host.to_string(), url.port().unwrap_or(default_port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.broker, None);
        assert_eq!(config.port, 1883);
        assert_eq!(config.base_topic, "espmole");
        assert!(config.enable_status);
        assert!(config.retain_status);
        assert_eq!(config.birth_payload, "online");
        assert_eq!(config.lwt_payload, "offline");
        assert_eq!(config.reconnect_interval_ms, 5000);
        assert_eq!(config.qos, 0);
        assert_eq!(config.qos_level(), QoS::AtMostOnce);
    }

    #[test]
    fn test_empty_mqtt_table_uses_defaults() {
        let config: BridgeConfig = toml::from_str("[mqtt]\n").unwrap();
        assert_eq!(config.mqtt, MqttConfig::default());

        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.mqtt, MqttConfig::default());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[mqtt]
broker = "mqtt.example.com"
port = 1884
username = "device"
password = "hunter2"
client_id = "bench-01"
base_topic = "lab"
device_id = "bench"
enable_status = false
birth_payload = "up"
lwt_payload = "down"
retain_status = false
reconnect_interval_ms = 1000
reconnect_backoff_max_ms = 30000
qos = 1
"#;

        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        let mqtt = config.mqtt;
        assert_eq!(mqtt.broker.as_deref(), Some("mqtt.example.com"));
        assert_eq!(mqtt.port, 1884);
        assert_eq!(mqtt.client_id.as_deref(), Some("bench-01"));
        assert_eq!(mqtt.base_topic, "lab");
        assert_eq!(mqtt.device_id.as_deref(), Some("bench"));
        assert!(!mqtt.enable_status);
        assert_eq!(mqtt.qos_level(), QoS::AtLeastOnce);
        assert_eq!(
            mqtt.reconnect_policy(),
            ReconnectPolicy::Backoff {
                initial: Duration::from_millis(1000),
                max: Duration::from_millis(30000),
            }
        );
        assert!(mqtt.validate().is_ok());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let config = MqttConfig {
            qos: 3,
            ..MqttConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert_eq!(config.qos_level(), QoS::AtMostOnce);
    }

    #[test]
    fn test_empty_base_topic_rejected() {
        let config = MqttConfig {
            base_topic: String::new(),
            ..MqttConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_ceiling_below_interval_rejected() {
        let config = MqttConfig {
            reconnect_backoff_max_ms: Some(100),
            ..MqttConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broker_endpoint_plain_host() {
        let config = MqttConfig::with_broker("192.168.1.100");
        assert_eq!(
            config.broker_endpoint().unwrap(),
            Some(("192.168.1.100".to_string(), 1883))
        );
    }

    #[test]
    fn test_broker_endpoint_url() {
        let config = MqttConfig::with_broker("mqtt://broker.local:1999");
        assert_eq!(
            config.broker_endpoint().unwrap(),
            Some(("broker.local".to_string(), 1999))
        );

        let config = MqttConfig::with_broker("mqtt://broker.local");
        assert_eq!(
            config.broker_endpoint().unwrap(),
            Some(("broker.local".to_string(), 1883))
        );
    }

    #[test]
    fn test_broker_endpoint_rejects_unknown_scheme() {
        let config = MqttConfig::with_broker("http://broker.local");
        assert!(matches!(
            config.broker_endpoint(),
            Err(ConfigError::InvalidBroker(_))
        ));
    }

    #[test]
    fn test_no_broker_endpoint() {
        assert_eq!(MqttConfig::default().broker_endpoint().unwrap(), None);
    }

    #[test]
    fn test_inline_credentials() {
        let config = MqttConfig {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..MqttConfig::default()
        };
        assert_eq!(
            config.credentials().unwrap(),
            Some(("user".to_string(), "pass".to_string()))
        );
    }

    #[test]
    fn test_missing_username_env_is_error() {
        let config = MqttConfig {
            username_env: Some("ESPMOLE_TEST_SURELY_UNSET_USER".to_string()),
            ..MqttConfig::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_no_credentials() {
        assert_eq!(MqttConfig::default().credentials().unwrap(), None);
    }

    #[test]
    fn test_password_not_serialized() {
        let config = MqttConfig {
            password: Some("hunter2".to_string()),
            ..MqttConfig::default()
        };
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("hunter2"));
    }
}
