//! espmole MQTT transport
//!
//! Bridges a device command dispatcher to an MQTT broker.
//!
//! # Overview
//!
//! This crate provides:
//! - A per-device topic namespace (`{base}/{device}/cmd|resp|status|event`)
//! - Standalone mode, where the adapter owns and supervises its rumqttc client
//! - Integration mode, where it shares a client the host application owns
//! - Last-will / birth status announcements and paced reconnects
//! - Routing of inbound messages between the dispatcher and the host
//!
//! # Quick Start
//!
//! ```rust
//! use espmole_mqtt::dispatcher::{write_reply, PeerHandle};
//! use espmole_mqtt::testing::MockPollingClient;
//! use espmole_mqtt::transport::mqtt::{HardwareAddress, MqttTransport};
//! use std::sync::Arc;
//!
//! let dispatcher = |_peer: PeerHandle, request: &[u8], response: &mut [u8]| {
//!     if request == b"LED" { write_reply(response, b"LED ON") } else { 0 }
//! };
//!
//! let mut transport = MqttTransport::new(dispatcher)
//!     .with_hardware_address("AA:BB:CC:DD:EE:FF".parse::<HardwareAddress>().unwrap());
//! let host_client = Arc::new(MockPollingClient::already_connected());
//! transport.attach_polling(host_client.clone());
//!
//! assert_eq!(transport.command_topic(), Some("espmole/AABBCCDDEEFF/cmd"));
//! assert!(transport.handle_message("espmole/AABBCCDDEEFF/cmd", b"LED"));
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, ConfigError, MqttConfig};
pub use dispatcher::{Dispatcher, PeerHandle, PEER_MQTT};
pub use error::{BridgeError, BridgeResult};
pub use transport::mqtt::MqttTransport;
pub use transport::Transport;
