//! MQTT transport adapter for the command dispatcher
//!
//! This module separates pure decision logic from I/O so that nearly all of
//! the adapter's behavior can be tested without a broker.
//!
//! # Architecture
//!
//! - [`topics`] - Pure topic namespace and device id derivation
//! - [`mode`] - Standalone / integration mode selection
//! - [`connection`] - Connection settings, last will and reconnect policy
//! - [`health_monitor`] - Pure reconnect scheduling
//! - [`message_handler`] - Pure inbound message classification
//! - [`capability`] - Client capability traits and the client binding
//! - [`client`] - Impure rumqttc-backed capabilities
//! - [`adapter`] - [`MqttTransport`], tying it all together
//!
//! # Usage
//!
//! ```rust,no_run
//! use espmole_mqtt::config::MqttConfig;
//! use espmole_mqtt::dispatcher::write_reply;
//! use espmole_mqtt::transport::mqtt::MqttTransport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dispatcher = |_peer: u32, request: &[u8], response: &mut [u8]| write_reply(response, request);
//! let mut transport = MqttTransport::with_config(dispatcher, MqttConfig::with_broker("localhost"));
//! transport.begin();
//!
//! let mut tick = tokio::time::interval(std::time::Duration::from_millis(50));
//! loop {
//!     tick.tick().await;
//!     transport.poll();
//! }
//! # }
//! ```

pub mod adapter;
pub mod capability;
pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod mode;
pub mod topics;

// Re-export public types for convenience
pub use adapter::{MqttTransport, UserCallback};
pub use capability::{
    AsyncCapability, ClientBinding, ClientEvent, ClientFactory, PollingCapability,
};
pub use client::{HostClient, RumqttcClient, RumqttcFactory};
pub use connection::{ClientError, ConnectSettings, ReconnectPolicy, Will};
pub use health_monitor::{ConnectionMonitor, ReconnectionDecision};
pub use message_handler::{MessageHandler, MessageRoute};
pub use mode::{BeginDecision, Mode, ModeController};
pub use topics::{is_namespaced, BoundedText, HardwareAddress, HardwareAddressError, TopicSet};
