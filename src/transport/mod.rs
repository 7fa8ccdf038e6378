//! Transport layer for the command dispatcher
//!
//! This module provides the transport abstraction the dispatcher side talks
//! to, and its MQTT implementation.

use crate::dispatcher::PeerHandle;

pub mod mqtt;

/// Outbound side of a transport as seen by the dispatcher
pub trait Transport: Send {
    /// Send a response to `peer`. `false` if it could not be handed to the network.
    fn send(&self, peer: PeerHandle, data: &[u8]) -> bool;

    /// Send unsolicited data to every listener
    fn broadcast(&self, data: &[u8]) -> bool;

    fn name(&self) -> &'static str;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
