//! MQTT client capabilities the adapter can drive, and the binding to one of them
//!
//! The adapter never speaks MQTT itself. It calls into one of two client
//! shapes:
//!
//! - [`AsyncCapability`] - event-driven client the adapter can connect, with
//!   a pre-connect last will and a non-blocking event queue
//! - [`PollingCapability`] - host-owned client that is already connected and
//!   whose events the host forwards by hand
//!
//! All calls are fire-and-forget; results show up later as [`ClientEvent`]s
//! or through `connected()`.

use super::connection::{ClientError, ConnectSettings, Will};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use tracing::debug;

/// Notification coming out of a client capability
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection (re-)established
    Connected { session_present: bool },
    /// Connection lost or a connect attempt failed
    Disconnected { reason: String },
    /// Inbound PUBLISH, possibly one fragment of a larger payload
    Message {
        topic: String,
        payload: Bytes,
        offset: usize,
        total: usize,
    },
}

impl ClientEvent {
    /// A message delivered in one piece
    pub fn message(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let total = payload.len();
        Self::Message {
            topic: topic.into(),
            payload,
            offset: 0,
            total,
        }
    }
}

/// Event-driven client (connect/will/subscribe/publish plus an event queue)
pub trait AsyncCapability: Send + Sync {
    /// Register the last will. Only effective before the first connect.
    fn set_will(&self, will: Will);

    /// Start a connection attempt without blocking
    fn connect(&self);

    fn disconnect(&self);

    fn connected(&self) -> bool;

    fn subscribe(&self, topic: &str, qos: QoS) -> bool;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool;

    /// Next pending notification, if any. Never blocks.
    fn poll_event(&self) -> Option<ClientEvent>;
}

/// Host-owned client whose network loop the host drives itself
pub trait PollingCapability: Send + Sync {
    fn connected(&self) -> bool;

    fn subscribe(&self, topic: &str, qos: QoS) -> bool;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool;
}

impl<T: AsyncCapability + ?Sized> AsyncCapability for Arc<T> {
    fn set_will(&self, will: Will) {
        (**self).set_will(will)
    }

    fn connect(&self) {
        (**self).connect()
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        (**self).subscribe(topic, qos)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        (**self).publish(topic, payload, qos, retain)
    }

    fn poll_event(&self) -> Option<ClientEvent> {
        (**self).poll_event()
    }
}

/// Creates the client the adapter owns in standalone mode
pub trait ClientFactory {
    fn create(&self, settings: &ConnectSettings) -> Result<Box<dyn AsyncCapability>, ClientError>;
}

/// The adapter's single client reference.
///
/// Only `Owned` is released (disconnected) when the binding is dropped or
/// replaced; attached clients belong to the host.
#[derive(Default)]
pub enum ClientBinding {
    #[default]
    Unbound,
    Owned(Box<dyn AsyncCapability>),
    AttachedAsync(Arc<dyn AsyncCapability>),
    AttachedPolling(Arc<dyn PollingCapability>),
}

impl ClientBinding {
    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// The owned client, if the adapter created one
    pub fn owned(&self) -> Option<&dyn AsyncCapability> {
        match self {
            Self::Owned(client) => Some(client.as_ref()),
            _ => None,
        }
    }

    pub fn connected(&self) -> bool {
        match self {
            Self::Unbound => false,
            Self::Owned(client) => client.connected(),
            Self::AttachedAsync(client) => client.connected(),
            Self::AttachedPolling(client) => client.connected(),
        }
    }

    pub fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        match self {
            Self::Unbound => false,
            Self::Owned(client) => client.subscribe(topic, qos),
            Self::AttachedAsync(client) => client.subscribe(topic, qos),
            Self::AttachedPolling(client) => client.subscribe(topic, qos),
        }
    }

    /// Publish through whichever client is bound. `false` if none is bound or it is offline.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        if !self.connected() {
            debug!(topic, "Publish skipped: no connected client");
            return false;
        }
        match self {
            Self::Unbound => false,
            Self::Owned(client) => client.publish(topic, payload, qos, retain),
            Self::AttachedAsync(client) => client.publish(topic, payload, qos, retain),
            Self::AttachedPolling(client) => client.publish(topic, payload, qos, retain),
        }
    }

    /// Drop the current binding, disconnecting it if owned
    pub fn release(&mut self) {
        *self = Self::Unbound;
    }
}

impl Drop for ClientBinding {
    fn drop(&mut self) {
        if let Self::Owned(client) = self {
            debug!("Releasing owned MQTT client");
            client.disconnect();
        }
    }
}

impl std::fmt::Debug for ClientBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Unbound => "Unbound",
            Self::Owned(_) => "Owned",
            Self::AttachedAsync(_) => "AttachedAsync",
            Self::AttachedPolling(_) => "AttachedPolling",
        };
        f.write_str(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClientCall, MockAsyncClient, MockPollingClient};

    #[test]
    fn test_unbound_does_nothing() {
        let binding = ClientBinding::Unbound;
        assert!(!binding.is_bound());
        assert!(!binding.connected());
        assert!(!binding.subscribe("a/b", QoS::AtMostOnce));
        assert!(!binding.publish("a/b", b"x", QoS::AtMostOnce, false));
    }

    #[test]
    fn test_publish_requires_connection() {
        let client = Arc::new(MockAsyncClient::new());
        let binding = ClientBinding::AttachedAsync(client.clone());

        assert!(!binding.publish("a/b", b"x", QoS::AtMostOnce, false));
        assert!(client.publishes().is_empty());

        client.set_connected(true);
        assert!(binding.publish("a/b", b"x", QoS::AtLeastOnce, true));
        assert_eq!(
            client.publishes(),
            vec![ClientCall::Publish {
                topic: "a/b".to_string(),
                payload: b"x".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }]
        );
    }

    #[test]
    fn test_dropping_owned_binding_disconnects() {
        let client = Arc::new(MockAsyncClient::new());
        let binding = ClientBinding::Owned(Box::new(client.clone()));
        drop(binding);
        assert_eq!(client.calls(), vec![ClientCall::Disconnect]);
    }

    #[test]
    fn test_dropping_attached_binding_leaves_client_alone() {
        let async_client = Arc::new(MockAsyncClient::new());
        drop(ClientBinding::AttachedAsync(async_client.clone()));
        assert!(async_client.calls().is_empty());

        let polling_client = Arc::new(MockPollingClient::new());
        drop(ClientBinding::AttachedPolling(polling_client.clone()));
        assert!(polling_client.calls().is_empty());
    }

    #[test]
    fn test_release_owned_binding() {
        let client = Arc::new(MockAsyncClient::new());
        let mut binding = ClientBinding::Owned(Box::new(client.clone()));
        assert!(binding.is_owned());
        binding.release();
        assert!(!binding.is_bound());
        assert_eq!(client.calls(), vec![ClientCall::Disconnect]);
    }

    #[test]
    fn test_single_fragment_message_constructor() {
        let event = ClientEvent::message("a/b", b"hello".to_vec());
        assert_eq!(
            event,
            ClientEvent::Message {
                topic: "a/b".to_string(),
                payload: Bytes::from_static(b"hello"),
                offset: 0,
                total: 5,
            }
        );
    }
}
