//! Pure message routing decisions for inbound MQTT traffic
//!
//! This module contains pure functions for classifying inbound messages and
//! translating rumqttc events into [`ClientEvent`]s.

use super::capability::ClientEvent;
use super::topics::is_namespaced;
use rumqttc::v5::Event;
use tracing::debug;

/// Where an inbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    /// Addressed to the dispatcher
    Command,
    /// Inside our own `{base}/` namespace but not a command; consumed silently
    OwnNamespace,
    /// Belongs to the host application
    Foreign,
}

/// Pure message routing decisions
pub struct MessageHandler;

impl MessageHandler {
    /// Classify a topic. `command` is `None` until topics have been built.
    pub fn classify(topic: &str, command: Option<&str>, base: &str) -> MessageRoute {
        if command.is_some_and(|command| command == topic) {
            MessageRoute::Command
        } else if is_namespaced(topic, base) {
            debug!(topic, "Ignoring message in own namespace");
            MessageRoute::OwnNamespace
        } else {
            MessageRoute::Foreign
        }
    }

    /// Whether a delivery carries the whole payload in one piece
    pub fn is_complete_delivery(len: usize, offset: usize, total: usize) -> bool {
        offset == 0 && len == total
    }

    /// Translate a rumqttc event into an adapter notification.
    /// Outgoing and infrastructure packets (acks, pings) yield `None`.
    pub fn route_mqtt_event(event: &Event) -> Option<ClientEvent> {
        use rumqttc::v5::mqttbytes::v5::Packet;
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => Some(ClientEvent::Connected {
                    session_present: connack.session_present,
                }),
                Packet::Publish(publish) => Some(ClientEvent::message(
                    String::from_utf8_lossy(&publish.topic).into_owned(),
                    publish.payload.clone(),
                )),
                Packet::Disconnect(disconnect) => Some(ClientEvent::Disconnected {
                    reason: format!("{:?}", disconnect.reason_code),
                }),
                _ => None,
            },
            Event::Outgoing(_) => None,
        }
    }
}

impl ClientEvent {
    /// Translate output from a host-driven rumqttc event loop
    pub fn from_rumqttc(event: &Event) -> Option<Self> {
        MessageHandler::route_mqtt_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Packet, PingResp, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    const CMD: &str = "espmole/AABBCCDDEEFF/cmd";

    #[test]
    fn test_classify_command() {
        assert_eq!(
            MessageHandler::classify(CMD, Some(CMD), "espmole"),
            MessageRoute::Command
        );
    }

    #[test]
    fn test_classify_own_namespace() {
        for topic in [
            "espmole/AABBCCDDEEFF/resp",
            "espmole/AABBCCDDEEFF/status",
            "espmole/OTHERDEVICE/cmd",
            "espmole/",
        ] {
            assert_eq!(
                MessageHandler::classify(topic, Some(CMD), "espmole"),
                MessageRoute::OwnNamespace,
                "{topic}"
            );
        }
    }

    #[test]
    fn test_classify_foreign() {
        for topic in ["home/lights", "espmole", "espmolex/a", "ESPMOLE/a"] {
            assert_eq!(
                MessageHandler::classify(topic, Some(CMD), "espmole"),
                MessageRoute::Foreign,
                "{topic}"
            );
        }
    }

    #[test]
    fn test_classify_before_topics_built() {
        assert_eq!(
            MessageHandler::classify(CMD, None, "espmole"),
            MessageRoute::OwnNamespace
        );
        assert_eq!(
            MessageHandler::classify("home/lights", None, "espmole"),
            MessageRoute::Foreign
        );
    }

    #[test]
    fn test_complete_delivery() {
        assert!(MessageHandler::is_complete_delivery(5, 0, 5));
        assert!(MessageHandler::is_complete_delivery(0, 0, 0));
        assert!(!MessageHandler::is_complete_delivery(5, 5, 10));
        assert!(!MessageHandler::is_complete_delivery(5, 0, 10));
    }

    #[test]
    fn test_route_publish() {
        let event = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from(CMD),
            pkid: 0,
            payload: Bytes::from("LED"),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            Some(ClientEvent::Message {
                topic: CMD.to_string(),
                payload: Bytes::from_static(b"LED"),
                offset: 0,
                total: 3,
            })
        );
    }

    #[test]
    fn test_route_connack() {
        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        };
        let event = Event::Incoming(Packet::ConnAck(connack));
        assert_eq!(
            ClientEvent::from_rumqttc(&event),
            Some(ClientEvent::Connected {
                session_present: false
            })
        );
    }

    #[test]
    fn test_route_disconnect() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&event),
            Some(ClientEvent::Disconnected { .. })
        ));
    }

    #[test]
    fn test_route_ignores_infrastructure() {
        let ping = Event::Incoming(Packet::PingResp(PingResp));
        assert_eq!(MessageHandler::route_mqtt_event(&ping), None);
    }
}
