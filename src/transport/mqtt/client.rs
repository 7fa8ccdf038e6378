//! Impure I/O side: rumqttc-backed client capabilities
//!
//! [`RumqttcClient`] owns a rumqttc session whose event loop runs on a tokio
//! task. Every notification the loop produces is translated and pushed onto
//! an unbounded channel that the adapter drains from its own control loop, so
//! no adapter state is ever touched from the network task.
//!
//! Dropping a [`RumqttcClient`] closes its request channel and gives the
//! event loop [`DISCONNECT_GRACE`] to flush a queued DISCONNECT before the
//! task is aborted.
//!
//! [`HostClient`] wraps a host-owned `AsyncClient` for integration mode.

use super::capability::{AsyncCapability, ClientEvent, ClientFactory, PollingCapability};
use super::connection::{configure_mqtt_options, ClientError, ConnectSettings, Will};
use super::message_handler::MessageHandler;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request queue depth between `AsyncClient` and its event loop
pub const EVENT_CHANNEL_CAPACITY: usize = 10;

/// How long a dropped client's event loop may keep running to flush DISCONNECT
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Session {
    client: AsyncClient,
    wake: Arc<Notify>,
    /// Set by the driver only while it waits on `wake`
    parked: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Client the adapter owns in standalone mode
pub struct RumqttcClient {
    settings: ConnectSettings,
    runtime: Handle,
    will: Mutex<Option<Will>>,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
}

impl RumqttcClient {
    pub fn new(settings: ConnectSettings, runtime: Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            runtime,
            will: Mutex::new(None),
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    fn start_session(&self) -> Session {
        let will = lock(&self.will).clone();
        let mqtt_options = configure_mqtt_options(&self.settings, will.as_ref());
        let (client, event_loop) = AsyncClient::new(mqtt_options, EVENT_CHANNEL_CAPACITY);

        let wake = Arc::new(Notify::new());
        let parked = Arc::new(AtomicBool::new(false));
        let driver = self.runtime.spawn(drive_event_loop(
            event_loop,
            self.events_tx.clone(),
            self.connected.clone(),
            wake.clone(),
            parked.clone(),
        ));

        info!(
            target: "mqtt_transport",
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "MQTT event loop started"
        );

        Session {
            client,
            wake,
            parked,
            driver,
        }
    }
}

/// Poll the rumqttc event loop until the receiving side goes away.
///
/// After a connection error the loop parks until the next `connect()`
/// instead of retrying on its own; reconnect timing belongs to the adapter.
/// `parked` is raised before waiting so that `connect()` calls made while an
/// attempt is still in flight leave no wake-up permit behind.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
    wake: Arc<Notify>,
    parked: Arc<AtomicBool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                let Some(event) = MessageHandler::route_mqtt_event(&event) else {
                    continue;
                };
                match &event {
                    ClientEvent::Connected { .. } => connected.store(true, Ordering::SeqCst),
                    ClientEvent::Disconnected { .. } => connected.store(false, Ordering::SeqCst),
                    ClientEvent::Message { topic, .. } => {
                        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic)
                    }
                }
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!(target: "mqtt_transport", "MQTT connection error: {}", e);
                // Raised before the event goes out so a prompt connect() still wakes us
                parked.store(true, Ordering::SeqCst);
                let event = ClientEvent::Disconnected {
                    reason: e.to_string(),
                };
                if events.send(event).is_err() {
                    break;
                }
                wake.notified().await;
            }
        }
    }
    debug!(target: "mqtt_transport", "MQTT event loop stopped");
}

impl AsyncCapability for RumqttcClient {
    fn set_will(&self, will: Will) {
        if lock(&self.session).is_some() {
            debug!("Last will updated after session start; applies to the next session only");
        }
        *lock(&self.will) = Some(will);
    }

    fn connect(&self) {
        let mut session = lock(&self.session);
        match session.as_ref() {
            Some(existing) => {
                if existing.parked.swap(false, Ordering::SeqCst) {
                    debug!(target: "mqtt_transport", "Waking MQTT event loop for reconnect");
                    existing.wake.notify_one();
                } else {
                    debug!(target: "mqtt_transport", "MQTT connection attempt already in progress");
                }
            }
            None => *session = Some(self.start_session()),
        }
    }

    fn disconnect(&self) {
        if let Some(session) = lock(&self.session).as_ref() {
            if let Err(e) = session.client.try_disconnect() {
                debug!("MQTT disconnect request not queued: {}", e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        let session = lock(&self.session);
        let Some(session) = session.as_ref() else {
            return false;
        };
        match session.client.try_subscribe(topic, qos) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
                false
            }
        }
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        let session = lock(&self.session);
        let Some(session) = session.as_ref() else {
            return false;
        };
        match session
            .client
            .try_publish(topic, qos, retain, payload.to_vec())
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish to {}: {}", topic, e);
                false
            }
        }
    }

    fn poll_event(&self) -> Option<ClientEvent> {
        lock(&self.events_rx).try_recv().ok()
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        let Some(Session {
            client, mut driver, ..
        }) = lock(&self.session).take()
        else {
            return;
        };
        // The loop drains queued requests and stops once the channel is closed
        drop(client);
        self.runtime.spawn(async move {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
                .await
                .is_err()
            {
                driver.abort();
            }
        });
    }
}

/// Creates [`RumqttcClient`]s on a tokio runtime
#[derive(Debug, Clone)]
pub struct RumqttcFactory {
    runtime: Handle,
}

impl RumqttcFactory {
    /// Use the runtime the caller is running inside
    pub fn new() -> Result<Self, ClientError> {
        Handle::try_current()
            .map(Self::with_handle)
            .map_err(|_| ClientError::NoRuntime)
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl ClientFactory for RumqttcFactory {
    fn create(&self, settings: &ConnectSettings) -> Result<Box<dyn AsyncCapability>, ClientError> {
        Ok(Box::new(RumqttcClient::new(
            settings.clone(),
            self.runtime.clone(),
        )))
    }
}

/// Host-owned rumqttc client, used through [`PollingCapability`].
///
/// The host keeps driving its own event loop and reports the connection
/// state through [`HostClient::observe`] or [`HostClient::set_connected`].
#[derive(Clone)]
pub struct HostClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl HostClient {
    pub fn new(client: AsyncClient, connected: bool) -> Self {
        Self {
            client,
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Shared flag, for hosts that track the connection elsewhere
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Update the connection flag from an event the host polled and return
    /// its translation for forwarding to the adapter
    pub fn observe(&self, event: &Event) -> Option<ClientEvent> {
        let event = ClientEvent::from_rumqttc(event)?;
        match &event {
            ClientEvent::Connected { .. } => self.set_connected(true),
            ClientEvent::Disconnected { .. } => self.set_connected(false),
            ClientEvent::Message { .. } => {}
        }
        Some(event)
    }
}

impl PollingCapability for HostClient {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        match self.client.try_subscribe(topic, qos) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
                false
            }
        }
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        match self.client.try_publish(topic, qos, retain, payload.to_vec()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish to {}: {}", topic, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::connection::DEFAULT_KEEP_ALIVE;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet};
    use rumqttc::v5::MqttOptions;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// MQTT v5 CONNACK: success, no properties
    const CONNACK: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];
    const DISCONNECT_HEADER: u8 = 0xE0;

    fn unreachable_settings() -> ConnectSettings {
        ConnectSettings {
            // Nothing listens on the discard port
            host: "127.0.0.1".to_string(),
            port: 9,
            credentials: None,
            client_id: "espmole-test".to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    fn local_settings(port: u16) -> ConnectSettings {
        ConnectSettings {
            host: "127.0.0.1".to_string(),
            port,
            ..unreachable_settings()
        }
    }

    async fn next_event(client: &RumqttcClient) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(event) = client.poll_event() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client event within timeout")
    }

    #[test]
    fn test_factory_requires_runtime() {
        assert!(matches!(RumqttcFactory::new(), Err(ClientError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_client_idle_before_connect() {
        let factory = RumqttcFactory::new().unwrap();
        let client = factory.create(&unreachable_settings()).unwrap();

        assert!(!client.connected());
        assert!(client.poll_event().is_none());
        assert!(!client.subscribe("espmole/x/cmd", QoS::AtMostOnce));
        assert!(!client.publish("espmole/x/resp", b"x", QoS::AtMostOnce, false));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_disconnect() {
        let client = RumqttcClient::new(unreachable_settings(), Handle::current());
        client.connect();

        let event = next_event(&client).await;
        assert!(matches!(event, ClientEvent::Disconnected { .. }));
        assert!(!client.connected());
    }

    #[tokio::test]
    async fn test_connect_during_pending_attempt_does_not_reconnect_later() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let broker_accepts = accepts.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                if broker_accepts.fetch_add(1, Ordering::SeqCst) > 0 {
                    continue;
                }
                let mut buf = [0u8; 256];
                let _ = socket.read(&mut buf).await;
                // Hold the CONNACK back so the second connect() lands mid-attempt
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = socket.write_all(&CONNACK).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        });

        let client = RumqttcClient::new(local_settings(port), Handle::current());
        client.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.connect();

        assert!(matches!(
            next_event(&client).await,
            ClientEvent::Connected { .. }
        ));
        assert!(matches!(
            next_event(&client).await,
            ClientEvent::Disconnected { .. }
        ));

        // Nobody asked for another attempt
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert!(client.poll_event().is_none());

        client.connect();
        assert!(matches!(
            next_event(&client).await,
            ClientEvent::Disconnected { .. }
        ));
        assert_eq!(accepts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drop_flushes_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(&CONNACK).await;
            let header = match socket.read(&mut buf).await {
                Ok(n) if n > 0 => Some(buf[0]),
                _ => None,
            };
            let _ = seen_tx.send(header);
        });

        let client = RumqttcClient::new(local_settings(port), Handle::current());
        client.connect();
        assert!(matches!(
            next_event(&client).await,
            ClientEvent::Connected { .. }
        ));

        // What releasing an owned binding does
        client.disconnect();
        drop(client);

        let header = tokio::time::timeout(Duration::from_secs(5), seen_rx)
            .await
            .expect("broker sees the client go away")
            .unwrap();
        assert_eq!(header, Some(DISCONNECT_HEADER));
    }

    #[tokio::test]
    async fn test_will_is_kept_for_session() {
        let client = RumqttcClient::new(unreachable_settings(), Handle::current());
        let will = Will {
            topic: "espmole/x/status".to_string(),
            payload: b"offline".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        client.set_will(will.clone());
        assert_eq!(lock(&client.will).as_ref(), Some(&will));
    }

    #[test]
    fn test_host_client_tracks_connection() {
        let (client, _event_loop) =
            AsyncClient::new(MqttOptions::new("host", "localhost", 1883), 10);
        let host = HostClient::new(client, false);
        assert!(!PollingCapability::connected(&host));

        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            host.observe(&connack),
            Some(ClientEvent::Connected { .. })
        ));
        assert!(PollingCapability::connected(&host));

        assert!(host.publish("espmole/x/resp", b"ok", QoS::AtMostOnce, false));
        assert!(host.subscribe("home/#", QoS::AtMostOnce));
    }

    #[test]
    fn test_host_client_shared_flag() {
        let (client, _event_loop) =
            AsyncClient::new(MqttOptions::new("host", "localhost", 1883), 10);
        let host = HostClient::new(client, true);
        host.connection_flag().store(false, Ordering::SeqCst);
        assert!(!PollingCapability::connected(&host));
    }
}
