//! The MQTT transport adapter
//!
//! Bridges the command dispatcher to an MQTT broker. In standalone mode it
//! creates, connects and supervises its own client; in integration mode it
//! rides on a client the host application owns and only reacts to the
//! notifications the host forwards.
//!
//! All methods run on the caller's control loop and never block.

use super::capability::{
    AsyncCapability, ClientBinding, ClientEvent, ClientFactory, PollingCapability,
};
use super::client::RumqttcFactory;
use super::connection::{ConnectSettings, Will, DEFAULT_KEEP_ALIVE};
use super::health_monitor::{ConnectionMonitor, ReconnectionDecision};
use super::message_handler::{MessageHandler, MessageRoute};
use super::mode::{BeginDecision, Mode, ModeController};
use super::topics::{HardwareAddress, TopicSet};
use crate::config::MqttConfig;
use crate::dispatcher::{Dispatcher, PeerHandle, PEER_MQTT, RESPONSE_BUFFER_SIZE};
use crate::transport::Transport;
use crate::{lifecycle_span, mqtt_span};
use once_cell::unsync::OnceCell;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Receives messages on topics outside the adapter's namespace
pub type UserCallback = Box<dyn FnMut(&str, &[u8]) + Send>;

/// MQTT transport for the command dispatcher
pub struct MqttTransport {
    dispatcher: Box<dyn Dispatcher>,
    config: MqttConfig,
    modes: ModeController,
    topics: OnceCell<TopicSet>,
    hardware_address: Option<HardwareAddress>,
    binding: ClientBinding,
    user_callback: Option<UserCallback>,
    monitor: ConnectionMonitor,
}

impl MqttTransport {
    /// Adapter without configuration, waiting for the host to attach a client
    pub fn new<D: Dispatcher + 'static>(dispatcher: D) -> Self {
        Self::build(Box::new(dispatcher), MqttConfig::default(), false)
    }

    /// Standalone adapter that will manage its own client once `begin` is called
    pub fn with_config<D: Dispatcher + 'static>(dispatcher: D, config: MqttConfig) -> Self {
        Self::build(Box::new(dispatcher), config, true)
    }

    fn build(dispatcher: Box<dyn Dispatcher>, config: MqttConfig, configured: bool) -> Self {
        let monitor = ConnectionMonitor::new(config.reconnect_policy());
        Self {
            dispatcher,
            config,
            modes: ModeController::new(configured),
            topics: OnceCell::new(),
            hardware_address: None,
            binding: ClientBinding::Unbound,
            user_callback: None,
            monitor,
        }
    }

    /// Use this hardware address for the device id instead of probing the host
    pub fn with_hardware_address(mut self, address: HardwareAddress) -> Self {
        self.hardware_address = Some(address);
        self
    }

    pub fn set_user_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&str, &[u8]) + Send + 'static,
    {
        self.user_callback = Some(Box::new(callback));
    }

    /// Start standalone operation with a rumqttc client on the current tokio runtime
    pub fn begin(&mut self) {
        let Some(settings) = self.prepare_standalone() else {
            return;
        };
        match RumqttcFactory::new() {
            Ok(factory) => self.activate(&factory, settings),
            Err(e) => warn!("Cannot start MQTT transport: {}", e),
        }
    }

    /// Start standalone operation with clients from `factory`
    pub fn begin_with(&mut self, factory: &dyn ClientFactory) {
        if let Some(settings) = self.prepare_standalone() {
            self.activate(factory, settings);
        }
    }

    /// Mode transition, topic build and settings resolution. `None` leaves the adapter inert.
    fn prepare_standalone(&mut self) -> Option<ConnectSettings> {
        let _span = lifecycle_span!(operation = "begin").entered();

        match self.modes.begin() {
            BeginDecision::RejectedAfterAttach => return None,
            BeginDecision::Promoted | BeginDecision::Proceed => {}
        }
        if self.binding.is_owned() {
            debug!("MQTT transport already active");
            return None;
        }

        let device_id = self.ensure_topics().device_id().to_string();

        let (host, port) = match self.config.broker_endpoint() {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                warn!("No MQTT broker configured; transport stays inactive");
                return None;
            }
            Err(e) => {
                warn!("Invalid MQTT broker: {}; transport stays inactive", e);
                return None;
            }
        };
        let credentials = match self.config.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("MQTT credentials unavailable: {}; transport stays inactive", e);
                return None;
            }
        };

        Some(ConnectSettings {
            host,
            port,
            credentials,
            client_id: self.config.client_id.clone().unwrap_or(device_id),
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }

    fn activate(&mut self, factory: &dyn ClientFactory, settings: ConnectSettings) {
        let client = match factory.create(&settings) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to create MQTT client: {}", e);
                return;
            }
        };

        if let Some(will) = self.status_will() {
            client.set_will(will);
        }
        client.connect();
        self.monitor.record_attempt(Instant::now());
        self.binding = ClientBinding::Owned(client);

        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            "MQTT transport started in standalone mode"
        );
    }

    /// Integrate with a host-owned event-driven client.
    ///
    /// The will is registered here, so attach before the host connects.
    /// Subscription and birth follow once the host calls [`Self::on_mqtt_connect`].
    pub fn attach_async(&mut self, client: Arc<dyn AsyncCapability>) {
        let _span = lifecycle_span!(operation = "attach_async").entered();
        self.modes.attach();
        self.ensure_topics();

        if let Some(will) = self.status_will() {
            client.set_will(will);
        }
        self.binding = ClientBinding::AttachedAsync(client);
        info!("MQTT transport attached to host async client");
    }

    /// Integrate with a host-owned client that is already connected
    pub fn attach_polling(&mut self, client: Arc<dyn PollingCapability>) {
        let _span = lifecycle_span!(operation = "attach_polling").entered();
        self.modes.attach();
        self.ensure_topics();

        let connected = client.connected();
        self.binding = ClientBinding::AttachedPolling(client);
        info!("MQTT transport attached to host polling client");

        if connected {
            self.announce();
        } else {
            warn!("Host MQTT client is not connected; subscription waits for on_mqtt_connect");
        }
    }

    /// Drain client notifications and run the reconnect policy
    pub fn poll(&mut self) {
        self.poll_at(Instant::now());
    }

    /// [`Self::poll`] against an explicit clock
    pub fn poll_at(&mut self, now: Instant) {
        let Some(client) = self.binding.owned() else {
            return;
        };
        let mut events = Vec::new();
        while let Some(event) = client.poll_event() {
            events.push(event);
        }

        for event in events {
            self.handle_client_event(event);
        }

        let decision = self.monitor.should_attempt(now, self.binding.connected());
        if let ReconnectionDecision::Proceed { attempt } = decision {
            if let Some(client) = self.binding.owned() {
                info!(attempt, "Reconnecting to MQTT broker");
                client.connect();
                self.monitor.record_attempt(now);
            }
        }
    }

    /// Feed one client notification, as forwarded by a host
    pub fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected { .. } => self.on_mqtt_connect(),
            ClientEvent::Disconnected { reason } => {
                debug!(%reason, "MQTT client disconnected");
                self.on_disconnect();
            }
            ClientEvent::Message {
                topic,
                payload,
                offset,
                total,
            } => {
                self.handle_delivery(&topic, &payload, offset, total);
            }
        }
    }

    /// Connection (re-)established: subscribe to commands, then announce birth
    pub fn on_mqtt_connect(&mut self) {
        self.monitor.on_connected();
        self.ensure_topics();
        self.announce();
    }

    pub fn on_disconnect(&mut self) {
        self.monitor.on_disconnected();
    }

    fn announce(&self) {
        let Some(topics) = self.topics.get() else {
            return;
        };
        let _span = mqtt_span!(operation = "announce", device_id = topics.device_id()).entered();

        if !self.binding.subscribe(topics.command(), self.config.qos_level()) {
            warn!(topic = topics.command(), "Failed to subscribe to command topic");
        }
        if self.config.enable_status
            && !self.binding.publish(
                topics.status(),
                self.config.birth_payload.as_bytes(),
                QoS::AtLeastOnce,
                self.config.retain_status,
            )
        {
            warn!(topic = topics.status(), "Failed to publish birth message");
        }
    }

    /// Entry point for possibly fragmented deliveries.
    ///
    /// Anything but a complete payload is dropped and reported as consumed.
    pub fn handle_delivery(
        &mut self,
        topic: &str,
        payload: &[u8],
        offset: usize,
        total: usize,
    ) -> bool {
        if !MessageHandler::is_complete_delivery(payload.len(), offset, total) {
            debug!(
                topic,
                offset,
                len = payload.len(),
                total,
                "Dropping fragmented MQTT delivery"
            );
            return true;
        }
        self.handle_message(topic, payload)
    }

    /// Route one complete message. `true` if it belonged to the adapter.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> bool {
        let command = self.topics.get().map(TopicSet::command);
        match MessageHandler::classify(topic, command, &self.config.base_topic) {
            MessageRoute::Command => {
                self.dispatch_command(payload);
                true
            }
            MessageRoute::OwnNamespace => true,
            MessageRoute::Foreign => {
                match self.user_callback.as_mut() {
                    Some(callback) => callback(topic, payload),
                    None => debug!(topic, "No user callback for foreign message"),
                }
                false
            }
        }
    }

    fn dispatch_command(&mut self, payload: &[u8]) {
        let _span = mqtt_span!(operation = "dispatch", len = payload.len()).entered();

        let mut response = [0u8; RESPONSE_BUFFER_SIZE];
        let len = self
            .dispatcher
            .ingest(PEER_MQTT, payload, &mut response)
            .min(RESPONSE_BUFFER_SIZE);
        if len == 0 {
            debug!("Dispatcher produced no response");
            return;
        }

        let Some(topics) = self.topics.get() else {
            return;
        };
        if !self
            .binding
            .publish(topics.response(), &response[..len], self.config.qos_level(), false)
        {
            warn!(topic = topics.response(), "Failed to publish command response");
        }
    }

    /// Publish through the bound client. `false` if unbound or offline.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        self.binding.publish(topic, payload, qos, retain)
    }

    /// Subscribe to an extra topic; its messages reach the user callback
    pub fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        if !self.binding.connected() {
            debug!(topic, "Subscribe skipped: not connected");
            return false;
        }
        self.binding.subscribe(topic, qos)
    }

    pub fn command_topic(&self) -> Option<&str> {
        self.topics.get().map(TopicSet::command)
    }

    pub fn response_topic(&self) -> Option<&str> {
        self.topics.get().map(TopicSet::response)
    }

    pub fn status_topic(&self) -> Option<&str> {
        self.topics.get().map(TopicSet::status)
    }

    pub fn event_topic(&self) -> Option<&str> {
        self.topics.get().map(TopicSet::event)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.topics.get().map(TopicSet::device_id)
    }

    pub fn topics(&self) -> Option<&TopicSet> {
        self.topics.get()
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn connected(&self) -> bool {
        self.binding.connected()
    }

    /// Whether a client is bound (owned or attached)
    pub fn is_active(&self) -> bool {
        self.binding.is_bound()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.monitor.reconnect_count()
    }

    fn ensure_topics(&self) -> &TopicSet {
        self.topics.get_or_init(|| {
            let hardware = self
                .hardware_address
                .or_else(HardwareAddress::detect)
                .unwrap_or_else(|| {
                    warn!("No hardware address found; device id falls back to all zeros");
                    HardwareAddress::UNSPECIFIED
                });
            let topics = TopicSet::build(
                &self.config.base_topic,
                self.config.device_id.as_deref(),
                hardware,
            );
            info!(
                device_id = topics.device_id(),
                command = topics.command(),
                "MQTT topics built"
            );
            topics
        })
    }

    fn status_will(&self) -> Option<Will> {
        if !self.config.enable_status {
            return None;
        }
        Some(Will {
            topic: self.ensure_topics().status().to_string(),
            payload: self.config.lwt_payload.clone().into_bytes(),
            qos: QoS::AtLeastOnce,
            retain: self.config.retain_status,
        })
    }
}

impl Transport for MqttTransport {
    /// Responses always go to the response topic, whatever the peer
    fn send(&self, _peer: PeerHandle, data: &[u8]) -> bool {
        match self.response_topic() {
            Some(topic) => self.publish(topic, data, self.config.qos_level(), false),
            None => false,
        }
    }

    fn broadcast(&self, data: &[u8]) -> bool {
        match self.event_topic() {
            Some(topic) => self.publish(topic, data, self.config.qos_level(), false),
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("mode", &self.modes.mode())
            .field("binding", &self.binding)
            .field("topics", &self.topics.get())
            .finish()
    }
}
