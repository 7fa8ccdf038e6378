//! Mock implementations for testing
//!
//! Provides mock client capabilities, a mock client factory and a recording
//! dispatcher so the adapter can be exercised without a broker. Every client
//! call is recorded in order.

use crate::dispatcher::{write_reply, Dispatcher, PeerHandle};
use crate::transport::mqtt::{
    AsyncCapability, ClientError, ClientEvent, ClientFactory, ConnectSettings, PollingCapability,
    Will,
};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded client call
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    SetWill(Will),
    Connect,
    Disconnect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
}

/// Mock event-driven client
#[derive(Debug, Default)]
pub struct MockAsyncClient {
    calls: Mutex<Vec<ClientCall>>,
    events: Mutex<VecDeque<ClientEvent>>,
    connected: AtomicBool,
    should_fail: AtomicBool,
}

impl MockAsyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose subscribe and publish calls report failure
    pub fn with_failure() -> Self {
        let client = Self::default();
        client.should_fail.store(true, Ordering::SeqCst);
        client
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Broker accepted the connection
    pub fn simulate_connect(&self) {
        self.set_connected(true);
        self.push_event(ClientEvent::Connected {
            session_present: false,
        });
    }

    /// Connection lost
    pub fn simulate_disconnect(&self) {
        self.set_connected(false);
        self.push_event(ClientEvent::Disconnected {
            reason: "simulated".to_string(),
        });
    }

    /// Inbound message delivered in one piece
    pub fn simulate_message(&self, topic: &str, payload: &[u8]) {
        self.push_event(ClientEvent::message(topic, Bytes::copy_from_slice(payload)));
    }

    pub fn push_event(&self, event: ClientEvent) {
        lock(&self.events).push_back(event);
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.calls).clone()
    }

    pub fn publishes(&self) -> Vec<ClientCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ClientCall::Publish { .. }))
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ClientCall::Connect))
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: ClientCall) {
        lock(&self.calls).push(call);
    }
}

impl AsyncCapability for MockAsyncClient {
    fn set_will(&self, will: Will) {
        self.record(ClientCall::SetWill(will));
    }

    fn connect(&self) {
        self.record(ClientCall::Connect);
    }

    fn disconnect(&self) {
        self.record(ClientCall::Disconnect);
        self.set_connected(false);
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        self.record(ClientCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        !self.should_fail.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        self.record(ClientCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        !self.should_fail.load(Ordering::SeqCst)
    }

    fn poll_event(&self) -> Option<ClientEvent> {
        lock(&self.events).pop_front()
    }
}

/// Mock host-owned polling client
#[derive(Debug, Default)]
pub struct MockPollingClient {
    calls: Mutex<Vec<ClientCall>>,
    connected: AtomicBool,
}

impl MockPollingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_connected() -> Self {
        let client = Self::default();
        client.set_connected(true);
        client
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        lock(&self.calls).clone()
    }

    pub fn publishes(&self) -> Vec<ClientCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ClientCall::Publish { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

impl PollingCapability for MockPollingClient {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> bool {
        lock(&self.calls).push(ClientCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        true
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        lock(&self.calls).push(ClientCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        true
    }
}

/// Factory handing out one shared [`MockAsyncClient`]
#[derive(Debug, Default)]
pub struct MockFactory {
    client: Arc<MockAsyncClient>,
    created: Mutex<Vec<ConnectSettings>>,
    should_fail: bool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that refuses to create clients
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// The client returned by `create`
    pub fn client(&self) -> Arc<MockAsyncClient> {
        self.client.clone()
    }

    pub fn created_settings(&self) -> Vec<ConnectSettings> {
        lock(&self.created).clone()
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, settings: &ConnectSettings) -> Result<Box<dyn AsyncCapability>, ClientError> {
        if self.should_fail {
            return Err(ClientError::ConnectionFailed("mock factory failure".to_string()));
        }
        lock(&self.created).push(settings.clone());
        Ok(Box::new(self.client.clone()))
    }
}

/// Dispatcher that records every request and answers with a fixed reply
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    requests: Arc<Mutex<Vec<(PeerHandle, Vec<u8>)>>>,
    reply: Vec<u8>,
}

impl RecordingDispatcher {
    /// Records requests and never replies
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: &[u8]) -> Self {
        Self {
            reply: reply.to_vec(),
            ..Default::default()
        }
    }

    /// Requests seen so far; clones share the same record
    pub fn requests(&self) -> Vec<(PeerHandle, Vec<u8>)> {
        lock(&self.requests).clone()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn ingest(&mut self, peer: PeerHandle, request: &[u8], response: &mut [u8]) -> usize {
        lock(&self.requests).push((peer, request.to_vec()));
        write_reply(response, &self.reply)
    }
}
