//! Connection tracking and reconnect scheduling for standalone mode
//!
//! Pure bookkeeping: the adapter feeds it connection events and asks it
//! whether a new attempt is due. Time is always passed in.

use super::connection::ReconnectPolicy;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Decision result for a reconnect check
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Start connection attempt number `attempt` since the last successful connect
    Proceed { attempt: u32 },
    /// Too early; the next attempt is due after `remaining`
    Wait { remaining: Duration },
    /// Connected, nothing to do
    Connected,
}

/// `was_connected` / last attempt bookkeeping
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    policy: ReconnectPolicy,
    was_connected: bool,
    ever_connected: bool,
    last_attempt: Option<Instant>,
    attempts_since_connect: u32,
    reconnect_count: u32,
}

impl ConnectionMonitor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            was_connected: false,
            ever_connected: false,
            last_attempt: None,
            attempts_since_connect: 0,
            reconnect_count: 0,
        }
    }

    /// Successful connections after the first one
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.attempts_since_connect = self.attempts_since_connect.saturating_add(1);
    }

    pub fn on_connected(&mut self) {
        if self.ever_connected {
            self.reconnect_count = self.reconnect_count.saturating_add(1);
            info!(
                reconnects = self.reconnect_count,
                attempts = self.attempts_since_connect,
                "MQTT connection re-established"
            );
        }
        self.ever_connected = true;
        self.was_connected = true;
        self.attempts_since_connect = 0;
    }

    pub fn on_disconnected(&mut self) {
        if self.was_connected {
            info!("MQTT connection lost");
        }
        self.was_connected = false;
    }

    /// Whether a new connection attempt is due at `now`
    pub fn should_attempt(&self, now: Instant, connected: bool) -> ReconnectionDecision {
        if connected {
            return ReconnectionDecision::Connected;
        }

        let Some(last_attempt) = self.last_attempt else {
            return ReconnectionDecision::Proceed { attempt: 1 };
        };

        let delay = self.policy.delay_after(self.attempts_since_connect);
        let elapsed = now.saturating_duration_since(last_attempt);
        if elapsed >= delay {
            ReconnectionDecision::Proceed {
                attempt: self.attempts_since_connect.saturating_add(1),
            }
        } else {
            let remaining = delay - elapsed;
            debug!(remaining_ms = remaining.as_millis() as u64, "Reconnect not due yet");
            ReconnectionDecision::Wait { remaining }
        }
    }
}
