//! Standalone vs. integration mode selection
//!
//! Whether the adapter is *active* is tracked by the client binding, not here.

use tracing::{info, warn};

/// Who owns the MQTT client lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The adapter creates, connects and releases its own client
    Standalone,
    /// The host owns the client and forwards events to the adapter
    Integration,
}

/// Outcome of a standalone activation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginDecision {
    /// Already standalone, activate as configured
    Proceed,
    /// Constructed without configuration; activate with defaults
    Promoted,
    /// An attach already happened; integration mode is final
    RejectedAfterAttach,
}

/// Two-state mode machine. An attach is terminal.
#[derive(Debug, Clone)]
pub struct ModeController {
    mode: Mode,
    attached: bool,
}

impl ModeController {
    /// Initial mode depends on whether a configuration was supplied
    pub fn new(configured: bool) -> Self {
        let mode = if configured {
            Mode::Standalone
        } else {
            Mode::Integration
        };
        Self {
            mode,
            attached: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn begin(&mut self) -> BeginDecision {
        if self.attached {
            warn!("begin() called after attach; staying in integration mode");
            return BeginDecision::RejectedAfterAttach;
        }
        match self.mode {
            Mode::Standalone => BeginDecision::Proceed,
            Mode::Integration => {
                info!("begin() called without configuration; switching to standalone mode with defaults");
                self.mode = Mode::Standalone;
                BeginDecision::Promoted
            }
        }
    }

    pub fn attach(&mut self) {
        if self.mode == Mode::Standalone {
            info!("Attaching to host client; leaving standalone mode");
        }
        self.mode = Mode::Integration;
        self.attached = true;
    }
}
