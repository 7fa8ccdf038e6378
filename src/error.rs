//! Crate-level error types for the MQTT transport adapter
//!
//! The adapter's runtime paths never fail hard: publish failures surface as
//! `false`, connectivity loss is retried. These errors cover the setup paths
//! around it (configuration loading, client construction).

use thiserror::Error;

/// Main error type for adapter setup operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] crate::transport::mqtt::ClientError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for adapter setup operations
pub type BridgeResult<T> = Result<T, BridgeError>;
