//! Testing utilities and mock implementations
//!
//! This module provides mock client capabilities and dispatchers for testing
//! the transport adapter without an MQTT broker.

pub mod mocks;

pub use mocks::*;
