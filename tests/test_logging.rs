//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use espmole_mqtt::observability::logging::{parse_level, try_init_logging, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty_and_compact() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_whitespace() {
    // Untrimmed values are unknown formats and fall back to JSON
    assert!(matches!(LogFormat::parse("  pretty  "), LogFormat::Json));
    assert!(matches!(LogFormat::parse("compact\n"), LogFormat::Json));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_second_initialization_is_rejected() {
    // Only this test installs a global subscriber in this binary
    assert!(try_init_logging(Level::INFO, LogFormat::Compact, false).is_ok());
    assert!(try_init_logging(Level::DEBUG, LogFormat::Json, true).is_err());
}
