//! espmole MQTT bridge - Main Entry Point
//!
//! Runs the transport adapter in standalone mode against a small built-in
//! dispatcher, for trying a broker setup without device firmware.

use clap::{Parser, Subcommand};
use espmole_mqtt::config::BridgeConfig;
use espmole_mqtt::dispatcher::{write_reply, Dispatcher, PeerHandle};
use espmole_mqtt::observability::init_default_logging;
use espmole_mqtt::transport::mqtt::MqttTransport;
use espmole_mqtt::BridgeResult;
use std::path::PathBuf;
use std::process;
use tokio::{signal, time::Duration};
use tracing::{debug, error, info};

/// How often the adapter is polled
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// MQTT bridge for the espmole command dispatcher
#[derive(Parser)]
#[command(name = "espmole-bridge")]
#[command(about = "Bridge a command dispatcher to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Device id override (defaults to the hardware address)
    #[arg(long, env = "ESPMOLE_DEVICE_ID")]
    device_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and serve commands until Ctrl-C
    Run,
    /// Validate configuration
    Config {
        /// Print the resolved configuration as JSON
        #[arg(long)]
        show: bool,
    },
}

/// Toy dispatcher: `led` toggles a virtual LED, `echo <text>` echoes
#[derive(Debug, Default)]
struct DemoDispatcher {
    led_on: bool,
}

impl Dispatcher for DemoDispatcher {
    fn ingest(&mut self, peer: PeerHandle, request: &[u8], response: &mut [u8]) -> usize {
        let request = String::from_utf8_lossy(request);
        let request = request.trim();
        debug!(peer, request, "Demo dispatcher received command");

        let mut parts = request.splitn(2, ' ');
        match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("led") => {
                self.led_on = !self.led_on;
                let reply: &[u8] = if self.led_on { b"LED ON" } else { b"LED OFF" };
                write_reply(response, reply)
            }
            Some("echo") => write_reply(response, parts.next().unwrap_or_default().as_bytes()),
            _ => write_reply(response, b"ERR unknown command"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    init_default_logging();

    info!("Starting espmole MQTT bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(device_id) = cli.device_id {
        config.mqtt.device_id = Some(device_id);
    }

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> BridgeResult<BridgeConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(BridgeConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            for path_str in ["espmole.toml", "config/espmole.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(BridgeConfig::load_from_file(&path)?);
                }
            }
            info!("No configuration file found; using defaults");
            Ok(BridgeConfig::default())
        }
    }
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    let mut transport = MqttTransport::with_config(DemoDispatcher::default(), config.mqtt);
    transport.begin();

    if !transport.is_active() {
        return Err(espmole_mqtt::BridgeError::internal(
            "MQTT transport did not start; check the broker setting",
        ));
    }
    info!(
        command_topic = transport.command_topic().unwrap_or_default(),
        "Bridge running, press Ctrl-C to stop"
    );

    let mut tick = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = tick.tick() => transport.poll(),
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    // Dropping the transport disconnects the owned client
    drop(transport);
    Ok(())
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    config.mqtt.validate()?;
    info!("Configuration is valid");

    if show {
        let rendered = serde_json::to_string_pretty(config)
            .map_err(|e| espmole_mqtt::BridgeError::internal(e.to_string()))?;
        println!("{rendered}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use espmole_mqtt::dispatcher::{PEER_MQTT, RESPONSE_BUFFER_SIZE};

    fn ingest(dispatcher: &mut DemoDispatcher, request: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        let len = dispatcher.ingest(PEER_MQTT, request, &mut buf);
        buf[..len].to_vec()
    }

    #[test]
    fn test_led_toggles() {
        let mut dispatcher = DemoDispatcher::default();
        assert_eq!(ingest(&mut dispatcher, b"LED"), b"LED ON");
        assert_eq!(ingest(&mut dispatcher, b"led"), b"LED OFF");
    }

    #[test]
    fn test_echo() {
        let mut dispatcher = DemoDispatcher::default();
        assert_eq!(ingest(&mut dispatcher, b"echo hello world"), b"hello world");
        assert_eq!(ingest(&mut dispatcher, b"echo"), b"");
    }

    #[test]
    fn test_unknown_command() {
        let mut dispatcher = DemoDispatcher::default();
        assert_eq!(ingest(&mut dispatcher, b"reboot"), b"ERR unknown command");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["espmole-bridge", "--device-id", "dev1", "config", "--show"])
            .unwrap();
        assert_eq!(cli.device_id.as_deref(), Some("dev1"));
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }
}
