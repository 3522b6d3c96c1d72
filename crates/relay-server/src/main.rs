//! Arcade relay entry point.
//!
//! Runs the WebSocket hub the cabinet's browser windows connect to, and
//! bridges it to the two Arduino boards over serial.
//!
//! # Usage
//!
//! ```text
//! arcade-relay [OPTIONS]
//!
//! Options:
//!   --port   <PORT>   WebSocket listener port [default: 3001]
//!   --bind   <ADDR>   Address to bind [default: 0.0.0.0]
//!   --config <FILE>   TOML file with serial device settings
//!   --no-serial       Do not open either serial port
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable       | Default   | Description              |
//! |----------------|-----------|--------------------------|
//! | `PORT`         | `3001`    | WebSocket listener port  |
//! | `RELAY_BIND`   | `0.0.0.0` | Bind address             |
//! | `RELAY_CONFIG` | (none)    | Serial config file path  |
//! | `RUST_LOG`     | `info`    | Log filter               |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_server::application::Hub;
use relay_server::domain::config::{load_config_file, DEFAULT_PORT};
use relay_server::domain::RelayConfig;
use relay_server::infrastructure::{open_hardware, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Message relay for the arcade cabinet.
#[derive(Debug, Parser)]
#[command(
    name = "arcade-relay",
    about = "WebSocket and serial message relay for the arcade cabinet",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server (ws://host:PORT?name=...).
    #[arg(long, default_value_t = DEFAULT_PORT, env = "PORT")]
    port: u16,

    /// IP address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_BIND")]
    bind: String,

    /// TOML file with `[serial.bulbs]` and `[serial.input_board]` settings.
    ///
    /// Without it the built-in device paths are used.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Run without opening either serial port.
    #[arg(long)]
    no_serial: bool,
}

impl Cli {
    /// Builds the [`RelayConfig`] from the arguments and optional file.
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address, or if the
    /// config file cannot be read or parsed.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let ws_bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid WebSocket bind address: '{}:{}'",
                    self.bind, self.port
                )
            })?;

        let mut serial = match &self.config {
            Some(path) => {
                load_config_file(path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
                    .serial
            }
            None => Default::default(),
        };
        if self.no_serial {
            serial.disable_all();
        }

        Ok(RelayConfig {
            ws_bind_addr,
            serial,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. Logging is initialised from `RUST_LOG` (default `info`).
/// 2. CLI arguments and the optional config file become a [`RelayConfig`].
/// 3. The hub is built and the serial boards are attached to it.  A board
///    that fails to open is logged and left out.
/// 4. The hub task is spawned, and a Ctrl+C handler clears the shutdown flag.
/// 5. The WebSocket server runs until the flag is cleared, then the hub
///    closes every connection.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;
    info!("arcade relay starting, ws={}", config.ws_bind_addr);

    // ── Hub and hardware ──────────────────────────────────────────────────────
    let mut hub = Hub::new();
    let attached = open_hardware(&config.serial, &mut hub);
    info!("serial boards attached: {attached:?}");
    let handle = hub.handle();
    let hub_task = tokio::spawn(hub.run());

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    let result = run_server(config.ws_bind_addr, handle.clone(), running).await;

    handle.shutdown();
    let _ = hub_task.await;
    info!("arcade relay stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
