//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! The WebSocket address comes from the command line (or the `PORT`
//! environment variable); the serial device settings come from an optional
//! TOML file and otherwise default to the cabinet's wiring:
//!
//! ```toml
//! [serial.bulbs]
//! path = "/dev/cu.usbmodem8401"
//! baud_rate = 9600
//!
//! [serial.input_board]
//! path = "/dev/cu.usbserial-59140062441"
//! baud_rate = 115200
//! enabled = true
//! ```
//!
//! Any key left out, or a whole missing `[serial.*]` section, keeps that
//! board's default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use relay_core::HardwareAlias;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default WebSocket port when neither `--port` nor `PORT` is set.
pub const DEFAULT_PORT: u16 = 3001;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// All runtime configuration for the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// The address and port the WebSocket server binds to.
    pub ws_bind_addr: SocketAddr,

    /// Serial device settings for the two boards.
    pub serial: SerialSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            serial: SerialSettings::default(),
        }
    }
}

/// Contents of the optional TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub serial: SerialSettings,
}

/// Serial settings for both boards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "SerialOverrides")]
pub struct SerialSettings {
    /// The lighting board, addressed as `"bulbs"`.
    pub bulbs: SerialPortConfig,

    /// The button/lever board, addressed as `"input-board"`.  Its output is
    /// read line by line and routed as messages.
    pub input_board: SerialPortConfig,
}

/// One serial device.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SerialPortConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM3`.
    pub path: String,
    pub baud_rate: u32,
    /// When `false` the port is never opened.
    pub enabled: bool,
}

/// `[serial]` as written in the file.  Every key is optional; a missing key
/// falls back to that board's own default.
#[derive(Debug, Deserialize)]
struct SerialOverrides {
    #[serde(default)]
    bulbs: PortOverrides,
    #[serde(default)]
    input_board: PortOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct PortOverrides {
    path: Option<String>,
    baud_rate: Option<u32>,
    enabled: Option<bool>,
}

impl PortOverrides {
    fn apply(self, base: SerialPortConfig) -> SerialPortConfig {
        SerialPortConfig {
            path: self.path.unwrap_or(base.path),
            baud_rate: self.baud_rate.unwrap_or(base.baud_rate),
            enabled: self.enabled.unwrap_or(base.enabled),
        }
    }
}

impl From<SerialOverrides> for SerialSettings {
    fn from(file: SerialOverrides) -> Self {
        Self {
            bulbs: file.bulbs.apply(default_bulbs()),
            input_board: file.input_board.apply(default_input_board()),
        }
    }
}

impl SerialSettings {
    /// Returns the settings for `alias`.
    pub fn port(&self, alias: HardwareAlias) -> &SerialPortConfig {
        match alias {
            HardwareAlias::Bulbs => &self.bulbs,
            HardwareAlias::InputBoard => &self.input_board,
        }
    }

    /// Turns both ports off (`--no-serial`).
    pub fn disable_all(&mut self) {
        self.bulbs.enabled = false;
        self.input_board.enabled = false;
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            bulbs: default_bulbs(),
            input_board: default_input_board(),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bulbs() -> SerialPortConfig {
    SerialPortConfig {
        path: "/dev/cu.usbmodem8401".to_string(),
        baud_rate: 9600,
        enabled: true,
    }
}

fn default_input_board() -> SerialPortConfig {
    SerialPortConfig {
        path: "/dev/cu.usbserial-59140062441".to_string(),
        baud_rate: 115200,
        enabled: true,
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses config file contents.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for invalid TOML or wrongly typed fields.
pub fn parse_config(text: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, or
/// [`ConfigError::Parse`] if its contents are invalid.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
