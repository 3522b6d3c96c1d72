//! Domain layer for relay-server.
//!
//! Holds the runtime configuration.  Message, registry, and routing types
//! live in `relay-core`; this layer only adds what the server process needs
//! to know at startup.

pub mod config;

pub use config::{ConfigError, RelayConfig, SerialPortConfig, SerialSettings};
