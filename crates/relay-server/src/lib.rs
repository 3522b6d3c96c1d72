//! relay-server library crate.
//!
//! This crate runs the arcade message relay: a WebSocket hub for the
//! cabinet's browser windows that also bridges to two serial (Arduino)
//! boards.
//!
//! # Architecture
//!
//! ```text
//! Browser windows (JSON over WebSocket)      Arduino boards (serial)
//!         ↕                                          ↕
//! [relay-server]
//!   ├── domain/           RelayConfig, TOML config file schema
//!   ├── application/      Hub: the single task that owns the Router
//!   └── infrastructure/
//!         ├── ws_server/  WebSocket accept loop (tokio-tungstenite)
//!         ├── serial/     Serial port adapters (tokio-serial)
//!         └── local/      In-process transport bound to the same hub
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O beyond reading the config file it is handed.
//! - `application` depends on `domain` and `relay-core` plus tokio channels.
//! - `infrastructure` depends on all other layers plus sockets and ports.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the hub event loop.
pub mod application;

/// Infrastructure layer: WebSocket server, serial ports, local transport.
pub mod infrastructure;
