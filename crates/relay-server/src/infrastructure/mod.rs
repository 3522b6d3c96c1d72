//! Infrastructure layer for relay-server.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from the cabinet's browser windows, reading and writing the two serial
//! boards, and the in-process transport used when no socket is involved.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade handshake
//! - Extracting the client name from the upgrade request's query string
//! - Per-session reader and writer tasks
//! - Opening serial ports, splitting the input board's output into lines
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Routing decisions (that is `relay-core`'s router, run by the hub)
//! - Configuration parsing (that is the domain layer and `main.rs`)

pub mod local;
pub mod serial;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use local::{LocalClient, LocalTransport};
pub use serial::open_hardware;
pub use ws_server::{bind_listener, run_server, serve};
