//! # relay-core
//!
//! Shared library for the arcade message relay containing the JSON message
//! model, the named-client registry, and the routing rules that decide where
//! each message goes.
//!
//! This crate does no I/O.  It has no dependency on sockets, serial ports, or
//! an async runtime; the `relay-server` crate supplies those and plugs them in
//! through the [`ClientSink`] and [`HardwareLink`] traits.
//!
//! # Architecture overview
//!
//! The relay sits in the middle of an arcade cabinet installation.  Several
//! browser windows (score screen, machine, combinations screen, ...) connect
//! to it over WebSocket under a unique name, and two Arduino boards are
//! attached over serial.  Every message names its receiver:
//!
//! - **`protocol`** – The JSON envelope (`event`, `data`, `receiver`) and the
//!   codec that validates it at decode time.
//!
//! - **`domain`** – Client names, connection identities, hardware aliases,
//!   and the [`ClientRegistry`] that enforces one live connection per name.
//!
//! - **`router`** – The dispatch algorithm: single receiver, array fan-out,
//!   or broadcast, with the hardware aliases resolved before any registry
//!   lookup.

pub mod domain;
pub mod protocol;
pub mod router;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Router` instead of `relay_core::router::Router`.
pub use domain::client::{ClientName, ConnectionId, HardwareAlias};
pub use domain::registry::{ClientRegistry, RegisterError};
pub use protocol::codec::{decode_message, encode_message, error_reply, ProtocolError};
pub use protocol::message::{Receiver, RelayMessage};
pub use router::{ClientSink, DispatchOutcome, HardwareLink, LinkError, Router, Sender, SinkError};
