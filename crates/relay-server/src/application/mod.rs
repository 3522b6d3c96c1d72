//! Application layer for relay-server.
//!
//! The application layer orchestrates the relay: it owns the [`Router`]
//! inside a single event-loop task and exposes a handle the transports use.
//! It knows *what* to do with a frame; *how* frames arrive and leave is the
//! infrastructure layer's job.
//!
//! [`Router`]: relay_core::Router

pub mod hub;

pub use hub::{ChannelSink, Hub, HubCommand, HubError, HubHandle, Outbound, Payload};
