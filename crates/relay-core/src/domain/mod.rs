//! Domain entities for the relay.
//!
//! Pure types with no I/O: who a client is ([`client`]) and which client
//! currently owns which name ([`registry`]).  Transports in `relay-server`
//! depend on these; nothing here depends on a transport.

pub mod client;
pub mod registry;
