//! Protocol module containing the JSON message envelope and its codec.

pub mod codec;
pub mod message;

pub use codec::{decode_bytes, decode_message, encode_message, error_reply, ProtocolError};
pub use message::*;
