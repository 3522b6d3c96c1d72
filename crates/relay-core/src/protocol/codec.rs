//! JSON codec for relay messages.
//!
//! Wire format: one UTF-8 JSON object per WebSocket frame or serial line.
//! Decoding validates the envelope (see [`RelayMessage`]); encoding always
//! re-serialises the whole message, not just its `data`.

use thiserror::Error;

use crate::protocol::message::{ErrorReply, RelayMessage};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// A binary frame did not contain valid UTF-8.
    #[error("message is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The text is not JSON, or the JSON does not match the envelope.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes a JSON text frame into a [`RelayMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if `text` is not JSON, is not an
/// object, lacks a string `event`, or carries a `receiver` of the wrong shape.
///
/// # Examples
///
/// ```rust
/// use relay_core::protocol::{decode_message, Receiver};
///
/// let msg = decode_message(r#"{"event":"ping","receiver":"score"}"#).unwrap();
/// assert_eq!(msg.event, "ping");
/// assert_eq!(msg.receiver, Receiver::Single("score".into()));
/// ```
pub fn decode_message(text: &str) -> Result<RelayMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decodes a binary frame, which must hold UTF-8 JSON.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] for non-UTF-8 bytes, otherwise the
/// same errors as [`decode_message`].
pub fn decode_bytes(bytes: &[u8]) -> Result<RelayMessage, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    decode_message(text)
}

/// Serialises a [`RelayMessage`] to JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails, which can only
/// happen if `extra` holds a key that collides with a typed field.
pub fn encode_message(msg: &RelayMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Returns the JSON text of an `error` event carrying `message`.
pub fn error_reply(message: &str) -> String {
    let reply = ErrorReply::new(message);
    serde_json::json!({ "event": reply.event, "message": reply.message }).to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
