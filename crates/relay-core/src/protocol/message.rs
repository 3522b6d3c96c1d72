//! The JSON message envelope exchanged between relay clients.
//!
//! Every frame a client sends is a JSON object with this shape:
//!
//! ```json
//! {"event":"update-spins","data":{"value":2},"receiver":"score"}
//! ```
//!
//! - `event` names what happened.  It is required and must be a string.
//! - `data` is an arbitrary JSON payload.  The relay never inspects it.
//! - `receiver` selects the destination(s); see [`Receiver`].
//!
//! Any other top-level fields are kept in [`RelayMessage::extra`] and are
//! forwarded untouched, so clients can extend the envelope without a relay
//! upgrade.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event name used for error replies sent back to a client.
pub const ERROR_EVENT: &str = "error";

/// Error reply text when a single named receiver is not connected.
pub const RECEIVER_NOT_FOUND: &str = "receiver not found";

/// Raw text sent to a connection whose requested name is taken.
pub const NAME_IN_USE: &str = "name already in use";

/// Raw text sent to a connection that did not supply a name.
pub const NAME_REQUIRED: &str = "name is required";

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A decoded relay message.
///
/// Produced by [`crate::protocol::decode_message`], consumed immediately by
/// the router, and re-serialised once per dispatch.  It is never stored.
///
/// Forwarding re-emits the object as it arrived: `"data": null` stays
/// `null`, and a falsy `receiver` such as `""` is written back as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct RelayMessage {
    /// Event name, e.g. `"update-spins"`.
    pub event: String,

    /// Opaque payload.  `None` when the sender omitted the field;
    /// `Some(Value::Null)` when it sent `null`.
    pub data: Option<Value>,

    /// Routing target(s), resolved from the wire value.
    pub receiver: Receiver,

    /// The `receiver` value exactly as decoded.  Re-emitted while it still
    /// resolves to [`receiver`](Self::receiver).
    raw_receiver: Option<Value>,

    /// Unknown top-level fields, forwarded verbatim.
    pub extra: Map<String, Value>,
}

impl RelayMessage {
    /// Builds a message with no extra fields.
    pub fn new(event: impl Into<String>, data: Option<Value>, receiver: Receiver) -> Self {
        Self {
            event: event.into(),
            data,
            receiver,
            raw_receiver: None,
            extra: Map::new(),
        }
    }
}

/// The envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    event: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    data: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    receiver: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Maps a present field (including `null`) to `Some`; `default` covers absence.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<WireMessage> for RelayMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let receiver = match &wire.receiver {
            Some(value) => Receiver::from_value(value.clone())?,
            None => Receiver::Broadcast,
        };
        Ok(Self {
            event: wire.event,
            data: wire.data,
            receiver,
            raw_receiver: wire.receiver,
            extra: wire.extra,
        })
    }
}

impl From<RelayMessage> for WireMessage {
    fn from(msg: RelayMessage) -> Self {
        let receiver = match msg.raw_receiver {
            Some(raw) if Receiver::from_value(raw.clone()).as_ref() == Ok(&msg.receiver) => {
                Some(raw)
            }
            _ => msg.receiver.to_value(),
        };
        Self {
            event: msg.event,
            data: msg.data,
            receiver,
            extra: msg.extra,
        }
    }
}

// ── Receiver ──────────────────────────────────────────────────────────────────

/// Where a message should be delivered.
///
/// # JSON representation
///
/// | JSON value                           | Variant            |
/// |--------------------------------------|--------------------|
/// | absent, `null`, `""`, `false`, `0`   | `Broadcast`        |
/// | `"score"`                            | `Single("score")`  |
/// | `["score", "bulbs"]`                 | `Many([...])`      |
///
/// Every other shape (objects, `true`, non-zero numbers, arrays holding a
/// non-string) is rejected when the message is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Receiver {
    /// Deliver to every connected client except the sender.
    #[default]
    Broadcast,
    /// Deliver to one named client or hardware alias.
    Single(String),
    /// Deliver to each listed name, in order.
    Many(Vec<String>),
}

impl Receiver {
    /// Returns `true` for [`Receiver::Broadcast`].
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Receiver::Broadcast)
    }

    /// Resolves a wire value.
    ///
    /// # Errors
    ///
    /// Returns a description of the value when it has an unsupported shape.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null | Value::Bool(false) => Ok(Receiver::Broadcast),
            Value::String(name) if name.is_empty() => Ok(Receiver::Broadcast),
            Value::String(name) => Ok(Receiver::Single(name)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Receiver::Broadcast),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(format!(
                        "receiver array entries must be strings, got {other}"
                    )),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Receiver::Many),
            other => Err(format!(
                "receiver must be a string or an array of strings, got {other}"
            )),
        }
    }

    /// The canonical wire value.  `None` for broadcast, which is omitted.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Receiver::Broadcast => None,
            Receiver::Single(name) => Some(Value::String(name.clone())),
            Receiver::Many(names) => Some(Value::Array(
                names.iter().cloned().map(Value::String).collect(),
            )),
        }
    }
}

impl Serialize for Receiver {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Receiver::Broadcast => serializer.serialize_none(),
            Receiver::Single(name) => serializer.serialize_str(name),
            Receiver::Many(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Receiver {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Receiver::from_value(value).map_err(de::Error::custom)
    }
}

// ── Error reply ───────────────────────────────────────────────────────────────

/// The `{ "event": "error", "message": ... }` object sent back to a sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub event: String,
    pub message: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            event: ERROR_EVENT.to_string(),
            message: message.into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
