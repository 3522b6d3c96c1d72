//! Router: the dispatch algorithm run once per inbound message.
//!
//! The router owns the [`ClientRegistry`] and the two hardware channels.  It
//! is constructed once at process start and driven by a single event loop
//! (see `relay-server`'s hub), so every call runs to completion before the
//! next one starts and no locking is needed.
//!
//! # Dispatch rules
//!
//! ```text
//! receiver = ["a", "bulbs", "x"]   each entry in order:
//!                                    alias    → serial write
//!                                    known    → forward
//!                                    unknown  → log, continue
//! receiver = "a"                   alias → serial write
//!                                  known → forward
//!                                  unknown → error reply to sender
//! receiver absent                  every open client except the sender
//! ```
//!
//! # Delivery semantics
//!
//! Delivery is at-most-once and best-effort.  Sinks and links are expected
//! to queue the write and return immediately; the router never waits for
//! an acknowledgement and never retries.  A failed write is logged and
//! otherwise invisible to the sender.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::client::{ClientName, ConnectionId, HardwareAlias};
use crate::domain::registry::{ClientRegistry, RegisterError};
use crate::protocol::codec::{decode_bytes, decode_message, encode_message, error_reply, ProtocolError};
use crate::protocol::message::{Receiver, RelayMessage, NAME_IN_USE, NAME_REQUIRED, RECEIVER_NOT_FOUND};

// ── Transport seams ───────────────────────────────────────────────────────────

/// Error returned when a client sink can no longer accept frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("client connection is closed")]
pub struct SinkError;

/// Error returned by a hardware channel write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The serial writer task has stopped.
    #[error("serial writer for {0} has stopped")]
    Closed(HardwareAlias),

    /// The underlying port reported a failure.
    #[error("serial write to {alias} failed: {reason}")]
    Io { alias: HardwareAlias, reason: String },
}

/// Outbound half of a browser-side connection.
pub trait ClientSink {
    /// Queues a frame.  `binary` selects a binary frame instead of text.
    fn send(&self, text: String, binary: bool) -> Result<(), SinkError>;

    /// Mirrors the WebSocket `readyState == OPEN` check used by broadcast.
    fn is_open(&self) -> bool;

    /// Asks the transport to close the connection.
    fn close(&self);
}

/// Outbound half of a serial board.
#[cfg_attr(test, mockall::automock)]
pub trait HardwareLink: Send {
    /// Queues `text` for writing to the port, as is.
    fn write(&self, text: &str) -> Result<(), LinkError>;
}

// ── Sender and outcome ────────────────────────────────────────────────────────

/// Who a message came from.
#[derive(Debug, Clone, Copy)]
pub enum Sender<'a> {
    /// A registered connection.
    Client {
        name: &'a ClientName,
        id: ConnectionId,
    },
    /// A line read from a serial board.  There is no connection to reply to.
    Hardware(HardwareAlias),
}

impl Sender<'_> {
    pub fn name(&self) -> &str {
        match self {
            Sender::Client { name, .. } => name.as_str(),
            Sender::Hardware(alias) => alias.as_str(),
        }
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Sender::Client { id, .. } => Some(*id),
            Sender::Hardware(_) => None,
        }
    }
}

/// What a single dispatch did.  Used for logging and by tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Clients the message was handed to, in dispatch order.
    pub delivered: Vec<ClientName>,
    /// Hardware channels the message was written to.
    pub hardware: Vec<HardwareAlias>,
    /// Receiver names that resolved to nothing.
    pub missing: Vec<String>,
    /// Broadcast targets skipped because their connection was not open.
    pub skipped: Vec<ClientName>,
    /// Whether a "receiver not found" reply went back to the sender.
    pub notified_sender: bool,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The relay's routing state: registry plus hardware channels.
pub struct Router<S> {
    registry: ClientRegistry<S>,
    bulbs: Option<Box<dyn HardwareLink>>,
    input_board: Option<Box<dyn HardwareLink>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self {
            registry: ClientRegistry::new(),
            bulbs: None,
            input_board: None,
        }
    }
}

impl<S: ClientSink> Router<S> {
    /// Creates a router with no clients and no hardware attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches (or replaces) the channel behind a hardware alias.
    pub fn attach_hardware(&mut self, alias: HardwareAlias, link: Box<dyn HardwareLink>) {
        info!("hardware channel attached: {alias}");
        *self.link_slot(alias) = Some(link);
    }

    pub fn registry(&self) -> &ClientRegistry<S> {
        &self.registry
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Registers a new connection under the name it asked for.
    ///
    /// On rejection the connection is told why (`name already in use` or
    /// `name is required`, as raw text) and closed; the registry is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`RegisterError`] that caused the rejection.
    pub fn connect(
        &mut self,
        requested: Option<&str>,
        id: ConnectionId,
        sink: S,
    ) -> Result<ClientName, RegisterError> {
        let checked = ClientName::new(requested.unwrap_or_default())
            .and_then(|name| self.registry.check_available(&name).map(|()| name));
        match checked {
            Ok(name) => {
                self.registry.register(name.clone(), id, sink)?;
                Ok(name)
            }
            Err(e) => {
                let text = match e {
                    RegisterError::NameInUse(_) => NAME_IN_USE,
                    RegisterError::NameRequired => NAME_REQUIRED,
                };
                warn!("rejected connection {id}: {e}");
                let _ = sink.send(text.to_string(), false);
                sink.close();
                Err(e)
            }
        }
    }

    /// Removes `name` from the registry if `id` still owns it.
    pub fn disconnect(&mut self, name: &str, id: ConnectionId) -> bool {
        self.registry.unregister(name, id)
    }

    /// Asks every registered connection to close.  Used at shutdown.
    pub fn close_all(&self) {
        for (name, entry) in self.registry.iter() {
            debug!("closing {name}");
            entry.sink.close();
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Decodes `raw` and routes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the message cannot be decoded.  Nothing
    /// is forwarded and the sender is not notified.
    pub fn dispatch(
        &self,
        sender: Sender<'_>,
        raw: &str,
        binary: bool,
    ) -> Result<DispatchOutcome, ProtocolError> {
        debug!("received from {}", sender.name());
        let message = decode_message(raw)?;
        self.dispatch_message(sender, &message, binary)
    }

    /// Decodes a binary frame and routes it.  WebSocket destinations receive
    /// it as a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUtf8`] if `raw` is not UTF-8, or any
    /// error [`dispatch`](Self::dispatch) returns.
    pub fn dispatch_bytes(
        &self,
        sender: Sender<'_>,
        raw: &[u8],
    ) -> Result<DispatchOutcome, ProtocolError> {
        debug!("received binary frame from {}", sender.name());
        let message = decode_bytes(raw)?;
        self.dispatch_message(sender, &message, true)
    }

    /// Routes an already-decoded message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if the message cannot be
    /// re-serialised.
    pub fn dispatch_message(
        &self,
        sender: Sender<'_>,
        message: &RelayMessage,
        binary: bool,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let text = encode_message(message)?;
        let mut outcome = DispatchOutcome::default();

        match &message.receiver {
            Receiver::Many(names) => {
                for name in names {
                    if let Some(alias) = HardwareAlias::from_name(name) {
                        self.write_hardware(alias, &text, &mut outcome);
                        continue;
                    }
                    match self.registry.lookup(name) {
                        Some(entry) => Self::forward(name, &entry.sink, &text, binary, &mut outcome),
                        None => {
                            warn!("receiver {name} not found (from {})", sender.name());
                            outcome.missing.push(name.clone());
                        }
                    }
                }
            }
            Receiver::Single(name) => {
                if let Some(alias) = HardwareAlias::from_name(name) {
                    self.write_hardware(alias, &text, &mut outcome);
                } else if let Some(entry) = self.registry.lookup(name) {
                    Self::forward(name, &entry.sink, &text, binary, &mut outcome);
                } else {
                    warn!("receiver {name} not found (from {})", sender.name());
                    outcome.missing.push(name.clone());
                    outcome.notified_sender = self.reply_to_sender(sender, RECEIVER_NOT_FOUND);
                }
            }
            Receiver::Broadcast => {
                debug!("no receiver specified, broadcasting from {}", sender.name());
                let sender_id = sender.connection_id();
                for (name, entry) in self.registry.iter() {
                    if Some(entry.id) == sender_id {
                        continue;
                    }
                    if !entry.sink.is_open() {
                        outcome.skipped.push(name.clone());
                        continue;
                    }
                    Self::forward(name.as_str(), &entry.sink, &text, binary, &mut outcome);
                }
            }
        }

        Ok(outcome)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn forward(name: &str, sink: &S, text: &str, binary: bool, outcome: &mut DispatchOutcome) {
        debug!("sending to {name}");
        match sink.send(text.to_string(), binary) {
            Ok(()) => {
                if let Ok(name) = ClientName::new(name) {
                    outcome.delivered.push(name);
                }
            }
            Err(e) => debug!("send to {name} failed: {e}"),
        }
    }

    fn write_hardware(&self, alias: HardwareAlias, text: &str, outcome: &mut DispatchOutcome) {
        let link = match alias {
            HardwareAlias::Bulbs => self.bulbs.as_deref(),
            HardwareAlias::InputBoard => self.input_board.as_deref(),
        };
        let Some(link) = link else {
            warn!("hardware channel {alias} is not available; message dropped");
            return;
        };
        debug!("sending to {alias}");
        match link.write(text) {
            Ok(()) => outcome.hardware.push(alias),
            Err(e) => error!("{e}"),
        }
    }

    fn reply_to_sender(&self, sender: Sender<'_>, message: &str) -> bool {
        let Sender::Client { name, id } = sender else {
            return false;
        };
        let Some(entry) = self.registry.lookup(name.as_str()).filter(|e| e.id == id) else {
            return false;
        };
        entry.sink.send(error_reply(message), false).is_ok()
    }

    fn link_slot(&mut self, alias: HardwareAlias) -> &mut Option<Box<dyn HardwareLink>> {
        match alias {
            HardwareAlias::Bulbs => &mut self.bulbs,
            HardwareAlias::InputBoard => &mut self.input_board,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Sink double that records every frame it is given.
    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Rc<RefCell<Vec<(String, bool)>>>,
        closed: Rc<Cell<bool>>,
        not_open: Rc<Cell<bool>>,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<(String, bool)> {
            self.frames.borrow().clone()
        }

        fn json_frames(&self) -> Vec<Value> {
            self.frames()
                .iter()
                .map(|(text, _)| serde_json::from_str(text).unwrap())
                .collect()
        }
    }

    impl ClientSink for RecordingSink {
        fn send(&self, text: String, binary: bool) -> Result<(), SinkError> {
            if self.closed.get() {
                return Err(SinkError);
            }
            self.frames.borrow_mut().push((text, binary));
            Ok(())
        }

        fn is_open(&self) -> bool {
            !self.closed.get() && !self.not_open.get()
        }

        fn close(&self) {
            self.closed.set(true);
        }
    }

    struct Client {
        name: ClientName,
        id: ConnectionId,
        sink: RecordingSink,
    }

    impl Client {
        fn json_frames(&self) -> Vec<Value> {
            self.sink.json_frames()
        }

        fn sender(&self) -> Sender<'_> {
            Sender::Client {
                name: &self.name,
                id: self.id,
            }
        }
    }

    fn connect(router: &mut Router<RecordingSink>, name: &str) -> Client {
        let sink = RecordingSink::default();
        let id = ConnectionId::new();
        let name = router
            .connect(Some(name), id, sink.clone())
            .expect("connect must succeed");
        Client { name, id, sink }
    }

    fn expect_writes(times: usize) -> MockHardwareLink {
        let mut link = MockHardwareLink::new();
        link.expect_write().times(times).returning(|_| Ok(()));
        link
    }

    // ── connect / disconnect ──────────────────────────────────────────────────

    #[test]
    fn test_duplicate_connect_is_told_and_closed() {
        // Arrange
        let mut router = Router::new();
        let original = connect(&mut router, "score");
        let duplicate = RecordingSink::default();

        // Act
        let result = router.connect(Some("score"), ConnectionId::new(), duplicate.clone());

        // Assert
        assert!(matches!(result, Err(RegisterError::NameInUse(_))));
        assert_eq!(duplicate.frames(), vec![("name already in use".to_string(), false)]);
        assert!(duplicate.closed.get());
        assert!(router.registry().is_owner("score", original.id));
    }

    #[test]
    fn test_connect_without_name_is_rejected() {
        let mut router: Router<RecordingSink> = Router::new();
        let sink = RecordingSink::default();

        let result = router.connect(None, ConnectionId::new(), sink.clone());

        assert_eq!(result, Err(RegisterError::NameRequired));
        assert_eq!(sink.frames(), vec![("name is required".to_string(), false)]);
        assert!(sink.closed.get());
        assert!(router.registry().is_empty());
    }

    #[test]
    fn test_disconnect_frees_the_name() {
        let mut router = Router::new();
        let client = connect(&mut router, "score");

        assert!(router.disconnect("score", client.id));
        let again = connect(&mut router, "score");
        assert!(router.registry().is_owner("score", again.id));
    }

    // ── single receiver ───────────────────────────────────────────────────────

    #[test]
    fn test_single_receiver_gets_exact_message_and_sender_gets_nothing() {
        // Arrange
        let mut router = Router::new();
        let score = connect(&mut router, "score");
        let machine = connect(&mut router, "machine");
        let raw = r#"{"event":"update-spins","data":{"value":2},"receiver":"score"}"#;

        // Act
        let outcome = router.dispatch(machine.sender(), raw, false).unwrap();

        // Assert
        assert_eq!(
            score.json_frames(),
            vec![json!({"event": "update-spins", "data": {"value": 2}, "receiver": "score"})]
        );
        assert!(machine.sink.frames().is_empty());
        assert_eq!(outcome.delivered, vec![score.name.clone()]);
    }

    #[test]
    fn test_missing_single_receiver_notifies_sender_only() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"ping","receiver":"ghost"}"#, false)
            .unwrap();

        assert_eq!(
            machine.json_frames(),
            vec![json!({"event": "error", "message": "receiver not found"})]
        );
        assert!(score.sink.frames().is_empty());
        assert!(outcome.notified_sender);
        assert_eq!(outcome.missing, vec!["ghost".to_string()]);
    }

    #[test]
    fn test_binary_flag_is_preserved_for_clients() {
        let mut router = Router::new();
        let score = connect(&mut router, "score");
        let machine = connect(&mut router, "machine");

        router
            .dispatch(machine.sender(), r#"{"event":"e","receiver":"score"}"#, true)
            .unwrap();

        assert!(score.sink.frames()[0].1, "binary flag must be forwarded");
    }

    #[test]
    fn test_hardware_sender_with_missing_receiver_is_silent() {
        let mut router = Router::new();
        let score = connect(&mut router, "score");

        let outcome = router
            .dispatch(
                Sender::Hardware(HardwareAlias::InputBoard),
                r#"{"event":"lever","receiver":"ghost"}"#,
                false,
            )
            .unwrap();

        assert!(!outcome.notified_sender);
        assert!(score.sink.frames().is_empty());
    }

    // ── hardware aliases ──────────────────────────────────────────────────────

    #[test]
    fn test_bulbs_alias_writes_full_message_to_serial() {
        // Arrange
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let mut bulbs = MockHardwareLink::new();
        bulbs
            .expect_write()
            .withf(|text| {
                serde_json::from_str::<Value>(text).unwrap()
                    == json!({"event": "light", "data": [1, 0, 1], "receiver": "bulbs"})
            })
            .times(1)
            .returning(|_| Ok(()));
        router.attach_hardware(HardwareAlias::Bulbs, Box::new(bulbs));

        // Act
        let outcome = router
            .dispatch(
                machine.sender(),
                r#"{"event":"light","data":[1,0,1],"receiver":"bulbs"}"#,
                false,
            )
            .unwrap();

        // Assert: no error reply even though "bulbs" is not registered.
        assert_eq!(outcome.hardware, vec![HardwareAlias::Bulbs]);
        assert!(machine.sink.frames().is_empty());
        assert!(!outcome.notified_sender);
    }

    #[test]
    fn test_alias_without_attached_hardware_is_dropped_silently() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"light","receiver":"bulbs"}"#, false)
            .unwrap();

        assert!(outcome.hardware.is_empty());
        assert!(machine.sink.frames().is_empty());
    }

    #[test]
    fn test_hardware_write_failure_is_not_reported_to_sender() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let mut bulbs = MockHardwareLink::new();
        bulbs
            .expect_write()
            .returning(|_| Err(LinkError::Closed(HardwareAlias::Bulbs)));
        router.attach_hardware(HardwareAlias::Bulbs, Box::new(bulbs));

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"light","receiver":"bulbs"}"#, false)
            .unwrap();

        assert!(outcome.hardware.is_empty());
        assert!(machine.sink.frames().is_empty());
    }

    // ── array fan-out ─────────────────────────────────────────────────────────

    #[test]
    fn test_array_fan_out_skips_missing_without_error() {
        // Arrange
        let mut router = Router::new();
        let a = connect(&mut router, "A");
        let b = connect(&mut router, "B");
        let sender = connect(&mut router, "machine");

        // Act
        let outcome = router
            .dispatch(
                sender.sender(),
                r#"{"event":"e","data":1,"receiver":["A","B","missing"]}"#,
                false,
            )
            .unwrap();

        // Assert
        assert_eq!(a.sink.frames().len(), 1);
        assert_eq!(b.sink.frames().len(), 1);
        assert!(sender.sink.frames().is_empty(), "array mode never replies");
        assert_eq!(outcome.delivered, vec![a.name.clone(), b.name.clone()]);
        assert_eq!(outcome.missing, vec!["missing".to_string()]);
        assert!(!outcome.notified_sender);
    }

    #[test]
    fn test_array_fan_out_mixes_hardware_and_clients() {
        let mut router = Router::new();
        let score = connect(&mut router, "score");
        let machine = connect(&mut router, "machine");
        router.attach_hardware(HardwareAlias::Bulbs, Box::new(expect_writes(1)));
        router.attach_hardware(HardwareAlias::InputBoard, Box::new(expect_writes(1)));

        let outcome = router
            .dispatch(
                machine.sender(),
                r#"{"event":"win","receiver":["bulbs","score","input-board"]}"#,
                false,
            )
            .unwrap();

        assert_eq!(
            outcome.hardware,
            vec![HardwareAlias::Bulbs, HardwareAlias::InputBoard]
        );
        assert_eq!(score.sink.frames().len(), 1);
    }

    // ── broadcast ─────────────────────────────────────────────────────────────

    #[test]
    fn test_broadcast_reaches_everyone_but_the_sender() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");
        let combos = connect(&mut router, "combinations");

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"reset"}"#, false)
            .unwrap();

        assert!(machine.sink.frames().is_empty());
        assert_eq!(score.json_frames(), vec![json!({"event": "reset"})]);
        assert_eq!(combos.json_frames(), vec![json!({"event": "reset"})]);
        assert_eq!(outcome.delivered.len(), 2);
    }

    #[test]
    fn test_broadcast_skips_clients_that_are_not_open() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let stale = connect(&mut router, "stale");
        stale.sink.not_open.set(true);

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"reset"}"#, false)
            .unwrap();

        assert!(stale.sink.frames().is_empty());
        assert_eq!(outcome.skipped, vec![stale.name.clone()]);
    }

    #[test]
    fn test_broadcast_from_hardware_reaches_every_client() {
        let mut router = Router::new();
        let score = connect(&mut router, "score");
        let machine = connect(&mut router, "machine");

        router
            .dispatch(
                Sender::Hardware(HardwareAlias::InputBoard),
                r#"{"event":"lever-pulled"}"#,
                false,
            )
            .unwrap();

        assert_eq!(score.sink.frames().len(), 1);
        assert_eq!(machine.sink.frames().len(), 1);
    }

    #[test]
    fn test_broadcast_does_not_touch_hardware() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        router.attach_hardware(HardwareAlias::Bulbs, Box::new(expect_writes(0)));

        let outcome = router
            .dispatch(machine.sender(), r#"{"event":"reset"}"#, false)
            .unwrap();

        assert!(outcome.hardware.is_empty());
    }

    // ── malformed input ───────────────────────────────────────────────────────

    #[test]
    fn test_malformed_message_is_dropped() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");

        let result = router.dispatch(machine.sender(), "not json at all", false);

        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
        assert!(machine.sink.frames().is_empty());
        assert!(score.sink.frames().is_empty());
    }

    #[test]
    fn test_binary_frame_with_invalid_utf8_is_dropped() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");

        let result = router.dispatch_bytes(machine.sender(), &[0xFF, 0xFE, b'{']);

        assert!(matches!(result, Err(ProtocolError::InvalidUtf8(_))));
        assert!(score.sink.frames().is_empty());
    }

    // ── binary frames ─────────────────────────────────────────────────────────

    #[test]
    fn test_binary_frame_is_forwarded_as_binary() {
        // Arrange
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");

        // Act
        let outcome = router
            .dispatch_bytes(machine.sender(), br#"{"event":"raw","receiver":"score"}"#)
            .unwrap();

        // Assert
        assert_eq!(outcome.delivered, vec![score.name.clone()]);
        let frames = score.sink.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].1, "frame must keep the binary flag");
    }

    // ── forwarding fidelity ───────────────────────────────────────────────────

    #[test]
    fn test_forwarded_message_keeps_null_data_and_falsy_receiver() {
        let mut router = Router::new();
        let machine = connect(&mut router, "machine");
        let score = connect(&mut router, "score");

        router
            .dispatch(
                machine.sender(),
                r#"{"event":"reset","data":null,"receiver":""}"#,
                false,
            )
            .unwrap();

        assert_eq!(
            score.json_frames(),
            vec![json!({"event": "reset", "data": null, "receiver": ""})]
        );
    }
}
