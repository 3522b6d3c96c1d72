//! Hub: the relay's event loop.
//!
//! The [`Hub`] is a single Tokio task that owns the [`Router`].  Every
//! transport (WebSocket sessions, the serial reader, the local transport)
//! talks to it through a cloneable [`HubHandle`], which pushes
//! [`HubCommand`]s onto an unbounded channel.
//!
//! ```text
//! ws session ─┐
//! ws session ─┼── HubCommand ──► Hub task ──► Router ──► ChannelSink / HardwareLink
//! serial rx  ─┤
//! local      ─┘
//! ```
//!
//! # Ordering
//!
//! The hub handles one command at a time, to completion.  Registry
//! mutations and routing decisions never interleave, the registry has no
//! lock, and commands from one sender are handled in the order sent.
//!
//! # Delivery
//!
//! Outbound frames go through unbounded channels, so dispatching never waits
//! on a slow receiver.  A receiver that stops reading accumulates frames in
//! its channel until it disconnects.

use relay_core::{
    ClientName, ClientSink, ConnectionId, DispatchOutcome, HardwareAlias, HardwareLink,
    ProtocolError, RegisterError, Router, Sender, SinkError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Errors returned by [`HubHandle`] operations.
#[derive(Debug, Error, PartialEq)]
pub enum HubError {
    /// The hub task is no longer running.
    #[error("relay hub has stopped")]
    Stopped,

    /// The connect attempt was refused.
    #[error("connection rejected: {0}")]
    Rejected(#[from] RegisterError),
}

// ── Outbound channel sink ─────────────────────────────────────────────────────

/// A frame queued for a client's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON (or raw text) to deliver.  `binary` asks for a binary frame.
    Frame { text: String, binary: bool },
    /// Close the connection after flushing earlier frames.
    Close,
}

/// [`ClientSink`] backed by an unbounded channel.
///
/// The receiving half belongs to the transport's writer (a WebSocket writer
/// task, or a [`crate::infrastructure::local::LocalClient`]).  The sink
/// reports "open" until that receiver is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its frames arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, text: String, binary: bool) -> Result<(), SinkError> {
        self.tx
            .send(Outbound::Frame { text, binary })
            .map_err(|_| SinkError)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// The body of a frame received from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    /// Decoded as UTF-8 JSON by the router.
    Binary(Vec<u8>),
}

/// Everything a transport can ask the hub to do.
pub enum HubCommand {
    /// Register a new connection.  The reply carries the accepted name.
    Connect {
        id: ConnectionId,
        name: Option<String>,
        sink: ChannelSink,
        reply: oneshot::Sender<Result<ClientName, RegisterError>>,
    },
    /// A frame received from a registered connection.
    Message {
        id: ConnectionId,
        name: ClientName,
        payload: Payload,
    },
    /// A connection closed.
    Disconnect { id: ConnectionId, name: ClientName },
    /// A line read from a serial board.
    HardwareLine { alias: HardwareAlias, line: String },
    /// Close every connection and stop the hub.
    Shutdown,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable sending side of the hub.
///
/// All methods except [`connect`](Self::connect) are fire-and-forget.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Registers a connection under `name` and returns its id and the name
    /// it was registered under.
    ///
    /// On rejection the hub has already written the reason to `sink` and
    /// asked it to close.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Rejected`] if the name is missing or taken, or
    /// [`HubError::Stopped`] if the hub is gone.
    pub async fn connect(
        &self,
        name: Option<String>,
        sink: ChannelSink,
    ) -> Result<(ConnectionId, ClientName), HubError> {
        let id = ConnectionId::new();
        let (reply, response) = oneshot::channel();
        self.tx
            .send(HubCommand::Connect {
                id,
                name,
                sink,
                reply,
            })
            .map_err(|_| HubError::Stopped)?;
        let name = response.await.map_err(|_| HubError::Stopped)??;
        Ok((id, name))
    }

    /// Hands a received frame to the router.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn message(
        &self,
        id: ConnectionId,
        name: &ClientName,
        payload: Payload,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Message {
            id,
            name: name.clone(),
            payload,
        })
    }

    /// Reports that a connection closed.
    pub fn disconnect(&self, id: ConnectionId, name: &ClientName) {
        // A stopped hub has no registry left to clean up.
        let _ = self.send(HubCommand::Disconnect {
            id,
            name: name.clone(),
        });
    }

    /// Hands a line read from a serial board to the router.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn hardware_line(&self, alias: HardwareAlias, line: String) -> Result<(), HubError> {
        self.send(HubCommand::HardwareLine { alias, line })
    }

    /// Asks the hub to close all connections and stop.
    pub fn shutdown(&self) {
        let _ = self.send(HubCommand::Shutdown);
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Stopped)
    }
}

// ── Hub ───────────────────────────────────────────────────────────────────────

/// The router plus its command queue.
///
/// Build it, attach hardware through
/// [`attach_hardware`](Self::attach_hardware), hand out
/// [`handle`](Self::handle)s, then `tokio::spawn(hub.run())`.
pub struct Hub {
    router: Router<ChannelSink>,
    tx: mpsc::UnboundedSender<HubCommand>,
    rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            router: Router::new(),
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            tx: self.tx.clone(),
        }
    }

    /// Attaches a hardware channel before the hub starts.
    pub fn attach_hardware(&mut self, alias: HardwareAlias, link: Box<dyn HardwareLink>) {
        self.router.attach_hardware(alias, link);
    }

    /// Processes commands until [`HubCommand::Shutdown`].
    ///
    /// The hub keeps a sender of its own, so it never stops just because
    /// every handle was dropped; shutdown is always explicit.
    pub async fn run(mut self) {
        info!("relay hub started");
        while let Some(command) = self.rx.recv().await {
            if !self.handle_command(command) {
                break;
            }
        }
        self.router.close_all();
        info!("relay hub stopped");
    }

    /// Applies one command.  Returns `false` when the hub should stop.
    fn handle_command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Connect {
                id,
                name,
                sink,
                reply,
            } => {
                let result = self.router.connect(name.as_deref(), id, sink);
                if reply.send(result).is_err() {
                    // The session went away while waiting; undo the insert.
                    if let Some(name) = name {
                        self.router.disconnect(&name, id);
                    }
                }
            }
            HubCommand::Message { id, name, payload } => {
                if !self.router.registry().is_owner(name.as_str(), id) {
                    debug!("dropping message from unregistered connection {id} ({name})");
                    return true;
                }
                let sender = Sender::Client { name: &name, id };
                let result = match &payload {
                    Payload::Text(text) => self.router.dispatch(sender, text, false),
                    Payload::Binary(bytes) => self.router.dispatch_bytes(sender, bytes),
                };
                Self::log_outcome(sender, result);
            }
            HubCommand::Disconnect { id, name } => {
                self.router.disconnect(name.as_str(), id);
            }
            HubCommand::HardwareLine { alias, line } => {
                let sender = Sender::Hardware(alias);
                Self::log_outcome(sender, self.router.dispatch(sender, &line, false));
            }
            HubCommand::Shutdown => return false,
        }
        true
    }

    fn log_outcome(sender: Sender<'_>, result: Result<DispatchOutcome, ProtocolError>) {
        match result {
            Ok(outcome) => debug!(
                "routed from {}: delivered={} hardware={} missing={}",
                sender.name(),
                outcome.delivered.len(),
                outcome.hardware.len(),
                outcome.missing.len()
            ),
            Err(e) => warn!("failed to parse incoming message from {}: {e}", sender.name()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_is_open_until_receiver_dropped() {
        let (sink, rx) = ChannelSink::channel();
        assert!(sink.is_open());
        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(sink.send("x".into(), false), Err(SinkError));
    }

    #[test]
    fn test_channel_sink_close_queues_close_after_frames() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.send("hello".into(), true).unwrap();
        sink.close();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame {
                text: "hello".into(),
                binary: true
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[tokio::test]
    async fn test_connect_through_handle_registers_name() {
        // Arrange
        let hub = Hub::new();
        let handle = hub.handle();
        tokio::spawn(hub.run());
        let (sink, _rx) = ChannelSink::channel();

        // Act
        let (_, name) = handle.connect(Some("score".into()), sink).await.unwrap();

        // Assert
        assert_eq!(name.as_str(), "score");
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_connect_through_handle_is_rejected() {
        let hub = Hub::new();
        let handle = hub.handle();
        tokio::spawn(hub.run());
        let (first, _first_rx) = ChannelSink::channel();
        let (second, mut second_rx) = ChannelSink::channel();

        handle.connect(Some("score".into()), first).await.unwrap();
        let result = handle.connect(Some("score".into()), second).await;

        assert!(matches!(
            result,
            Err(HubError::Rejected(RegisterError::NameInUse(_)))
        ));
        assert_eq!(
            second_rx.recv().await,
            Some(Outbound::Frame {
                text: "name already in use".into(),
                binary: false
            })
        );
        assert_eq!(second_rx.recv().await, Some(Outbound::Close));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_registered_clients() {
        let hub = Hub::new();
        let handle = hub.handle();
        let task = tokio::spawn(hub.run());
        let (sink, mut rx) = ChannelSink::channel();
        handle.connect(Some("score".into()), sink).await.unwrap();

        handle.shutdown();
        task.await.unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_hub() {
        let hub = Hub::new();
        let handle = hub.handle();
        let task = tokio::spawn(hub.run());
        handle.shutdown();
        task.await.unwrap();

        let (sink, _rx) = ChannelSink::channel();
        assert_eq!(
            handle.connect(Some("late".into()), sink).await.unwrap_err(),
            HubError::Stopped
        );
    }

    #[tokio::test]
    async fn test_binary_payload_is_decoded_and_forwarded_as_binary() {
        // Arrange
        let hub = Hub::new();
        let handle = hub.handle();
        tokio::spawn(hub.run());
        let (machine_sink, _machine_rx) = ChannelSink::channel();
        let (score_sink, mut score_rx) = ChannelSink::channel();
        let (id, machine) = handle.connect(Some("machine".into()), machine_sink).await.unwrap();
        handle.connect(Some("score".into()), score_sink).await.unwrap();

        // Act: the invalid frame is dropped, the valid one goes through.
        handle
            .message(id, &machine, Payload::Binary(vec![0xFF, 0xFE]))
            .unwrap();
        handle
            .message(
                id,
                &machine,
                Payload::Binary(br#"{"event":"raw","receiver":"score"}"#.to_vec()),
            )
            .unwrap();

        // Assert
        assert_eq!(
            score_rx.recv().await,
            Some(Outbound::Frame {
                text: r#"{"event":"raw","receiver":"score"}"#.into(),
                binary: true
            })
        );
        handle.shutdown();
    }
}
