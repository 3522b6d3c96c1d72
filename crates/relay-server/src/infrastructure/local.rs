//! In-process transport.
//!
//! A [`LocalClient`] is a relay participant with no socket: it registers
//! with the hub like a WebSocket session and exchanges the same JSON text.
//! Useful for scripted cabinet routines running inside the relay process,
//! and for exercising the hub end to end in tests.

use relay_core::{encode_message, ClientName, ConnectionId, RelayMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::application::{ChannelSink, HubError, HubHandle, Outbound, Payload};

/// Opens local connections against a running hub.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    hub: HubHandle,
}

impl LocalTransport {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// Registers a new local client under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Rejected`] if the name is empty, taken, or a
    /// hardware alias, and [`HubError::Stopped`] if the hub is gone.
    pub async fn connect(&self, name: &str) -> Result<LocalClient, HubError> {
        let (sink, rx) = ChannelSink::channel();
        let (id, name) = self.hub.connect(Some(name.to_string()), sink).await?;
        Ok(LocalClient {
            id,
            name,
            hub: self.hub.clone(),
            rx,
            closed: false,
        })
    }
}

/// One registered local connection.  Dropping it disconnects.
#[derive(Debug)]
pub struct LocalClient {
    id: ConnectionId,
    name: ClientName,
    hub: HubHandle,
    rx: mpsc::UnboundedReceiver<Outbound>,
    closed: bool,
}

impl LocalClient {
    pub fn name(&self) -> &ClientName {
        &self.name
    }

    /// Sends raw text, exactly as a WebSocket text frame would.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), HubError> {
        self.hub
            .message(self.id, &self.name, Payload::Text(text.into()))
    }

    /// Encodes and sends a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the hub is gone.
    pub fn send(&self, message: &RelayMessage) -> anyhow::Result<()> {
        let text = encode_message(message)?;
        self.send_text(text)?;
        Ok(())
    }

    /// Waits for the next delivered frame.
    ///
    /// Returns `None` once the hub has closed this connection.
    pub async fn recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(Outbound::Frame { text, .. }) => Some(text),
            Some(Outbound::Close) | None => {
                self.closed = true;
                None
            }
        }
    }

    /// Returns a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(Outbound::Frame { text, .. }) => Some(text),
            Ok(Outbound::Close) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Disconnects explicitly.
    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        debug!("local client {} dropped", self.name);
        self.hub.disconnect(self.id, &self.name);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
