//! Serial port adapters for the two Arduino boards.
//!
//! Both ports are opened once at startup.  Failing to open one is logged and
//! otherwise ignored: the relay keeps serving WebSocket traffic, and
//! messages addressed to the missing board are dropped by the router.
//!
//! # Writing
//!
//! [`SerialLink`] is the [`HardwareLink`] handed to the router.  It only
//! queues text on a channel; a writer task owns the port's write half and
//! writes each queued message as is.  A write error is logged and the
//! writer moves on to the next message.
//!
//! # Reading
//!
//! The input board's output is split on `\n`.  Each non-blank line (with a
//! trailing `\r` trimmed, as Arduino's `println` sends `\r\n`) is handed to
//! the hub as a message from `input-board`.  Bytes that are not UTF-8 are
//! replaced rather than ending the stream; the router then rejects the line
//! as malformed JSON.

use relay_core::{HardwareAlias, HardwareLink, LinkError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

use crate::application::{Hub, HubHandle};
use crate::domain::config::{SerialPortConfig, SerialSettings};

// ── Link ──────────────────────────────────────────────────────────────────────

/// Router-facing write handle for one board.
pub struct SerialLink {
    alias: HardwareAlias,
    tx: mpsc::UnboundedSender<String>,
}

impl HardwareLink for SerialLink {
    fn write(&self, text: &str) -> Result<(), LinkError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| LinkError::Closed(self.alias))
    }
}

/// Spawns a writer task for `writer` and returns the link feeding it.
pub fn spawn_writer<W>(alias: HardwareAlias, writer: W) -> (SerialLink, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(write_loop(alias, writer, rx));
    (SerialLink { alias, tx }, task)
}

/// Writes queued messages to `writer` until the queue closes.
pub async fn write_loop<W>(alias: HardwareAlias, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(text) = rx.recv().await {
        let result = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => debug!("{alias}: wrote {} bytes", text.len()),
            Err(e) => error!(
                "{}",
                LinkError::Io {
                    alias,
                    reason: e.to_string()
                }
            ),
        }
    }
    debug!("{alias}: writer stopped");
}

/// Reads newline-delimited messages from `reader` and hands them to the hub
/// as coming from `alias`.  Returns when the stream ends, fails, or the hub
/// stops.
pub async fn read_lines<R>(alias: HardwareAlias, reader: R, hub: HubHandle)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                warn!("{alias}: serial stream ended");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                if hub.hardware_line(alias, line.to_string()).is_err() {
                    debug!("{alias}: hub stopped; reader exiting");
                    break;
                }
            }
            Err(e) => {
                error!("{alias}: serial read error: {e}");
                break;
            }
        }
    }
}

// ── Startup ───────────────────────────────────────────────────────────────────

/// Opens every enabled board and attaches it to `hub`.
///
/// The input board also gets a reader task feeding lines back into the hub.
/// Returns the aliases that were attached.
pub fn open_hardware(settings: &SerialSettings, hub: &mut Hub) -> Vec<HardwareAlias> {
    let mut attached = Vec::new();
    for alias in HardwareAlias::ALL {
        let port = settings.port(alias);
        if !port.enabled {
            info!("{alias}: serial port disabled");
            continue;
        }
        match open_port(port) {
            Ok(stream) => {
                info!("{alias}: serial port open on {} @ {} baud", port.path, port.baud_rate);
                let (read_half, write_half) = tokio::io::split(stream);
                let (link, _writer) = spawn_writer(alias, write_half);
                hub.attach_hardware(alias, Box::new(link));
                if alias == HardwareAlias::InputBoard {
                    let handle = hub.handle();
                    tokio::spawn(read_lines(alias, read_half, handle));
                }
                attached.push(alias);
            }
            Err(e) => error!("{alias}: failed to open serial port {}: {e}", port.path),
        }
    }
    attached
}

fn open_port(port: &SerialPortConfig) -> tokio_serial::Result<tokio_serial::SerialStream> {
    tokio_serial::new(&port.path, port.baud_rate).open_native_async()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
