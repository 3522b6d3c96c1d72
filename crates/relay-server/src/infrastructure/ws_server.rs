//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from the cabinet's browser windows.
//! 3. Upgrading each connection to a WebSocket session, reading the client
//!    name from the upgrade request (`ws://host:3001?name=score`).
//! 4. Registering the session with the hub, or relaying the hub's rejection
//!    and closing.
//! 5. Running two tasks per session:
//!    - **Reader**: WebSocket frames → hub commands, in arrival order.
//!    - **Writer**: hub frames (via the session's [`ChannelSink`]) →
//!      WebSocket frames.
//! 6. Reporting the disconnect to the hub when the browser goes away.
//! 7. Gracefully shutting down when the `running` flag is cleared.
//!
//! Each session runs in its own Tokio task, so one slow browser never blocks
//! the accept loop or the hub.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::{ChannelSink, HubError, HubHandle, Outbound, Payload};

/// How long a finished session waits for its writer to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the WebSocket TCP listener.
///
/// # Errors
///
/// Returns an error if the address is in use or the process lacks
/// permission to bind it.
pub async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    info!("listening on {}", listener.local_addr().unwrap_or(addr));
    Ok(listener)
}

/// Binds `addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    hub: HubHandle,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = bind_listener(addr).await?;
    serve(listener, hub, running).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
///
/// Each accepted connection is handed off to a dedicated Tokio task.
pub async fn serve(listener: TcpListener, hub: HubHandle, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout on `accept()` lets the loop notice the shutdown
        // flag even when nobody is connecting.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let hub = hub.clone();
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, hub).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

/// Extracts the `name` query parameter, percent-decoded.
///
/// Returns `None` when there is no query or no `name` key.  An empty value
/// is returned as `Some("")` and rejected later by the registry.
pub fn name_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Top-level handler for a single WebSocket session.
///
/// Wraps [`run_session`] and logs the outcome.
async fn handle_session(raw_stream: TcpStream, peer_addr: SocketAddr, hub: HubHandle) {
    match run_session(raw_stream, peer_addr, hub).await {
        Ok(()) => debug!("session {peer_addr} closed"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single WebSocket session.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or the hub has stopped.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    hub: HubHandle,
) -> anyhow::Result<()> {
    // ── Step 1: Handshake, capturing the requested name ───────────────────────
    let mut requested = None;
    let ws_stream = accept_hdr_async(
        raw_stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            requested = name_from_query(req.uri().query());
            Ok(response)
        },
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // ── Step 2: Writer task ───────────────────────────────────────────────────
    //
    // Drains the session's outbound channel.  It ends when the hub asks for a
    // close, when the socket fails, or when the hub drops the sink.
    let (sink, mut outbound) = ChannelSink::channel();
    let session_w = peer_addr;
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            let frame = match out {
                Outbound::Frame {
                    text,
                    binary: false,
                } => WsMessage::Text(text),
                Outbound::Frame { text, binary: true } => WsMessage::Binary(text.into_bytes()),
                Outbound::Close => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = ws_tx.send(frame).await {
                debug!("session {session_w}: send failed: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Step 3: Register with the hub ─────────────────────────────────────────
    let (id, name) = match hub.connect(requested, sink).await {
        Ok(registered) => registered,
        Err(HubError::Rejected(e)) => {
            info!("session {peer_addr}: {e}");
            // The hub already queued the rejection text and a close.
            let _ = timeout(CLOSE_GRACE, writer).await;
            return Ok(());
        }
        Err(e) => {
            writer.abort();
            return Err(e.into());
        }
    };

    // ── Step 4: Reader loop ───────────────────────────────────────────────────
    while let Some(frame) = ws_rx.next().await {
        let forwarded = match frame {
            Ok(WsMessage::Text(text)) => hub.message(id, &name, Payload::Text(text)),
            Ok(WsMessage::Binary(bytes)) => hub.message(id, &name, Payload::Binary(bytes)),
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => Ok(()),
            Err(WsError::ConnectionClosed | WsError::Protocol(_)) => break,
            Err(e) => {
                warn!("session {name}: WebSocket error: {e}");
                break;
            }
        };
        if forwarded.is_err() {
            break;
        }
    }

    // ── Step 5: Cleanup ───────────────────────────────────────────────────────
    hub.disconnect(id, &name);
    let _ = timeout(CLOSE_GRACE, writer).await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
