//! WebSocket server: accept loop, upgrade and per-client reader.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from clients.
//! 3. Upgrading each connection to a WebSocket on the configured path, with
//!    the configured buffer sizes (any other path gets `404 Not Found`).
//! 4. Turning the write half into a session: the session's output task owns it
//!    from then on, and the session is registered with the hub.
//! 5. Reading the client side until it goes away, then unregistering.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! # What the client may send
//!
//! Text frames are requests for the backend servers, each line starting with
//! a server name (see [`requests`](crate::infrastructure::requests)).  Requests
//! that cannot be routed are logged and dropped; the client stays connected.
//! Binary frames are ignored.  Otherwise the reader exists to notice the
//! client leaving (Close frame, read error or end of stream) and to let the
//! transport answer pings.
//!
//! # For beginners: why split the stream?
//!
//! `StreamExt::split` turns one `WebSocketStream` into an independently owned
//! write half (a `Sink`) and read half (a `Stream`).  The write half moves into
//! the session's output task, which is then the only writer on the connection;
//! the read half stays in this module's per-client task.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{future, SinkExt, StreamExt};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::WebSocketConfig,
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::{spawn_session, HubHandle};
use crate::domain::{BridgeConfig, OutboundFrame, SessionId, SessionTiming, WebSocketSettings};
use crate::infrastructure::requests::{parse_client_requests, RequestRouter};

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Server context ────────────────────────────────────────────────────────────

/// Everything a per-client task needs, shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Path clients must upgrade on.
    pub path: String,
    /// Buffer sizing for each upgraded connection.
    pub websocket: WebSocketSettings,
    /// Deadlines for each session's output task.
    pub timing: SessionTiming,
    /// The hub new sessions are registered with.
    pub hub: HubHandle,
    /// Where client requests are sent.
    pub requests: RequestRouter,
}

impl ServerContext {
    /// Builds the context from the bridge configuration.
    pub fn new(config: &BridgeConfig, hub: HubHandle, requests: RequestRouter) -> Self {
        Self {
            path: config.http.path.clone(),
            websocket: config.websocket,
            timing: config.session,
            hub,
            requests,
        }
    }

    /// Transport configuration handed to the upgrade.
    ///
    /// The read buffer is not part of it; it is applied by wrapping the socket
    /// in a `BufReader` of that capacity before the handshake.
    pub fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.write_buffer_size = self.websocket.write_buffer_size;
        config.max_message_size = Some(self.websocket.max_message_size);
        config
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `bind_addr` and runs the accept loop until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    bind_addr: SocketAddr,
    ctx: ServerContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {bind_addr}"))?;

    info!("WebSocket endpoint listening on ws://{bind_addr}{}", ctx.path);
    serve(listener, ctx, running).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
///
/// Each accepted connection is handed off to its own Tokio task so that one
/// slow handshake never blocks the next client.
pub async fn serve(listener: TcpListener, ctx: ServerContext, running: Arc<AtomicBool>) {
    let ctx = Arc::new(ctx);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the flag is re-checked even when nobody connects.
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_client(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

// ── Per-client handler ────────────────────────────────────────────────────────

async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<ServerContext>) {
    match run_client(stream, peer_addr, ctx).await {
        Ok(()) => info!("client {peer_addr} disconnected"),
        Err(e) => warn!("client {peer_addr} dropped: {e:#}"),
    }
}

/// Upgrades the connection, runs the session and cleans up after it.
///
/// # Errors
///
/// Returns an error if the handshake fails (including a request on the wrong
/// path) or the hub has already shut down.
async fn run_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<()> {
    // ── Step 1: upgrade ───────────────────────────────────────────────────────
    let path = ctx.path.clone();
    let stream = BufReader::with_capacity(ctx.websocket.read_buffer_size, stream);
    let ws_stream = accept_hdr_async_with_config(
        stream,
        move |request: &Request, response: Response| check_path(&path, request, response),
        Some(ctx.ws_config()),
    )
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    // ── Step 2: hand the write half to a new session ──────────────────────────
    let (ws_tx, mut ws_rx) = ws_stream.split();
    let sink =
        ws_tx.with(|frame: OutboundFrame| future::ready(Ok::<_, WsError>(to_ws_message(frame))));
    let (session, mut output) = spawn_session(sink, ctx.timing);
    let id = session.id();

    ctx.hub
        .register(session)
        .await
        .context("hub is shutting down; refusing client")?;
    info!(session = %id, "client {peer_addr} connected");

    // ── Step 3: read until the client leaves or the output task ends ──────────
    let mut output_finished = false;
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Close(_))) => {
                    debug!(session = %id, "client sent Close");
                    break;
                }
                Some(Ok(WsMessage::Text(text))) => forward_requests(&ctx.requests, id, &text).await,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %id, "read error: {e}");
                    break;
                }
                None => {
                    debug!(session = %id, "client stream ended");
                    break;
                }
            },
            exit = &mut output => {
                output_finished = true;
                debug!(session = %id, ?exit, "output task ended first");
                break;
            }
        }
    }

    // ── Step 4: cleanup ───────────────────────────────────────────────────────
    // A closed hub has already closed the mailbox, so the error is moot.
    let _ = ctx.hub.unregister(id).await;
    if !output_finished {
        let _ = output.await;
    }
    Ok(())
}

/// Passes every request in a client text frame on to its connector.
async fn forward_requests(router: &RequestRouter, id: SessionId, text: &str) {
    for request in parse_client_requests(text) {
        let outcome = match request {
            Ok(request) => router.route(request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(session = %id, "dropping client request: {e}");
        }
    }
}

/// Handshake callback: only the configured path may upgrade.
fn check_path(
    expected: &str,
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    if request.uri().path() == expected {
        return Ok(response);
    }
    let mut rejection = ErrorResponse::new(Some("not found".to_string()));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

/// Maps a session frame onto the WebSocket message that carries it.
fn to_ws_message(frame: OutboundFrame) -> WsMessage {
    match frame {
        OutboundFrame::Text(payload) => WsMessage::Text(payload.to_string()),
        OutboundFrame::Ping => WsMessage::Ping(Vec::new()),
        OutboundFrame::Close => WsMessage::Close(None),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Request {
        Request::builder()
            .uri(path)
            .body(())
            .expect("valid request")
    }

    #[test]
    fn test_check_path_accepts_configured_path() {
        let result = check_path("/ws", &request("/ws"), Response::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_check_path_ignores_query_string() {
        let result = check_path("/", &request("/?client=studio"), Response::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_check_path_rejects_other_paths_with_404() {
        // Act
        let result = check_path("/", &request("/favicon.ico"), Response::default());

        // Assert
        let rejection = result.expect_err("wrong path must be rejected");
        assert_eq!(rejection.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_text_frame_maps_to_text_message() {
        let msg = to_ws_message(OutboundFrame::Text("OK ACK".into()));
        assert_eq!(msg, WsMessage::Text("OK ACK".to_string()));
    }

    #[test]
    fn test_ping_and_close_frames_carry_no_payload() {
        assert_eq!(to_ws_message(OutboundFrame::Ping), WsMessage::Ping(Vec::new()));
        assert_eq!(to_ws_message(OutboundFrame::Close), WsMessage::Close(None));
    }

    #[tokio::test]
    async fn test_ws_config_applies_buffer_sizes() {
        // Arrange
        let countdown = crate::application::Countdown::new();
        let (hub, _task) = crate::application::Hub::spawn(Default::default(), &countdown);
        let mut config = crate::domain::BridgeConfig {
            servers: Vec::new(),
            http: Default::default(),
            websocket: WebSocketSettings::default(),
            session: SessionTiming::default(),
            hub: Default::default(),
            log_level: "info".to_string(),
        };
        config.websocket.write_buffer_size = 4096;
        config.websocket.max_message_size = 512;

        // Act
        let ws = ServerContext::new(&config, hub, RequestRouter::default()).ws_config();

        // Assert
        assert_eq!(ws.write_buffer_size, 4096);
        assert_eq!(ws.max_message_size, Some(512));
    }
}
