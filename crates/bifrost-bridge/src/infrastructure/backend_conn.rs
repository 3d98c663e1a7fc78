//! Connections to the backend BAPS3 servers.
//!
//! One connector task runs per configured server.  It dials the server, reads
//! its byte stream through a [`Tokeniser`], and forwards every decoded
//! [`Message`] (tagged with the server's name) to the bridge's main loop.
//! When the connection drops or a dial fails it waits for the configured
//! interval and dials again; backend outages are never fatal.
//!
//! # Streaming text protocol
//!
//! TCP is a *stream* protocol: one `read()` may return half a line or several
//! lines at once.  The tokeniser keeps the unfinished tail between reads, so
//! this module only has to feed it whatever arrived.  A fresh tokeniser is used
//! for every connection; a half line from a dead connection is never glued to
//! the first bytes of the next one.
//!
//! # Stopping
//!
//! Client requests reach a connector through [`ConnectorHandle::send`] or a
//! [`RequestRouter`](crate::infrastructure::requests::RequestRouter), which
//! holds only weak senders.
//!
//! [`ConnectorHandle::shutdown`] drops the request sender.  The connector
//! notices the closed request channel whether it is dialing, connected or
//! waiting to redial, closes the socket, and releases its countdown token.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bifrost_core::{Message, TokeniseError, Tokeniser};

use crate::application::{Countdown, Enlisted};
use crate::domain::ServerConfig;

/// Size of the per-connection read buffer.
const READ_CHUNK: usize = 4096;

/// Requests that may wait for the connector before `send` has to wait.
const REQUEST_QUEUE: usize = 16;

/// A message received from a backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    /// Name of the server it came from.
    pub server: Arc<str>,
    /// The decoded message.
    pub message: Message,
}

/// Errors returned by [`ConnectorHandle`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorError {
    /// The connector task has exited.
    #[error("connector has stopped")]
    Stopped,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The server closed the connection or a read/write failed; redial.
    Disconnected,
    /// The connector was told to stop, or nobody is listening any more.
    Shutdown,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Owner's handle to a running connector.
#[derive(Debug)]
pub struct ConnectorHandle {
    name: Arc<str>,
    requests: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl ConnectorHandle {
    /// The server name this connector follows.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `message` to be written to the server.
    ///
    /// Requests issued while the connector is not connected are discarded
    /// (and logged); BAPS3 requests only make sense on a live connection.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Stopped`] if the connector task has exited.
    pub async fn send(&self, message: Message) -> Result<(), ConnectorError> {
        self.requests
            .send(message)
            .await
            .map_err(|_| ConnectorError::Stopped)
    }

    /// A request sender that does not keep the connector running.
    pub(crate) fn downgrade(&self) -> mpsc::WeakSender<Message> {
        self.requests.downgrade()
    }

    /// Stops the connector and waits for its task to finish.
    pub async fn shutdown(self) {
        let ConnectorHandle { name, requests, task } = self;
        drop(requests);
        if let Err(e) = task.await {
            warn!(server = %name, "connector task failed: {e}");
        }
    }
}

/// Starts a connector for `config`, forwarding decoded messages to `out`.
///
/// The connector enlists in `countdown` and releases its token when it stops.
pub fn spawn_connector(
    config: ServerConfig,
    out: mpsc::Sender<BackendMessage>,
    countdown: &Countdown,
) -> ConnectorHandle {
    let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);
    let name: Arc<str> = Arc::from(config.name.as_str());
    let connector = Connector {
        name: Arc::clone(&name),
        config,
        requests: requests_rx,
        out,
        _done: countdown.enlist(),
    };
    let task = tokio::spawn(connector.run());
    ConnectorHandle {
        name,
        requests: requests_tx,
        task,
    }
}

// ── Connector task ────────────────────────────────────────────────────────────

struct Connector {
    name: Arc<str>,
    config: ServerConfig,
    requests: mpsc::Receiver<Message>,
    out: mpsc::Sender<BackendMessage>,
    _done: Enlisted,
}

impl Connector {
    async fn run(mut self) {
        info!(server = %self.name, hostport = %self.config.hostport, "connector started");

        loop {
            let hostport = self.config.hostport.clone();
            let stream = match self.unless_stopped(TcpStream::connect(hostport)).await {
                None => break,
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    warn!(
                        server = %self.name,
                        "failed to connect to {}: {e}; retrying in {:?}",
                        self.config.hostport, self.config.reconnect_interval
                    );
                    if !self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            info!(server = %self.name, "connected to {}", self.config.hostport);
            match self.run_connection(stream).await {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::Disconnected => {
                    warn!(
                        server = %self.name,
                        "lost connection to {}; retrying in {:?}",
                        self.config.hostport, self.config.reconnect_interval
                    );
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        info!(server = %self.name, "connector stopped");
    }

    /// Pumps one live connection until it drops or the connector is stopped.
    async fn run_connection(&mut self, stream: TcpStream) -> ConnectionEnd {
        let (read_half, mut write_half) = stream.into_split();
        let reader = read_backend_messages(read_half, &self.name, &self.out);
        tokio::pin!(reader);

        loop {
            tokio::select! {
                end = &mut reader => return end,
                _ = self.out.closed() => return ConnectionEnd::Shutdown,
                request = self.requests.recv() => {
                    let Some(message) = request else {
                        return ConnectionEnd::Shutdown;
                    };
                    debug!(server = %self.name, "request: {message}");
                    if let Err(e) = write_message(&mut write_half, &message).await {
                        warn!(server = %self.name, "write failed: {e}");
                        return ConnectionEnd::Disconnected;
                    }
                }
            }
        }
    }

    /// Waits out the reconnect interval; `false` if stopped meanwhile.
    async fn pause(&mut self) -> bool {
        let interval = self.config.reconnect_interval;
        self.unless_stopped(tokio::time::sleep(interval))
            .await
            .is_some()
    }

    /// Runs `work` unless the connector is stopped first.
    ///
    /// Requests arriving meanwhile cannot be delivered and are dropped.
    async fn unless_stopped<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return Some(output),
                request = self.requests.recv() => match request {
                    Some(message) => {
                        warn!(server = %self.name, "not connected; dropping request {message}");
                    }
                    None => return None,
                },
                _ = self.out.closed() => return None,
            }
        }
    }
}

// ── Reading and writing ───────────────────────────────────────────────────────

/// Reads BAPS3 lines from `reader` and forwards each as a [`BackendMessage`].
///
/// Malformed lines are logged and skipped.  At end of stream a final line
/// without its terminating newline is still forwarded.
///
/// Returns [`ConnectionEnd::Shutdown`] if `out` is closed, otherwise
/// [`ConnectionEnd::Disconnected`] once the stream ends or fails.
pub async fn read_backend_messages<R>(
    mut reader: R,
    server: &Arc<str>,
    out: &mpsc::Sender<BackendMessage>,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    let mut tokeniser = Tokeniser::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(server = %server, "connection closed (EOF)");
                if let Some(last) = tokeniser.finish() {
                    if !forward(server, out, last).await {
                        return ConnectionEnd::Shutdown;
                    }
                }
                return ConnectionEnd::Disconnected;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(server = %server, "read failed: {e}");
                return ConnectionEnd::Disconnected;
            }
        };

        for line in tokeniser.decode(&buf[..n]) {
            if !forward(server, out, line).await {
                return ConnectionEnd::Shutdown;
            }
        }
    }
}

/// Sends one decoded line on; `false` if nobody is listening any more.
async fn forward(
    server: &Arc<str>,
    out: &mpsc::Sender<BackendMessage>,
    line: Result<Vec<String>, TokeniseError>,
) -> bool {
    let message = match line.map(Message::from_line) {
        Ok(Ok(message)) => message,
        Ok(Err(e)) => {
            warn!(server = %server, "skipping line: {e}");
            return true;
        }
        Err(e) => {
            warn!(server = %server, "skipping line: {e}");
            return true;
        }
    };

    debug!(server = %server, "message: {message}");
    out.send(BackendMessage {
        server: Arc::clone(server),
        message,
    })
    .await
    .is_ok()
}

/// Writes `message` as one wire line and flushes it.
///
/// # Errors
///
/// Returns the I/O error if the write fails (e.g., the server closed the
/// connection).
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.to_wire().as_bytes()).await?;
    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
