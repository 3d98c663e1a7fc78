//! Requests from WebSocket clients to the backend servers.
//!
//! A client drives a backend by sending a text frame of BAPS3 lines whose
//! first word names the server, as configured under `[servers.<name>]`:
//!
//! ```text
//! playout load 0 'My Song.mp3'
//! playout play
//! ```
//!
//! The first word picks the connector; the remaining words are written to that
//! server as one request line.  A frame may carry several lines, and its last
//! line needs no newline.
//!
//! # For beginners: why weak senders?
//!
//! A connector stops when every sender of its request channel is dropped.  The
//! router is cloned into every client task, so if it held ordinary senders a
//! connected client would keep the connector alive through shutdown.  A
//! `WeakSender` does not count; it is upgraded only for the moment a request
//! is queued.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::WeakSender;
use tracing::debug;

use bifrost_core::{Line, Message, TokeniseError, Tokeniser};

use crate::infrastructure::backend_conn::ConnectorHandle;

/// One request line from a client, addressed to a named server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Name of the server that should receive it.
    pub server: String,
    /// The request itself, without the server name.
    pub message: Message,
}

/// Why a client request was not passed on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The line could not be tokenised.
    #[error("malformed request: {0}")]
    Malformed(#[from] TokeniseError),

    /// The line named a server and nothing else.
    #[error("request for {server:?} has no command word")]
    MissingCommand { server: String },

    /// No connector runs under that name.
    #[error("no backend server named {0:?}")]
    UnknownServer(String),

    /// The connector for that server has stopped.
    #[error("connector for {0:?} has stopped")]
    Stopped(String),
}

/// Splits a client text frame into addressed requests, one per line.
///
/// Blank lines are skipped; every other line yields either a request or the
/// reason it is unusable.
pub fn parse_client_requests(text: &str) -> Vec<Result<ClientRequest, RequestError>> {
    let mut tokeniser = Tokeniser::new();
    let mut lines = tokeniser.decode(text.as_bytes());
    lines.extend(tokeniser.finish());
    lines
        .into_iter()
        .map(|line| line.map_err(RequestError::from).and_then(addressed))
        .collect()
}

fn addressed(line: Line) -> Result<ClientRequest, RequestError> {
    let mut words = line.into_iter();
    // The tokeniser never yields a line without words.
    let server = words.next().unwrap_or_default();
    match Message::from_line(words.collect()) {
        Ok(message) => Ok(ClientRequest { server, message }),
        Err(_) => Err(RequestError::MissingCommand { server }),
    }
}

/// Routes client requests to the connector of the server they name.
///
/// Cheap to clone; every client task holds one.
#[derive(Clone, Default)]
pub struct RequestRouter {
    routes: Arc<HashMap<String, WeakSender<Message>>>,
}

impl RequestRouter {
    /// Builds a router over the given connectors, keyed by server name.
    pub fn new<'a>(connectors: impl IntoIterator<Item = &'a ConnectorHandle>) -> Self {
        Self::from_routes(
            connectors
                .into_iter()
                .map(|connector| (connector.name().to_string(), connector.downgrade()))
                .collect(),
        )
    }

    fn from_routes(routes: HashMap<String, WeakSender<Message>>) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    /// Names of the servers requests can be routed to.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Queues `request` on its server's connector.
    ///
    /// Waits only while that connector's request queue is full.
    ///
    /// # Errors
    ///
    /// [`RequestError::UnknownServer`] if no connector has that name, or
    /// [`RequestError::Stopped`] if it is no longer running.
    pub async fn route(&self, request: ClientRequest) -> Result<(), RequestError> {
        let ClientRequest { server, message } = request;
        let Some(route) = self.routes.get(&server) else {
            return Err(RequestError::UnknownServer(server));
        };
        let Some(sender) = route.upgrade() else {
            return Err(RequestError::Stopped(server));
        };
        debug!(%server, "client request: {message}");
        match sender.send(message).await {
            Ok(()) => Ok(()),
            Err(_) => Err(RequestError::Stopped(server)),
        }
    }
}

impl fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.servers()).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
