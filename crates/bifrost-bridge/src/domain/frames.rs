//! Session identity and the frames a session writes to its client.
//!
//! These types are transport-agnostic: the application layer only ever talks
//! about [`OutboundFrame`]s, and the infrastructure layer maps them onto
//! WebSocket messages when it wires a real connection to a session.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

/// Text broadcast to every client, shared between sessions without copying.
pub type Payload = Arc<str>;

/// Opaque identity of one client session.
///
/// Two sessions never share an id, so the hub can use it as the membership key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh, random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to tell sessions apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// One unit of output written by a session's output task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A broadcast payload, sent as a text message.
    Text(Payload),
    /// A keepalive probe.
    Ping,
    /// The closing handshake frame, sent when the hub closes the session.
    Close,
}
