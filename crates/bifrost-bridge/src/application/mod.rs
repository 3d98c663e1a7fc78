//! Application layer for bifrost-bridge.
//!
//! The application layer holds the broadcast machinery: it knows *what* to do
//! with clients and payloads, but never opens a socket itself.
//!
//! # Responsibilities
//!
//! - The zero-capacity [`mailbox`] between the hub and each session
//! - Each session's output task ([`session`]): ordered writes, keepalive pings,
//!   write deadlines and guaranteed cleanup
//! - The [`hub`]: registration, non-blocking fan-out with eviction, shutdown
//! - The [`countdown`] the process waits on before exiting
//!
//! # What does NOT belong here?
//!
//! - Accepting TCP connections or upgrading them to WebSocket (infrastructure)
//! - Talking to backend servers (infrastructure)
//!
//! Sessions are generic over any `Sink<OutboundFrame>`, so the tests in this
//! layer drive them with in-memory sinks instead of real connections.

pub mod countdown;
pub mod hub;
pub mod mailbox;
pub mod session;

pub use countdown::{Countdown, Enlisted};
pub use hub::{Broadcast, Hub, HubError, HubHandle};
pub use mailbox::{mailbox, MailboxProbe, MailboxReceiver, MailboxSender, OfferError};
pub use session::{run_output, spawn_session, SessionExit, SessionHandle};
