//! bifrost-bridge library crate.
//!
//! Bifrost follows one or more BAPS3 playout servers over TCP and re-broadcasts
//! every line they send to all connected WebSocket clients.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! BAPS3 servers (text lines over TCP)
//!         ↓
//! [bifrost-bridge]
//!   ├── domain/            Pure types: config, session ids, outbound frames
//!   ├── application/       Hub, sessions, mailboxes, countdown
//!   └── infrastructure/
//!         ├── backend_conn/ One reconnecting connector per server
//!         ├── config_file/  TOML config loading and validation
//!         ├── requests/     Client requests routed to a connector by name
//!         └── ws_server/    WebSocket accept loop and per-client reader
//!         ↓
//! Browsers / dashboards (text frames over WebSocket)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` uses Tokio tasks and channels but never opens a socket;
//!   sessions are generic over any `Sink`.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and `bifrost-core`.
//!
//! # For beginners: how a line travels
//!
//! A connector reads bytes from a server and the `bifrost-core` tokeniser turns
//! them into messages.  `main.rs` hands each message to the hub as text.  The
//! hub offers it to every session's mailbox without waiting, and each session's
//! output task writes it to its own client.  A client too slow to take a
//! message is dropped instead of holding everyone else up.
//!
//! Requests go the other way.  Each client's reader task splits its text
//! frames into lines; the first word of a line names a server, and the rest is
//! queued on that server's connector and written to it as one line.

/// Domain layer: pure configuration and session types (no I/O).
pub mod domain;

/// Application layer: broadcast hub and session machinery.
pub mod application;

/// Infrastructure layer: config file, WebSocket server and backend connections.
pub mod infrastructure;
