//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from the TOML config file (see
//! `infrastructure::config_file`) and then handed, piece by piece, to the
//! components that need it: each connector gets its [`ServerConfig`], the
//! WebSocket server gets [`HttpConfig`] and [`WebSocketSettings`], every
//! session gets the same [`SessionTiming`], and the hub gets [`HubConfig`].
//!
//! # Design rationale
//!
//! Keeping configuration as plain structs (no global state, no file reads
//! inside the domain) makes every component easy to construct in tests with
//! exactly the settings a test needs.

use std::net::SocketAddr;
use std::time::Duration;

/// Shortest keepalive period; a zero period would make the ticker panic.
const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// All runtime configuration for the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Backend BAPS3 servers to connect to, one connector each.
    pub servers: Vec<ServerConfig>,
    /// Where the WebSocket endpoint listens.
    pub http: HttpConfig,
    /// Buffer sizing handed to the WebSocket upgrade.
    pub websocket: WebSocketSettings,
    /// Write deadline and keepalive timing for every session.
    pub session: SessionTiming,
    /// Hub event-queue sizing.
    pub hub: HubConfig,
    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

/// One backend BAPS3 server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Name used in logs (the key of the `[servers.<name>]` table).
    pub name: String,
    /// `host:port` of the server's control socket.  Host names are resolved
    /// on every dial.
    pub hostport: String,
    /// Pause between a disconnect (or failed dial) and the next attempt.
    pub reconnect_interval: Duration,
}

/// WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Request path clients must upgrade on; any other path gets a 404.
    pub path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/".to_string(),
        }
    }
}

/// Buffer sizing for the WebSocket transport.
///
/// Passed explicitly to the upgrade layer for every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Bytes read from the socket per read call.
    pub read_buffer_size: usize,
    /// Bytes buffered before the transport flushes a write.
    pub write_buffer_size: usize,
    /// Largest inbound message accepted from a client.
    pub max_message_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            max_message_size: 64 * 1024,
        }
    }
}

/// Deadlines that drive a session's output task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Longest a single frame write (payload, ping or close) may take.
    pub write_wait: Duration,
    /// How long the client is assumed to wait for traffic before it gives up
    /// on the connection.  Pings are sent well inside this window.
    pub pong_wait: Duration,
}

impl SessionTiming {
    /// Keepalive period: 90% of [`pong_wait`](Self::pong_wait), so a ping
    /// reaches the client before its liveness window runs out.
    ///
    /// Never shorter than one millisecond, even for a zero `pong_wait`.
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(MIN_PING_PERIOD)
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
        }
    }
}

/// Hub sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the hub's event queue.  Senders wait when it is full; the
    /// hub itself never waits on a client.
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { event_capacity: 64 }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
