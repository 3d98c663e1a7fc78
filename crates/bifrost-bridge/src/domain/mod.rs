//! Domain layer for bifrost-bridge.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or async runtimes.  This makes them easy to test in isolation.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Session identity and the frames a session writes
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

pub mod config;
pub mod frames;

pub use config::{
    BridgeConfig, HttpConfig, HubConfig, ServerConfig, SessionTiming, WebSocketSettings,
};
pub use frames::{OutboundFrame, Payload, SessionId};
