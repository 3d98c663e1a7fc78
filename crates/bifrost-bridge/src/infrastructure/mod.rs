//! Infrastructure layer for bifrost-bridge.
//!
//! The infrastructure layer handles all I/O: reading the config file, accepting
//! WebSocket clients, and holding the TCP connections to the backend servers.
//!
//! # Responsibilities
//!
//! - Loading and validating the TOML configuration file
//! - Binding the WebSocket listener and performing the upgrade handshake
//! - Wiring each upgraded connection to a session and the hub
//! - Dialing, reading and redialing each backend BAPS3 server
//! - Routing client requests to the server they name
//!
//! # What does NOT belong here?
//!
//! - Deciding which client gets which payload (that is the hub, in the
//!   application layer)
//! - Parsing BAPS3 lines (that is `bifrost-core`)

pub mod backend_conn;
pub mod config_file;
pub mod requests;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use backend_conn::{spawn_connector, BackendMessage, ConnectorError, ConnectorHandle};
pub use config_file::{load_config, parse_config, ConfigError};
pub use requests::{parse_client_requests, ClientRequest, RequestError, RequestRouter};
pub use ws_server::{run_server, serve, ServerContext};
