//! TOML configuration file for the bridge.
//!
//! The file names the backend servers to follow and how the WebSocket side
//! should behave.  A minimal file only needs one server:
//!
//! ```toml
//! [servers.playout]
//! hostport = "127.0.0.1:1350"
//! ```
//!
//! Everything else has a default:
//!
//! ```toml
//! log_level = "info"
//!
//! [servers.playout]
//! hostport = "127.0.0.1:1350"
//! reconnect_secs = 5
//!
//! [http]
//! hostport = "0.0.0.0:8080"
//! path = "/"
//!
//! [websocket]
//! read_buffer_size = 1024
//! write_buffer_size = 1024
//! max_message_size = 65536
//! write_wait_secs = 10
//! pong_wait_secs = 60
//!
//! [hub]
//! event_capacity = 64
//! ```
//!
//! # Two layers of types
//!
//! [`FileConfig`] mirrors the file exactly (strings, whole seconds, a table of
//! servers keyed by name).  It is converted into the domain's
//! [`BridgeConfig`] with `TryFrom`, and that conversion is where the file is
//! validated.  The rest of the program never sees the raw file types.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{
    BridgeConfig, HttpConfig, HubConfig, ServerConfig, SessionTiming, WebSocketSettings,
};

/// Error type for loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// No `[servers.<name>]` table was given.
    #[error("config names no servers; add at least one [servers.<name>] table")]
    NoServers,

    /// An address did not parse.
    #[error("invalid address {value:?} for {field}")]
    InvalidAddress { field: String, value: String },

    /// A value is out of range.
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
}

// ── File schema ───────────────────────────────────────────────────────────────

/// The configuration file as written on disk.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend servers, keyed by a name used in logs.
    #[serde(default)]
    pub servers: BTreeMap<String, FileServer>,
    #[serde(default)]
    pub http: FileHttp,
    #[serde(default)]
    pub websocket: FileWebSocket,
    #[serde(default)]
    pub hub: FileHub,
}

/// One `[servers.<name>]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileServer {
    pub hostport: String,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

/// The `[http]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileHttp {
    #[serde(default = "default_http_hostport")]
    pub hostport: String,
    #[serde(default = "default_path")]
    pub path: String,
}

/// The `[websocket]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileWebSocket {
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
}

/// The `[hub]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileHub {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_reconnect_secs() -> u64 {
    5
}
fn default_http_hostport() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_path() -> String {
    "/".to_string()
}
fn default_buffer_size() -> usize {
    1024
}
fn default_max_message_size() -> usize {
    64 * 1024
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_event_capacity() -> usize {
    64
}

impl Default for FileHttp {
    fn default() -> Self {
        Self {
            hostport: default_http_hostport(),
            path: default_path(),
        }
    }
}

impl Default for FileWebSocket {
    fn default() -> Self {
        Self {
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            write_wait_secs: default_write_wait_secs(),
            pong_wait_secs: default_pong_wait_secs(),
        }
    }
}

impl Default for FileHub {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

impl TryFrom<FileConfig> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, ConfigError> {
        if file.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        let servers = file
            .servers
            .into_iter()
            .map(|(name, server)| {
                if server.hostport.trim().is_empty() {
                    return Err(ConfigError::InvalidAddress {
                        field: format!("servers.{name}.hostport"),
                        value: server.hostport,
                    });
                }
                Ok(ServerConfig {
                    name,
                    hostport: server.hostport,
                    reconnect_interval: Duration::from_secs(server.reconnect_secs),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bind_addr: SocketAddr =
            file.http
                .hostport
                .parse()
                .map_err(|_| ConfigError::InvalidAddress {
                    field: "http.hostport".to_string(),
                    value: file.http.hostport.clone(),
                })?;
        if !file.http.path.starts_with('/') {
            return Err(invalid("http.path", "must start with '/'"));
        }

        let ws = file.websocket;
        if ws.write_wait_secs == 0 {
            return Err(invalid("websocket.write_wait_secs", "must be at least 1"));
        }
        if ws.pong_wait_secs == 0 {
            return Err(invalid("websocket.pong_wait_secs", "must be at least 1"));
        }
        if ws.read_buffer_size == 0 || ws.write_buffer_size == 0 {
            return Err(invalid("websocket buffer sizes", "must be non-zero"));
        }
        if file.hub.event_capacity == 0 {
            return Err(invalid("hub.event_capacity", "must be at least 1"));
        }

        Ok(BridgeConfig {
            servers,
            http: HttpConfig {
                bind_addr,
                path: file.http.path,
            },
            websocket: WebSocketSettings {
                read_buffer_size: ws.read_buffer_size,
                write_buffer_size: ws.write_buffer_size,
                max_message_size: ws.max_message_size,
            },
            session: SessionTiming {
                write_wait: Duration::from_secs(ws.write_wait_secs),
                pong_wait: Duration::from_secs(ws.pong_wait_secs),
            },
            hub: HubConfig {
                event_capacity: file.hub.event_capacity,
            },
            log_level: file.log_level,
        })
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses and validates configuration text.
///
/// # Errors
///
/// [`ConfigError::Parse`] for malformed TOML or unknown keys, and the
/// validation variants for well-formed but unusable settings.
pub fn parse_config(text: &str) -> Result<BridgeConfig, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    BridgeConfig::try_from(file)
}

/// Reads, parses and validates the configuration file at `path`.
///
/// Unlike a settings file that can fall back to defaults, a missing file is an
/// error here: without it there are no servers to follow.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, otherwise as
/// [`parse_config`].
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
