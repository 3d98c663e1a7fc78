//! Bifrost: BAPS3-to-WebSocket bridge, entry point.
//!
//! This binary follows one or more BAPS3 playout servers and re-broadcasts
//! every message they send, as a WebSocket text frame, to every connected
//! client.
//!
//! # Why a separate bridge process?
//!
//! Web browsers can only speak HTTP/WebSocket; they cannot open the raw TCP
//! control socket a BAPS3 server offers.  The bridge holds one connection per
//! server and fans the traffic out, so any number of browser dashboards can
//! watch a server without each one loading the server itself.
//!
//! # Usage
//!
//! ```text
//! bifrost [-c <configfile>]
//!
//! Options:
//!   -c, --config <PATH>   Path to the config file [default: config.toml]
//!   -h, --help            Show this help message
//!   -V, --version         Show version
//! ```
//!
//! The config path can also be given with the `BIFROST_CONFIG` environment
//! variable; the flag wins when both are present.  The log filter comes from
//! `RUST_LOG`, falling back to `log_level` in the config file.
//!
//! # Architecture overview
//!
//! ```text
//! BAPS3 server(s)  (text lines over TCP)
//!       ↓  one connector each
//! main loop  ← this file
//!       ↓  hub.broadcast(message)
//! hub → sessions → WebSocket clients
//! ```
//!
//! Requests travel the other way without passing through the main loop: each
//! client's reader hands them to a `RequestRouter` shared by every client.
//!
//! # Shutdown order
//!
//! On Ctrl+C (or if the listener fails) the accept loop is stopped, every
//! connector is shut down, and the hub is told to close every session.  The
//! process exits once the countdown shows that the hub and all connectors have
//! finished.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bifrost_bridge::application::{Countdown, Hub};
use bifrost_bridge::infrastructure::{
    load_config, run_server, spawn_connector, BackendMessage, ConnectorHandle, RequestRouter,
    ServerContext,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bifrost, the BAPS3-to-WebSocket bridge.
///
/// The `#[derive(Parser)]` macro from `clap` generates the argument parser
/// automatically from the struct fields and their `#[arg(...)]` attributes.
#[derive(Debug, Parser)]
#[command(
    name = "bifrost",
    about = "Re-broadcasts BAPS3 server traffic to WebSocket clients",
    version
)]
struct Cli {
    /// Path to the bifrost config file.
    #[arg(short = 'c', long, default_value = "config.toml", env = "BIFROST_CONFIG")]
    config: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap`.
/// 2. The config file is loaded and validated; any problem is fatal.
/// 3. `tracing_subscriber` is initialised.
/// 4. The hub, one connector per server, and the WebSocket listener start.
/// 5. The main loop forwards backend messages to the hub until Ctrl+C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise the config file's level, otherwise `info`.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "bifrost starting: {} server(s), ws={}{}",
        config.servers.len(),
        config.http.bind_addr,
        config.http.path
    );

    // ── Start the components ──────────────────────────────────────────────────
    let countdown = Countdown::new();
    let (hub, hub_task) = Hub::spawn(config.hub, &countdown);

    let (msg_tx, mut msg_rx) = mpsc::channel::<BackendMessage>(config.hub.event_capacity.max(1));
    let connectors: Vec<ConnectorHandle> = config
        .servers
        .iter()
        .cloned()
        .map(|server| spawn_connector(server, msg_tx.clone(), &countdown))
        .collect();
    // Only the connectors hold senders now, so `recv` ends if they all stop.
    drop(msg_tx);

    let running = Arc::new(AtomicBool::new(true));
    let ctx = ServerContext::new(&config, hub.clone(), RequestRouter::new(&connectors));
    let mut server = tokio::spawn(run_server(config.http.bind_addr, ctx, Arc::clone(&running)));

    // ── Main loop ─────────────────────────────────────────────────────────────
    let mut server_finished = false;
    let outcome = loop {
        tokio::select! {
            received = msg_rx.recv() => match received {
                Some(BackendMessage { server, message }) => {
                    debug!(%server, "{message}");
                    if hub.broadcast(message.to_string()).await.is_err() {
                        break Ok(());
                    }
                }
                None => {
                    warn!("every connector has stopped");
                    break Ok(());
                }
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break Ok(());
            }
            result = &mut server => {
                server_finished = true;
                break server_outcome(result);
            }
        }
    };

    // ── Orderly shutdown ──────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    drop(msg_rx);
    for connector in connectors {
        connector.shutdown().await;
    }
    if hub.shutdown().await.is_err() {
        debug!("hub had already stopped");
    }
    countdown.wait().await;
    if let Err(e) = hub_task.await {
        error!("hub task failed: {e}");
    }
    if !server_finished {
        if let Err(e) = server_outcome(server.await) {
            error!("WebSocket server failed: {e:#}");
        }
    }

    info!("bifrost stopped");
    outcome
}

/// Flattens the listener task's join result into one error.
fn server_outcome(result: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    result.context("WebSocket server task panicked")?
}

// ── Tests ─────────────────────────────────────────────────────────────────────
