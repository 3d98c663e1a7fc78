//! Client sessions and their output tasks.
//!
//! A session is one connected client.  It is split into two halves:
//!
//! - [`SessionHandle`]: the identity plus the sending side of the session's
//!   mailbox.  It is handed to the hub, which is the only thing that ever
//!   offers payloads to it or closes it.
//! - the **output task** ([`run_output`]): owns the client's sink and the
//!   receiving side of the mailbox.  It is the only code that writes to the
//!   client, so two writers can never interleave frames on one connection.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──(mailbox closed | write failed | write timed out | ping failed)──▶ Closing ──▶ Closed
//! ```
//!
//! In `Closing` a Close frame is sent if (and only if) the hub closed the
//! mailbox; errors from that write are ignored.  Whatever the reason, the sink
//! is then closed and dropped, the keepalive ticker is dropped, and the
//! mailbox receiver is dropped, which marks the mailbox closed so the hub
//! evicts the session on its next broadcast.

use std::fmt::Display;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::debug;

use crate::application::mailbox::{
    mailbox, MailboxProbe, MailboxReceiver, MailboxSender, OfferError,
};
use crate::domain::{OutboundFrame, Payload, SessionId, SessionTiming};

/// Why a session's output task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The hub closed the mailbox (unregistration, eviction or shutdown).
    MailboxClosed,
    /// Writing a payload returned an error.
    WriteFailed,
    /// Writing a payload took longer than the write deadline.
    WriteTimedOut,
    /// Writing a keepalive ping failed or timed out.
    PingFailed,
}

/// The hub's view of a session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    mailbox: MailboxSender,
}

impl SessionHandle {
    /// Pairs an id with the sending side of a mailbox.
    pub fn new(id: SessionId, mailbox: MailboxSender) -> Self {
        Self { id, mailbox }
    }

    /// The session's identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Offers a payload without waiting; see [`MailboxSender::try_offer`].
    ///
    /// # Errors
    ///
    /// Returns [`OfferError`] if the output task cannot take it right now.
    pub fn try_offer(&self, payload: Payload) -> Result<(), OfferError> {
        self.mailbox.try_offer(payload)
    }

    /// Closes the mailbox, telling the output task to finish.
    pub fn close(&self) -> bool {
        self.mailbox.close()
    }

    /// Read-only view of the mailbox state.
    pub fn probe(&self) -> MailboxProbe {
        self.mailbox.probe()
    }
}

/// Creates a session around `sink` and spawns its output task.
///
/// The returned handle still has to be registered with the hub.
pub fn spawn_session<S>(sink: S, timing: SessionTiming) -> (SessionHandle, JoinHandle<SessionExit>)
where
    S: Sink<OutboundFrame> + Unpin + Send + 'static,
    S::Error: Display + Send,
{
    let id = SessionId::new();
    let (tx, rx) = mailbox();
    let task = tokio::spawn(run_output(id, sink, rx, timing));
    (SessionHandle::new(id, tx), task)
}

/// Drains the mailbox into `sink` and sends keepalive pings until the session ends.
pub async fn run_output<S>(
    id: SessionId,
    mut sink: S,
    mut mailbox: MailboxReceiver,
    timing: SessionTiming,
) -> SessionExit
where
    S: Sink<OutboundFrame> + Unpin,
    S::Error: Display,
{
    let exit = drive(id, &mut sink, &mut mailbox, timing).await;
    drop(mailbox);

    if exit == SessionExit::MailboxClosed {
        let _ = timeout(timing.write_wait, sink.send(OutboundFrame::Close)).await;
    }
    let _ = timeout(timing.write_wait, sink.close()).await;

    debug!(session = %id, ?exit, "session output task finished");
    exit
}

async fn drive<S>(
    id: SessionId,
    sink: &mut S,
    mailbox: &mut MailboxReceiver,
    timing: SessionTiming,
) -> SessionExit
where
    S: Sink<OutboundFrame> + Unpin,
    S::Error: Display,
{
    let period = timing.ping_period();
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = mailbox.recv() => {
                let Some(payload) = next else {
                    return SessionExit::MailboxClosed;
                };
                match write(sink, OutboundFrame::Text(payload), timing.write_wait).await {
                    Ok(()) => {}
                    Err(WriteFailure::Error(e)) => {
                        debug!(session = %id, "write failed: {e}");
                        return SessionExit::WriteFailed;
                    }
                    Err(WriteFailure::TimedOut) => {
                        debug!(session = %id, "write timed out after {:?}", timing.write_wait);
                        return SessionExit::WriteTimedOut;
                    }
                }
            }
            _ = keepalive.tick() => {
                if let Err(failure) = write(sink, OutboundFrame::Ping, timing.write_wait).await {
                    debug!(session = %id, "keepalive ping failed: {failure}");
                    return SessionExit::PingFailed;
                }
            }
        }
    }
}

enum WriteFailure {
    Error(String),
    TimedOut,
}

impl Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteFailure::Error(e) => f.write_str(e),
            WriteFailure::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Sends one frame under the write deadline.
async fn write<S>(
    sink: &mut S,
    frame: OutboundFrame,
    deadline: Duration,
) -> Result<(), WriteFailure>
where
    S: Sink<OutboundFrame> + Unpin,
    S::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteFailure::Error(e.to_string())),
        Err(_) => Err(WriteFailure::TimedOut),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
