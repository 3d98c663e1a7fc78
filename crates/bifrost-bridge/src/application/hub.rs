//! The broadcast hub: single owner of the live session set.
//!
//! Every change to the set of connected clients, and every broadcast to them,
//! goes through one `mpsc` event stream consumed by one task.  Because only
//! that task ever touches the set, no locking is needed and events are applied
//! strictly in arrival order.
//!
//! # Backpressure
//!
//! A broadcast never waits for a client.  For each live session the hub calls
//! [`SessionHandle::try_offer`]; a session whose output task is not idle at
//! that instant (still writing the previous payload, stalled on the network,
//! or already gone) is evicted on the spot: removed from the set and its
//! mailbox closed.  A session that was just spawned counts as idle.  Clients
//! are expected to reconnect.
//!
//! # For beginners: why a task instead of a `Mutex<HashMap>`?
//!
//! With a mutex, a broadcast racing a registration could deliver a payload to
//! half-registered state, and every caller would contend for the lock.  With a
//! single owner task, "register then broadcast" simply means "the register
//! event was received first", and the ordering guarantees fall out for free:
//! a session that survives a run of broadcasts sees all of them, in order.
//!
//! # Shutdown
//!
//! [`HubHandle::shutdown`] pushes an explicit [`Broadcast::Shutdown`] through
//! the same stream.  When the hub processes it, it closes every live mailbox
//! exactly once, stops accepting events, and releases its countdown token.
//! Events still queued behind the shutdown are discarded.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::countdown::{Countdown, Enlisted};
use crate::application::session::SessionHandle;
use crate::domain::{HubConfig, Payload, SessionId};

// ── Events ────────────────────────────────────────────────────────────────────

/// What a broadcast event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// Deliver this payload to every live session.
    Payload(Payload),
    /// Close every session and stop the hub.
    Shutdown,
}

#[derive(Debug)]
enum HubEvent {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast(Broadcast),
    Inspect(oneshot::Sender<Vec<SessionId>>),
}

/// Errors returned by [`HubHandle`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub has shut down and no longer accepts events.
    #[error("hub has shut down")]
    Closed,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front door to a running hub.
///
/// Every operation enqueues one event and returns once it is queued; it does
/// not wait for the hub to process it (except [`live_sessions`](Self::live_sessions),
/// which waits for the reply).
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Adds a session to the live set.  Registering an id that is already live
    /// has no effect on the registered session.
    ///
    /// # Errors
    ///
    /// [`HubError::Closed`] if the hub has stopped; the handle is dropped,
    /// which closes its mailbox.
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        self.send(HubEvent::Register(session)).await
    }

    /// Removes a session and closes its mailbox.  Unknown ids are ignored.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Delivers `payload` to every live session that is ready for it and
    /// evicts the rest.
    pub async fn broadcast(&self, payload: impl Into<Payload>) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(Broadcast::Payload(payload.into())))
            .await
    }

    /// Asks the hub to close every session and stop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubEvent::Broadcast(Broadcast::Shutdown)).await
    }

    /// Ids of the currently live sessions, as seen after every event queued
    /// before this call has been processed.
    pub async fn live_sessions(&self) -> Result<Vec<SessionId>, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubEvent::Inspect(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    /// `true` once the hub has stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Closed)
    }
}

// ── Hub loop ──────────────────────────────────────────────────────────────────

/// The hub's state, owned by its task.
#[derive(Debug)]
pub struct Hub {
    sessions: HashMap<SessionId, SessionHandle>,
    quiescent: bool,
    events: mpsc::Receiver<HubEvent>,
    _done: Enlisted,
}

impl Hub {
    /// Starts a hub task and returns a handle to it.
    ///
    /// The hub enlists in `countdown` and releases its token once it has shut
    /// down, so the owner can wait for every session to be closed.
    pub fn spawn(config: HubConfig, countdown: &Countdown) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Hub {
            sessions: HashMap::new(),
            quiescent: false,
            events: rx,
            _done: countdown.enlist(),
        };
        (HubHandle { events: tx }, tokio::spawn(hub.run()))
    }

    async fn run(mut self) {
        debug!("hub started");
        while let Some(event) = self.events.recv().await {
            self.handle(event);
            if self.quiescent {
                break;
            }
        }

        // Every handle dropped without an explicit shutdown: same treatment.
        if !self.quiescent {
            self.shut_down();
        }
        self.events.close();
        info!("hub stopped");
        // Dropping `self` discards queued events and releases the countdown token.
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.register(session),
            HubEvent::Unregister(id) => self.unregister(id),
            HubEvent::Broadcast(Broadcast::Payload(payload)) => self.fan_out(&payload),
            HubEvent::Broadcast(Broadcast::Shutdown) => self.shut_down(),
            HubEvent::Inspect(reply) => {
                let _ = reply.send(self.sessions.keys().copied().collect());
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            debug!(session = %id, "already registered");
            return;
        }
        self.sessions.insert(id, session);
        debug!(session = %id, live = self.sessions.len(), "session registered");
    }

    fn unregister(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(&id) {
            session.close();
            debug!(session = %id, live = self.sessions.len(), "session unregistered");
        }
    }

    fn fan_out(&mut self, payload: &Payload) {
        self.sessions.retain(|id, session| {
            match session.try_offer(Payload::clone(payload)) {
                Ok(()) => true,
                Err(reason) => {
                    session.close();
                    debug!(session = %id, %reason, "session evicted");
                    false
                }
            }
        });
    }

    fn shut_down(&mut self) {
        let closing = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.close();
        }
        self.quiescent = true;
        info!(sessions = closing, "hub shutting down");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::mailbox::{mailbox, MailboxProbe, MailboxReceiver};

    /// A session whose "output task" forwards every payload to a channel and
    /// ends (dropping the channel) when its mailbox closes.
    fn collecting_session() -> (SessionHandle, MailboxProbe, mpsc::UnboundedReceiver<Payload>) {
        let (tx, mut rx) = mailbox();
        let probe = tx.probe();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if out_tx.send(payload).is_err() {
                    break;
                }
            }
        });
        (SessionHandle::new(SessionId::new(), tx), probe, out_rx)
    }

    /// A session whose receiver never drains: an earlier payload is still
    /// sitting in its mailbox.
    fn stalled_session() -> (SessionHandle, MailboxProbe, MailboxReceiver) {
        let (tx, rx) = mailbox();
        let probe = tx.probe();
        tx.try_offer("STATUS 0".into())
            .expect("a new mailbox takes its first payload");
        (SessionHandle::new(SessionId::new(), tx), probe, rx)
    }

    async fn until_ready(probe: &MailboxProbe) {
        while !probe.is_ready() {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_hub() -> (HubHandle, JoinHandle<()>, Countdown) {
        let countdown = Countdown::new();
        let (hub, task) = Hub::spawn(HubConfig::default(), &countdown);
        (hub, task, countdown)
    }

    fn sorted(mut ids: Vec<SessionId>) -> Vec<SessionId> {
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    #[tokio::test]
    async fn test_every_ready_session_receives_the_broadcast() {
        // Arrange: three registered, parked sessions
        let (hub, _task, _countdown) = spawn_hub();
        let mut outputs = Vec::new();
        for _ in 0..3 {
            let (session, probe, out) = collecting_session();
            until_ready(&probe).await;
            hub.register(session).await.unwrap();
            outputs.push(out);
        }

        // Act
        hub.broadcast("OK ACK").await.unwrap();
        hub.live_sessions().await.unwrap();

        // Assert
        for out in &mut outputs {
            assert_eq!(out.recv().await.as_deref(), Some("OK ACK"));
            assert!(out.try_recv().is_err(), "exactly one message expected");
        }
        assert_eq!(hub.live_sessions().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_freshly_spawned_sessions_receive_the_first_broadcast() {
        use crate::application::session::spawn_session;
        use crate::domain::{OutboundFrame, SessionTiming};
        use futures_util::sink;

        // Arrange: real sessions registered straight after spawning them
        let (hub, _task, _countdown) = spawn_hub();
        let mut frames = Vec::new();
        for _ in 0..3 {
            let (frame_tx, frame_rx) = mpsc::unbounded_channel();
            let recorder = sink::unfold(frame_tx, |tx, frame: OutboundFrame| async move {
                tx.send(frame).map_err(|e| e.to_string())?;
                Ok::<_, String>(tx)
            });
            let (session, _output) = spawn_session(Box::pin(recorder), SessionTiming::default());
            hub.register(session).await.unwrap();
            frames.push(frame_rx);
        }

        // Act
        hub.broadcast("OK ACK").await.unwrap();

        // Assert
        assert_eq!(hub.live_sessions().await.unwrap().len(), 3);
        for rx in &mut frames {
            assert_eq!(rx.recv().await, Some(OutboundFrame::Text("OK ACK".into())));
        }
    }

    #[tokio::test]
    async fn test_stalled_session_is_evicted_and_others_keep_receiving() {
        // Arrange
        let (hub, _task, _countdown) = spawn_hub();
        let (s1, p1, mut out1) = collecting_session();
        let (s2, p2, _stalled_rx) = stalled_session();
        let (s3, p3, mut out3) = collecting_session();
        let (id1, id2, id3) = (s1.id(), s2.id(), s3.id());
        until_ready(&p1).await;
        until_ready(&p3).await;
        for s in [s1, s2, s3] {
            hub.register(s).await.unwrap();
        }

        // Act: first broadcast evicts the stalled session
        hub.broadcast("STATUS 1").await.unwrap();
        let after_first = hub.live_sessions().await.unwrap();
        until_ready(&p1).await;
        until_ready(&p3).await;
        hub.broadcast("STATUS 2").await.unwrap();
        let after_second = hub.live_sessions().await.unwrap();

        // Assert
        assert!(!after_first.contains(&id2));
        assert!(p2.is_closed());
        assert_eq!(sorted(after_second), sorted(vec![id1, id3]));
        for out in [&mut out1, &mut out3] {
            assert_eq!(out.recv().await.as_deref(), Some("STATUS 1"));
            assert_eq!(out.recv().await.as_deref(), Some("STATUS 2"));
        }
    }

    #[tokio::test]
    async fn test_session_still_busy_with_previous_payload_is_evicted() {
        // Arrange: a receiver that takes one payload and then stops waiting
        let (hub, _task, _countdown) = spawn_hub();
        let (tx, mut rx) = mailbox();
        let probe = tx.probe();
        let session = SessionHandle::new(SessionId::new(), tx);
        let id = session.id();
        let first = tokio::spawn(async move {
            let got = rx.recv().await;
            (got, rx)
        });
        until_ready(&probe).await;
        hub.register(session).await.unwrap();

        // Act
        hub.broadcast("X").await.unwrap();
        let (got, _rx) = first.await.unwrap();
        hub.broadcast("Y").await.unwrap();

        // Assert
        assert_eq!(got.as_deref(), Some("X"));
        assert!(!hub.live_sessions().await.unwrap().contains(&id));
        assert!(probe.is_closed());
    }

    #[tokio::test]
    async fn test_survivor_receives_broadcasts_in_order() {
        let (hub, _task, _countdown) = spawn_hub();
        let (session, probe, mut out) = collecting_session();
        until_ready(&probe).await;
        hub.register(session).await.unwrap();

        let sent: Vec<String> = (0..20).map(|i| format!("TIME {i}")).collect();
        for payload in &sent {
            until_ready(&probe).await;
            hub.broadcast(payload.as_str()).await.unwrap();
            // Barrier: the broadcast above has been fanned out.
            hub.live_sessions().await.unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..sent.len() {
            received.push(out.recv().await.unwrap().to_string());
        }
        assert_eq!(received, sent);
        assert_eq!(hub.live_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_session_is_a_no_op() {
        let (hub, _task, _countdown) = spawn_hub();
        let (session, probe, _out) = collecting_session();
        until_ready(&probe).await;
        let id = session.id();
        hub.register(session).await.unwrap();

        hub.unregister(SessionId::new()).await.unwrap();

        assert_eq!(hub.live_sessions().await.unwrap(), vec![id]);
        assert!(!probe.is_closed());
    }

    #[tokio::test]
    async fn test_unregister_twice_closes_once_and_never_errors() {
        // Arrange
        let (hub, _task, _countdown) = spawn_hub();
        let (session, probe, mut out) = collecting_session();
        let id = session.id();
        hub.register(session).await.unwrap();

        // Act
        hub.unregister(id).await.unwrap();
        hub.unregister(id).await.unwrap();

        // Assert: mailbox closed, collector finished without payloads
        assert!(hub.live_sessions().await.unwrap().is_empty());
        assert!(probe.is_closed());
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test]
    async fn test_register_same_id_twice_keeps_one_membership() {
        // Arrange: two handles claiming the same id
        let (hub, _task, _countdown) = spawn_hub();
        let (original, probe, mut out) = collecting_session();
        let id = original.id();
        let (dup_tx, _dup_rx) = mailbox();
        let dup_probe = dup_tx.probe();
        let duplicate = SessionHandle::new(id, dup_tx);
        until_ready(&probe).await;

        // Act
        hub.register(original).await.unwrap();
        hub.register(duplicate).await.unwrap();
        hub.broadcast("STATE Stopped").await.unwrap();

        // Assert: one membership, the original one still receives
        assert_eq!(hub.live_sessions().await.unwrap(), vec![id]);
        assert_eq!(out.recv().await.as_deref(), Some("STATE Stopped"));
        assert!(dup_probe.is_closed());
        assert!(!probe.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session_and_fires_completion_once() {
        // Arrange
        let (hub, task, countdown) = spawn_hub();
        let (s1, p1, mut out1) = collecting_session();
        let (s3, p3, mut out3) = collecting_session();
        hub.register(s1).await.unwrap();
        hub.register(s3).await.unwrap();
        assert_eq!(countdown.remaining(), 1);

        // Act
        hub.shutdown().await.unwrap();
        task.await.unwrap();

        // Assert: close signal, no payload, completion released
        assert!(p1.is_closed());
        assert!(p3.is_closed());
        assert_eq!(out1.recv().await, None);
        assert_eq!(out3.recv().await, None);
        assert_eq!(countdown.remaining(), 0);
        countdown.wait().await;
    }

    #[tokio::test]
    async fn test_events_after_shutdown_are_rejected() {
        let (hub, task, _countdown) = spawn_hub();
        hub.shutdown().await.unwrap();
        task.await.unwrap();

        let (late, late_probe, _out) = collecting_session();

        assert!(hub.is_closed());
        assert_eq!(hub.broadcast("late").await, Err(HubError::Closed));
        assert_eq!(hub.register(late).await, Err(HubError::Closed));
        assert_eq!(hub.unregister(SessionId::new()).await, Err(HubError::Closed));
        assert_eq!(hub.shutdown().await, Err(HubError::Closed));
        assert_eq!(hub.live_sessions().await, Err(HubError::Closed));
        assert!(late_probe.is_closed());
    }

    #[tokio::test]
    async fn test_registration_queued_behind_shutdown_is_discarded() {
        // Arrange
        let (hub, task, _countdown) = spawn_hub();
        let (late, late_probe, _out) = collecting_session();

        // Act: both events are queued before the hub gets to run
        let _ = hub.shutdown().await;
        let _ = hub.register(late).await;
        task.await.unwrap();

        // Assert
        assert!(late_probe.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_every_handle_shuts_the_hub_down() {
        let (hub, task, countdown) = spawn_hub();
        let (session, probe, _out) = collecting_session();
        hub.register(session).await.unwrap();

        drop(hub);
        task.await.unwrap();

        assert!(probe.is_closed());
        countdown.wait().await;
    }
}
