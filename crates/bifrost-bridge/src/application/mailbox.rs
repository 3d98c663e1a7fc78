//! Zero-capacity handoff queue from the hub to one session.
//!
//! A mailbox holds no backlog.  The hub may only hand a payload over while the
//! session's output task is idle: parked in [`MailboxReceiver::recv`] with
//! nothing pending, or not yet started and never handed anything.  At any other
//! moment [`MailboxSender::try_offer`] fails straight away and the hub evicts
//! the session.  This is what keeps the hub loop from ever waiting on a slow
//! client.
//!
//! ```text
//! hub ──try_offer──▶ [ slot: empty | one payload ] ──recv──▶ output task
//!                     accepted only while the receiver is idle
//! ```
//!
//! A new mailbox starts out idle, so a session registered right after it was
//! spawned takes the first broadcast even if its output task has not been
//! scheduled yet.
//!
//! Closing is explicit ([`MailboxSender::close`]) and also happens when either
//! half is dropped, so a session that dies on its own is noticed by the hub on
//! the next broadcast.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::Payload;

/// Why a payload could not be handed over.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The receiver is busy (not parked in `recv`, or still holding the
    /// previous payload).
    #[error("receiver is not ready")]
    NotReady,

    /// The mailbox has been closed by either side.
    #[error("mailbox is closed")]
    Closed,
}

#[derive(Debug)]
struct Slot {
    item: Option<Payload>,
    /// The receiver is idle and has taken everything offered.
    waiting: bool,
    closed: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            item: None,
            waiting: true,
            closed: false,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot holds plain data, so it stays consistent even if a holder panicked.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the mailbox closed; returns `true` the first time only.
    fn close(&self) -> bool {
        let first = {
            let mut slot = self.lock();
            !std::mem::replace(&mut slot.closed, true)
        };
        if first {
            self.notify.notify_one();
        }
        first
    }
}

/// Creates a connected mailbox pair.
pub fn mailbox() -> (MailboxSender, MailboxReceiver) {
    let shared = Arc::new(Shared::default());
    (
        MailboxSender {
            shared: Arc::clone(&shared),
        },
        MailboxReceiver { shared },
    )
}

/// Sending half, owned by the hub.  Closes the mailbox when dropped.
#[derive(Debug)]
pub struct MailboxSender {
    shared: Arc<Shared>,
}

impl MailboxSender {
    /// Hands `payload` to the receiver if it is ready right now.
    ///
    /// Never waits.
    ///
    /// # Errors
    ///
    /// [`OfferError::Closed`] if the mailbox is closed, otherwise
    /// [`OfferError::NotReady`] if the receiver still holds an earlier payload
    /// or is busy outside `recv`.
    pub fn try_offer(&self, payload: Payload) -> Result<(), OfferError> {
        {
            let mut slot = self.shared.lock();
            if slot.closed {
                return Err(OfferError::Closed);
            }
            if !slot.waiting || slot.item.is_some() {
                return Err(OfferError::NotReady);
            }
            slot.item = Some(payload);
            slot.waiting = false;
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Closes the mailbox.  A payload already handed over is still delivered
    /// before the receiver sees the closure.
    ///
    /// Returns `true` if this call closed it, `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Returns `true` once either side has closed the mailbox.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns a read-only view of the mailbox state.
    pub fn probe(&self) -> MailboxProbe {
        MailboxProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for MailboxSender {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Receiving half, owned by the session's output task.
#[derive(Debug)]
pub struct MailboxReceiver {
    shared: Arc<Shared>,
}

impl MailboxReceiver {
    /// Waits for the next payload.
    ///
    /// Returns `None` once the mailbox is closed and nothing is pending.  Apart
    /// from a brand-new mailbox, the receiver only counts as ready while this
    /// future is being awaited, so cancelling it (for example in
    /// `tokio::select!`) makes the hub's next offer fail.
    pub async fn recv(&mut self) -> Option<Payload> {
        let _parked = Parked {
            shared: &self.shared,
        };
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut slot = self.shared.lock();
                if let Some(item) = slot.item.take() {
                    return Some(item);
                }
                if slot.closed {
                    return None;
                }
                slot.waiting = true;
            }
            notified.await;
        }
    }
}

impl Drop for MailboxReceiver {
    fn drop(&mut self) {
        self.shared.lock().item = None;
        self.shared.close();
    }
}

/// Clears the `waiting` flag however `recv` ends: return or cancellation.
struct Parked<'a> {
    shared: &'a Shared,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.shared.lock().waiting = false;
    }
}

/// Read-only view of a mailbox, usable after the sender moved into the hub.
#[derive(Debug, Clone)]
pub struct MailboxProbe {
    shared: Arc<Shared>,
}

impl MailboxProbe {
    /// `true` if an offer made now would be accepted.
    pub fn is_ready(&self) -> bool {
        let slot = self.shared.lock();
        slot.waiting && slot.item.is_none() && !slot.closed
    }

    /// `true` once either side has closed the mailbox.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
