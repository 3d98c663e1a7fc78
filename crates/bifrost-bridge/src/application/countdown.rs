//! Completion counting for long-lived tasks.
//!
//! The process must not exit while the hub is still closing sessions or a
//! connector is still tearing down its backend socket.  Each such task holds an
//! [`Enlisted`] token from a shared [`Countdown`]; dropping the token counts the
//! task as finished, and [`Countdown::wait`] resolves once every token is gone.
//!
//! Because the release happens in `Drop`, a task is counted down exactly once
//! on every exit path, including early returns and panics.

use std::sync::Arc;

use tokio::sync::watch;

/// A countdown of outstanding tasks that the owner can wait on.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: Arc<watch::Sender<usize>>,
}

impl Countdown {
    /// Creates a countdown with nothing outstanding.
    pub fn new() -> Self {
        let (remaining, _) = watch::channel(0);
        Self {
            remaining: Arc::new(remaining),
        }
    }

    /// Registers one more outstanding task and returns its token.
    pub fn enlist(&self) -> Enlisted {
        self.remaining.send_modify(|n| *n += 1);
        Enlisted {
            remaining: Arc::clone(&self.remaining),
        }
    }

    /// Number of tokens not yet released.
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Waits until every enlisted task has released its token.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of one outstanding task; released when dropped.
#[derive(Debug)]
#[must_use = "dropping the token immediately counts the task as finished"]
pub struct Enlisted {
    remaining: Arc<watch::Sender<usize>>,
}

impl Drop for Enlisted {
    fn drop(&mut self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }
}
