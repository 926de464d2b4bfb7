//! Status publication.
//!
//! The latest [`SetupSnapshot`] sits in a watch channel for cheap reads. Each
//! notification subscriber gets its own unbounded queue so that every status
//! change reaches it, in order, with nothing coalesced.

use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::types::{SetupPhase, SetupSnapshot};

/// Status shown before anything has happened.
pub const INITIAL_STATUS: &str = "Ready for setup";

/// Fan-out point for status changes.
#[derive(Debug)]
pub struct StatusFeed {
    current: watch::Sender<SetupSnapshot>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFeed {
    /// Create a feed holding [`INITIAL_STATUS`] in the idle phase.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(SetupSnapshot {
            status: INITIAL_STATUS.to_string(),
            phase: SetupPhase::Idle,
            setup_complete: false,
        });
        Self {
            current,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Replace the snapshot and push its status to every subscriber.
    pub fn publish(&self, snapshot: SetupSnapshot) {
        let status = snapshot.status.clone();
        self.current.send_replace(snapshot);

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(status.clone()).is_ok());
        debug!(status = %status, subscribers = subscribers.len(), "Status update");
    }

    /// Replace the snapshot without notifying. For phase changes that keep
    /// the same status string.
    pub fn update_silently(&self, snapshot: SetupSnapshot) {
        self.current.send_replace(snapshot);
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SetupSnapshot {
        self.current.borrow().clone()
    }

    /// Latest status string.
    #[must_use]
    pub fn current_status(&self) -> String {
        self.current.borrow().status.clone()
    }

    /// Receive every subsequent status string in order.
    #[must_use]
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        StatusSubscription { rx }
    }
}

/// Ordered stream of status strings. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StatusSubscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl StatusSubscription {
    /// Next status, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next status if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued so far.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
