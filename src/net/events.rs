//! One-way invalidation channel from the API client to session listeners.
//!
//! DESIGN
//! ======
//! The API client publishes, the session store subscribes. Neither side holds
//! a reference to the other, so the two modules never import each other.

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;

use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped. A lagging
/// subscriber still learns that it missed something.
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// The backend rejected the current credential with HTTP 401.
    Unauthorized,
}

/// Cloneable publisher handle. Clones share one channel.
#[derive(Debug, Clone)]
pub struct AuthEvents {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Receive every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`, returning how many subscribers it reached. Having no
    /// subscribers is not an error.
    pub fn publish(&self, event: AuthEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}
