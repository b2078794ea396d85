use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

/// Per-session change counter. Every visible mutation bumps it so that
/// long-polling front-ends know when to refetch.
#[derive(Clone)]
pub struct UpdateFeed {
    tx: Arc<watch::Sender<u64>>,
}

impl UpdateFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|counter| *counter += 1);
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Waits until the counter moves past `since` or `max_wait` elapses and
    /// returns the counter at that point. A `since` ahead of the counter
    /// (a client that outlived a restart) is answered at once.
    pub async fn wait_past(&self, since: u64, max_wait: Duration) -> u64 {
        let current = self.current();
        if since > current {
            return current;
        }
        let mut rx = self.tx.subscribe();
        let _ = tokio::time::timeout(max_wait, rx.wait_for(|counter| *counter > since)).await;
        self.current()
    }
}

impl Default for UpdateFeed {
    fn default() -> Self {
        Self::new()
    }
}
