use std::sync::atomic::{AtomicIsize, Ordering};

use tokio_util::sync::CancellationToken;

/// Tracks outstanding published events for one sync cycle.
///
/// [`add`](Self::add) is called before each publish, the pipeline's ack
/// callback calls [`ack`](Self::ack), and the cycle blocks in
/// [`wait`](Self::wait) until every published event has been acknowledged or
/// the parent token is cancelled (shutdown).
pub struct TxTracker {
    pending: AtomicIsize,
    token: CancellationToken,
}

impl TxTracker {
    /// Creates a tracker whose wait is also released by cancellation of
    /// `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            pending: AtomicIsize::new(0),
            token: parent.child_token(),
        }
    }

    pub fn add(&self) {
        let _ = self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn ack(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.token.cancel();
        }
    }

    /// Blocks until every `add` has a matching `ack`, or until the parent
    /// token is cancelled. Returns immediately when nothing is pending.
    pub async fn wait(&self) {
        if self.pending.load(Ordering::SeqCst) == 0 {
            self.token.cancel();
        }

        self.token.cancelled().await;
    }

    pub fn pending(&self) -> isize {
        self.pending.load(Ordering::SeqCst)
    }
}
