//! Cancellation token threaded through every async call path.
//!
//! Built on `tokio::sync::watch`: one [`CancelHandle`] flips the flag, any
//! number of cloned [`CancelToken`]s observe it. Dropping the handle counts
//! as cancellation so engine shutdown stops workers without an explicit
//! broadcast.

use tokio::sync::watch;

/// Create a linked handle/token pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Sending half; owned by the engine (or a test).
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing half; cheap to clone.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Non-blocking check used between suspension points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested (or the handle is dropped).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A token that never fires, for tests and fire-and-forget jobs.
    #[must_use]
    pub fn never() -> Self {
        static KEEPALIVE: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        let tx = KEEPALIVE.get_or_init(|| watch::channel(false).0);
        Self { rx: tx.subscribe() }
    }
}
