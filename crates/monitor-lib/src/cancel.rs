//! Cooperative cancellation passed through every adapter call
//!
//! Each investigation gets its own token pair; cancelling the handle wakes
//! every pending `cancelled()` future so in-flight adapter calls can bail
//! out promptly.

use tokio::sync::watch;

/// Owner side of a cancellation pair
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side, cloned into tasks and adapter calls
#[derive(Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that can never be cancelled, for startup paths and tests
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.rx {
            Some(rx) => *rx.borrow(),
            None => false,
        }
    }

    /// Resolves once the handle fires. Pending forever for `never()` tokens.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            // Sender dropped without cancelling means the owner is gone;
            // treat the investigation as abandoned.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Create a linked handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}
