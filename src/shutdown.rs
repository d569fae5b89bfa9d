//! Cooperative cancellation observed at every worker suspension point.
//!
//! The signal is a zero-capacity channel that never carries a message:
//! cancelling drops the only sender, which disconnects every receiver. The
//! worker can therefore wait on the signal alongside the delivery queue with
//! `crossbeam_channel::select!` and sleep on it with `recv_timeout`.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use thiserror::Error;

/// The worker observed a shutdown request.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("shutdown requested")]
pub struct Cancelled;

/// Cloneable shutdown flag shared by the shipper and its worker.
#[derive(Clone)]
pub struct ShutdownSignal {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    observer: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            observer: rx,
        }
    }

    /// Request shutdown. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.observer.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Return `Err(Cancelled)` once shutdown has been requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early when shutdown is requested.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        match self.observer.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            Err(RecvTimeoutError::Disconnected) | Ok(()) => Err(Cancelled),
        }
    }

    /// Receiver that becomes ready (disconnected) on shutdown, for use in
    /// `crossbeam_channel::select!`.
    pub(crate) fn observer(&self) -> &Receiver<()> {
        &self.observer
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
