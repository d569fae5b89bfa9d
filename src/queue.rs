//! Bounded delivery queue with a drop-oldest admission policy.
//!
//! Producers call [`DeliveryQueue::enqueue`] from any thread; it never
//! blocks. When the queue is full the oldest entry is evicted to make room.
//! The single worker thread drains the queue with
//! [`DeliveryQueue::dequeue`], which blocks until a line arrives or shutdown
//! is requested.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use log::warn;
use parking_lot::Mutex;

use crate::diagnostics::Diagnostics;
use crate::log_line::LogLine;
use crate::rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
use crate::shutdown::{Cancelled, ShutdownSignal};

/// Outcome of a single admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Admitted without eviction.
    Accepted,
    /// The oldest entry was evicted to admit the line.
    EvictedOldest,
    /// The line could not be admitted and was dropped.
    Dropped,
    /// The line was produced by the shipper's own warnings or diagnostics
    /// and was not queued.
    Suppressed,
}

/// Bounded FIFO of pending log lines.
pub struct DeliveryQueue {
    tx: Sender<LogLine>,
    rx: Receiver<LogLine>,
    capacity: usize,
    evicted: RateLimitedWarner,
    dropped: RateLimitedWarner,
    diagnostics: Diagnostics,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` lines.
    ///
    /// A zero capacity is raised to one so the queue can always hold the
    /// most recent line.
    pub fn new(capacity: usize) -> Self {
        Self::with_diagnostics(capacity, DEFAULT_WARN_INTERVAL, Diagnostics::disabled())
    }

    pub fn with_diagnostics(
        capacity: usize,
        warn_interval: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            evicted: RateLimitedWarner::new(warn_interval),
            dropped: RateLimitedWarner::new(warn_interval),
            diagnostics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Admit `line`, evicting the oldest entry when full.
    ///
    /// Never blocks and never fails from the caller's point of view; the
    /// returned [`Admission`] only reports what happened.
    pub fn enqueue(&self, line: LogLine) -> Admission {
        self.diagnostics.emit_with(|| format!("Queueing {}", line.as_str()));
        let line = match self.tx.try_send(line) {
            Ok(()) => return Admission::Accepted,
            Err(TrySendError::Full(line)) => line,
            // The queue owns a receiver, so it cannot be disconnected.
            Err(TrySendError::Disconnected(_)) => return Admission::Dropped,
        };

        // The worker may have drained an entry since; evicting nothing is fine.
        let evicted = self.rx.try_recv().is_ok();
        self.readmit(line, evicted)
    }

    /// Second admission attempt after a possible eviction. Another producer
    /// may have taken the freed slot, in which case `line` is dropped.
    fn readmit(&self, line: LogLine, evicted: bool) -> Admission {
        match self.tx.try_send(line) {
            Ok(()) if evicted => {
                self.report_eviction();
                Admission::EvictedOldest
            }
            Ok(()) => Admission::Accepted,
            Err(_) => {
                if evicted {
                    self.report_eviction();
                }
                self.report_drop();
                Admission::Dropped
            }
        }
    }

    /// Block until a line is available or shutdown is requested.
    pub fn dequeue(&self, shutdown: &ShutdownSignal) -> Result<LogLine, Cancelled> {
        select! {
            recv(self.rx) -> line => line.map_err(|_| Cancelled),
            recv(shutdown.observer()) -> _ => Err(Cancelled),
        }
    }

    /// Remove and return a line if one is immediately available.
    pub fn try_dequeue(&self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    fn report_eviction(&self) {
        self.diagnostics.emit("Queue full, dropped the oldest line to admit a new one");
        self.evicted.record_drop();
        self.evicted.warn_if_due(|count| {
            warn!("FemtoShipper queue full; evicted {count} log lines");
        });
    }

    fn report_drop(&self) {
        self.diagnostics.emit("Queue overflow, dropped a line that could not be admitted");
        self.dropped.record_drop();
        self.dropped.warn_if_due(|count| {
            warn!("FemtoShipper queue overflow; dropped {count} log lines");
        });
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.evicted.flush(|count| {
            warn!("FemtoShipper queue full; evicted {count} log lines");
        });
        self.dropped.flush(|count| {
            warn!("FemtoShipper queue overflow; dropped {count} log lines");
        });
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Explicit registry of live queues for harnesses that need to observe
/// draining across shipper instances.
///
/// Queues are held weakly; dropped queues disappear from the registry.
/// A drained queue only means every line has been handed to a worker, not
/// that it reached the collector.
#[derive(Default)]
pub struct QueueRegistry {
    queues: Mutex<Vec<Weak<DeliveryQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: &Arc<DeliveryQueue>) {
        let mut queues = self.queues.lock();
        queues.retain(|q| q.strong_count() > 0);
        queues.push(Arc::downgrade(queue));
    }

    /// Number of queues still alive.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total lines waiting across every live queue.
    pub fn pending(&self) -> usize {
        self.live().iter().map(|q| q.len()).sum()
    }

    pub fn all_drained(&self) -> bool {
        self.pending() == 0
    }

    /// Poll until every live queue is empty or `timeout` elapses.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        const POLL_INTERVAL: Duration = Duration::from_millis(5);
        let deadline = Instant::now() + timeout;
        loop {
            if self.all_drained() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn live(&self) -> Vec<Arc<DeliveryQueue>> {
        self.queues.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.len())
            .field("pending", &self.pending())
            .finish()
    }
}
