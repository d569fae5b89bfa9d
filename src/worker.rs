//! Worker thread driving collector I/O.
//!
//! The worker is the only code that touches the transport. It connects once
//! on start, then pulls lines from the [`DeliveryQueue`], frames them and
//! writes them through the [`Reconnector`]. A failed write reconnects and
//! resends the same frame before the next line is taken. The loop ends only
//! when shutdown is requested; lines still queued at that point are not
//! sent.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::warn;

use crate::diagnostics::{Diagnostics, while_emitting};
use crate::queue::DeliveryQueue;
use crate::reconnector::Reconnector;
use crate::shutdown::{Cancelled, ShutdownSignal};
use crate::transport::Transport;

/// Name given to the background thread.
pub const WORKER_THREAD_NAME: &str = "femtoshipper-worker";

/// Lifecycle of the shipper's worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkerState {
    #[default]
    NotStarted,
    Running,
    /// Terminal; the worker never restarts.
    Interrupted,
}

/// The single consumer of a delivery queue.
pub struct ShipperWorker<T: Transport> {
    queue: Arc<DeliveryQueue>,
    reconnector: Reconnector<T>,
    shutdown: ShutdownSignal,
    immediate_flush: bool,
    diagnostics: Diagnostics,
}

impl<T: Transport> ShipperWorker<T> {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        reconnector: Reconnector<T>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            queue,
            reconnector,
            shutdown,
            immediate_flush: false,
            diagnostics: Diagnostics::disabled(),
        }
    }

    /// Flush the stream after every frame.
    pub fn with_immediate_flush(mut self, immediate_flush: bool) -> Self {
        self.immediate_flush = immediate_flush;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Run until shutdown is requested.
    pub fn run(mut self) {
        if self.reconnector.ensure_connected().is_ok() {
            while self.ship_next().is_ok() {}
        }
        self.reconnector.close();
        self.diagnostics.emit("Asynchronous socket client interrupted");
    }

    fn ship_next(&mut self) -> Result<(), Cancelled> {
        let line = self.queue.dequeue(&self.shutdown)?;
        let frame = self.reconnector.framing().frame(&line);
        self.send(&frame)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), Cancelled> {
        loop {
            self.shutdown.check()?;
            match self.reconnector.write_frame(frame, self.immediate_flush) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    while_emitting(|| warn!("FemtoShipper write failed: {err}"));
                    self.diagnostics.emit_with(|| format!("Connection lost, reconnecting: {err}"));
                    self.reconnector.ensure_connected()?;
                }
            }
        }
    }
}

impl<T: Transport + 'static> ShipperWorker<T> {
    /// Run the worker on a dedicated, named thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let (done_tx, done_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let _done: Sender<()> = done_tx;
                self.run();
            })?;
        Ok(WorkerHandle {
            handle,
            done: done_rx,
        })
    }
}

/// Join handle for a spawned worker.
pub struct WorkerHandle {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the worker thread to exit.
    ///
    /// Returns the handle back when the worker is still running.
    pub fn join_timeout(self, timeout: Duration) -> Result<(), Self> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if self.handle.join().is_err() {
                    while_emitting(|| warn!("FemtoShipper: worker thread panicked"));
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffState;
    use crate::config::BackoffPolicy;
    use crate::framing::FramingStrategy;
    use crate::log_line::LogLine;
    use crate::test_utils::{CollectingDiagnostics, ScriptedTransport, TransportEvent};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        queue: Arc<DeliveryQueue>,
        transport: ScriptedTransport,
        shutdown: ShutdownSignal,
    }

    impl Harness {
        fn new(transport: ScriptedTransport) -> Self {
            Self {
                queue: Arc::new(DeliveryQueue::new(64)),
                transport,
                shutdown: ShutdownSignal::new(),
            }
        }

        fn worker(&self, framing: FramingStrategy) -> ShipperWorker<ScriptedTransport> {
            let reconnector = Reconnector::with_backoff(
                self.transport.clone(),
                framing,
                BackoffState::seeded(
                    BackoffPolicy {
                        min_delay: Duration::from_millis(1),
                        max_delay: Duration::from_millis(4),
                    },
                    11,
                ),
                self.shutdown.clone(),
            );
            ShipperWorker::new(Arc::clone(&self.queue), reconnector, self.shutdown.clone())
        }

        fn enqueue(&self, lines: &[&str]) {
            for line in lines {
                self.queue.enqueue(LogLine::new(line));
            }
        }

        fn wait_for_writes(&self, count: usize) {
            let deadline = Instant::now() + WAIT;
            while self.transport.writes().len() < count {
                assert!(Instant::now() < deadline, "timed out waiting for {count} writes");
                thread::sleep(Duration::from_millis(2));
            }
        }

        fn stop(&self, handle: WorkerHandle) {
            self.shutdown.cancel();
            assert!(handle.join_timeout(WAIT).is_ok(), "worker did not stop");
        }
    }

    fn token() -> FramingStrategy {
        FramingStrategy::Token { token: "T".into() }
    }

    #[test]
    fn ships_lines_in_order() {
        let h = Harness::new(ScriptedTransport::new());
        h.enqueue(&["one", "two", "three"]);
        let handle = h.worker(token()).spawn().expect("spawn worker");
        h.wait_for_writes(3);
        h.stop(handle);
        assert_eq!(h.transport.written_lines(), vec!["Tone\n", "Ttwo\n", "Tthree\n"]);
    }

    #[test]
    fn http_put_header_is_written_first() {
        let h = Harness::new(ScriptedTransport::new());
        h.enqueue(&["hello"]);
        let framing = FramingStrategy::HttpPut {
            account_key: "K".into(),
            location: "L".into(),
        };
        let handle = h.worker(framing).spawn().expect("spawn worker");
        h.wait_for_writes(2);
        h.stop(handle);
        assert_eq!(
            h.transport.written_lines(),
            vec!["PUT /K/hosts/L/?realtime=1 HTTP/1.1\r\n\r\n", "hello\n"]
        );
    }

    #[test]
    fn write_failure_resends_same_line_once() {
        let h = Harness::new(ScriptedTransport::new());
        h.enqueue(&["a"]);
        let handle = h.worker(token()).spawn().expect("spawn worker");
        h.wait_for_writes(1);

        h.transport.fail_next_writes(1);
        h.enqueue(&["b", "c"]);
        h.wait_for_writes(3);
        h.stop(handle);

        assert_eq!(h.transport.written_lines(), vec!["Ta\n", "Tb\n", "Tc\n"]);
        let events = h.transport.events();
        let failed = events
            .iter()
            .filter(|e| matches!(e, TransportEvent::WriteFailed(b) if b == b"Tb\n"))
            .count();
        assert_eq!(failed, 1);
        assert_eq!(h.transport.connect_attempts(), 2);
    }

    #[test]
    fn initial_connect_failures_do_not_lose_queued_lines() {
        let transport = ScriptedTransport::new();
        transport.fail_next_connects(5);
        let h = Harness::new(transport);
        h.enqueue(&["x", "y"]);
        let handle = h.worker(token()).spawn().expect("spawn worker");
        h.wait_for_writes(2);
        h.stop(handle);
        assert_eq!(h.transport.written_lines(), vec!["Tx\n", "Ty\n"]);
        assert_eq!(h.transport.connect_attempts(), 6);
    }

    #[test]
    fn immediate_flush_flushes_each_frame() {
        let h = Harness::new(ScriptedTransport::new());
        h.enqueue(&["f"]);
        let handle = h
            .worker(token())
            .with_immediate_flush(true)
            .spawn()
            .expect("spawn worker");
        h.wait_for_writes(1);
        h.stop(handle);
        let events = h.transport.events();
        let write_at = events
            .iter()
            .position(|e| matches!(e, TransportEvent::Write(_)))
            .expect("write recorded");
        assert_eq!(events.get(write_at + 1), Some(&TransportEvent::Flush));
    }

    #[test]
    fn shutdown_stops_writes_without_draining() {
        let transport = ScriptedTransport::new().with_write_delay(Duration::from_millis(20));
        let h = Harness::new(transport);
        let lines: Vec<String> = (0..50).map(|n| format!("line-{n}")).collect();
        for line in &lines {
            h.queue.enqueue(LogLine::new(line));
        }
        let handle = h.worker(token()).spawn().expect("spawn worker");
        h.wait_for_writes(1);

        let start = Instant::now();
        h.stop(handle);
        assert!(start.elapsed() < Duration::from_secs(1));

        let written = h.transport.writes().len();
        assert!(written < lines.len(), "queue should not be drained");
        assert!(!h.queue.is_empty());
        thread::sleep(Duration::from_millis(60));
        assert_eq!(h.transport.writes().len(), written);
        assert_eq!(h.transport.events().last(), Some(&TransportEvent::Close));
    }

    #[test]
    fn shutdown_during_backoff_ends_worker() {
        let transport = ScriptedTransport::new();
        transport.fail_all_connects();
        let h = Harness::new(transport);
        let diagnostics = CollectingDiagnostics::new();
        let handle = h
            .worker(token())
            .with_diagnostics(diagnostics.diagnostics())
            .spawn()
            .expect("spawn worker");
        thread::sleep(Duration::from_millis(30));
        h.stop(handle);
        assert!(h.transport.writes().is_empty());
        assert!(diagnostics.contains("interrupted"));
    }

    /// Reports the name of the thread that first connects it.
    struct ThreadNameRecorder {
        names: Sender<Option<String>>,
        inner: ScriptedTransport,
    }

    impl Transport for ThreadNameRecorder {
        fn connect(&mut self) -> Result<(), crate::transport::ConnectionError> {
            let _ = self
                .names
                .try_send(thread::current().name().map(str::to_owned));
            self.inner.connect()
        }

        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.inner.write(bytes)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }

        fn close(&mut self) {
            self.inner.close();
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    #[test]
    fn worker_thread_is_named() {
        let (names_tx, names_rx) = bounded(1);
        let shutdown = ShutdownSignal::new();
        let reconnector = Reconnector::new(
            ThreadNameRecorder {
                names: names_tx,
                inner: ScriptedTransport::new(),
            },
            token(),
            BackoffPolicy::default(),
            shutdown.clone(),
        );
        let queue = Arc::new(DeliveryQueue::new(4));
        let handle = ShipperWorker::new(queue, reconnector, shutdown.clone())
            .spawn()
            .expect("spawn worker");
        let name = names_rx.recv_timeout(WAIT).expect("worker connected");
        shutdown.cancel();
        assert!(handle.join_timeout(WAIT).is_ok());
        assert_eq!(name.as_deref(), Some(WORKER_THREAD_NAME));
    }
}
