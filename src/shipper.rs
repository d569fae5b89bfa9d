//! Public shipper type exported by the crate.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{Mode, ShipperConfig};
use crate::config_source::{ConfigSource, EnvSource};
use crate::credentials::{CredentialError, CredentialValidator, Credentials};
use crate::diagnostics::{Diagnostics, is_emitting, while_emitting};
use crate::framing::FramingStrategy;
use crate::log_line::LogLine;
use crate::queue::{Admission, DeliveryQueue};
use crate::rate_limited_warner::RateLimitedWarner;
use crate::reconnector::Reconnector;
use crate::shutdown::ShutdownSignal;
use crate::transport::{TcpTransport, Transport};
use crate::worker::{ShipperWorker, WorkerHandle, WorkerState};

/// Produces the transport the worker connects through.
pub type TransportFactory = Arc<dyn Fn(&ShipperConfig) -> Box<dyn Transport> + Send + Sync>;

/// Factory returning a [`TcpTransport`] for the configured endpoint.
pub fn tcp_transport_factory() -> TransportFactory {
    Arc::new(|config: &ShipperConfig| {
        Box::new(TcpTransport::with_connect_timeout(
            config.endpoint(),
            config.connect_timeout,
        )) as Box<dyn Transport>
    })
}

/// Errors raised while starting a shipper.
#[derive(Debug, Error)]
pub enum ShipperError {
    #[error(transparent)]
    InvalidCredentials(#[from] CredentialError),
    #[error("shipper has been shut down")]
    Shutdown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Hooks a logging framework drives a sink through.
pub trait RecordSink: Send + Sync {
    /// Accept one formatted record.
    fn on_record(&self, line: &str);

    /// Called when the framework activates the sink.
    fn on_start(&self) -> Result<(), ShipperError> {
        Ok(())
    }

    /// Called when the framework deactivates the sink.
    fn on_stop(&self) {}
}

#[derive(Default)]
struct Lifecycle {
    state: WorkerState,
    worker: Option<WorkerHandle>,
}

/// Ships formatted log lines to a Logentries-style collector.
///
/// Producers enqueue lines from any thread; a single background worker owns
/// the connection. Dropping the shipper requests shutdown without waiting
/// for the worker.
pub struct FemtoShipper {
    config: ShipperConfig,
    queue: Arc<DeliveryQueue>,
    validator: CredentialValidator,
    credentials: Mutex<Option<Credentials>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: ShutdownSignal,
    transport_factory: TransportFactory,
    diagnostics: Diagnostics,
}

impl FemtoShipper {
    /// Construct a shipper reading fallback credentials from the
    /// environment and connecting over TCP.
    pub fn with_config(config: ShipperConfig) -> Self {
        let diagnostics = Diagnostics::to_log(config.debug);
        Self::assemble(
            config,
            Arc::new(EnvSource),
            tcp_transport_factory(),
            diagnostics,
        )
    }

    pub(crate) fn assemble(
        config: ShipperConfig,
        source: Arc<dyn ConfigSource>,
        transport_factory: TransportFactory,
        diagnostics: Diagnostics,
    ) -> Self {
        let queue = Arc::new(DeliveryQueue::with_diagnostics(
            config.capacity,
            config.warn_interval,
            diagnostics.clone(),
        ));
        Self {
            config,
            queue,
            validator: CredentialValidator::new(source),
            credentials: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown: ShutdownSignal::new(),
            transport_factory,
            diagnostics,
        }
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state
    }

    /// Normalise `line` and admit it to the queue.
    ///
    /// Never blocks; when the queue is full the oldest line is evicted.
    /// Lines logged by the shipper's own warnings or diagnostics are
    /// [`Admission::Suppressed`], so a `log` backend forwarding into the
    /// shipper cannot feed it its own output.
    pub fn enqueue(&self, line: &str) -> Admission {
        if is_emitting() {
            return Admission::Suppressed;
        }
        self.queue.enqueue(LogLine::new(line))
    }

    /// Validate credentials and spawn the worker.
    ///
    /// Calling `start` on a running shipper does nothing.
    pub fn start(&self) -> Result<(), ShipperError> {
        if let Some(settled) = settled(self.state()) {
            return settled;
        }
        // Resolved without the lifecycle lock: a failure is reported to the
        // diagnostic sink, which may call back into the shipper.
        let credentials = self.credentials()?;
        {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(settled) = settled(lifecycle.state) {
                return settled;
            }
            let handle = self
                .worker_for(&credentials)
                .spawn()
                .map_err(ShipperError::Spawn)?;
            lifecycle.worker = Some(handle);
            lifecycle.state = WorkerState::Running;
        }
        self.diagnostics.emit("Starting Logentries asynchronous socket client");
        Ok(())
    }

    fn worker_for(&self, credentials: &Credentials) -> ShipperWorker<Box<dyn Transport>> {
        let transport = (self.transport_factory)(&self.config);
        let reconnector = Reconnector::new(
            transport,
            FramingStrategy::from(credentials),
            self.config.backoff.clone(),
            self.shutdown.clone(),
        )
        .with_diagnostics(self.diagnostics.clone())
        .with_warner(RateLimitedWarner::new(self.config.warn_interval));
        ShipperWorker::new(
            Arc::clone(&self.queue),
            reconnector,
            self.shutdown.clone(),
        )
        .with_immediate_flush(self.config.immediate_flush)
        .with_diagnostics(self.diagnostics.clone())
    }

    /// Ask the worker to stop and return immediately.
    ///
    /// Lines still queued are abandoned. The shipper cannot be restarted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let previous =
            std::mem::replace(&mut self.lifecycle.lock().state, WorkerState::Interrupted);
        if previous != WorkerState::Interrupted {
            self.diagnostics.emit("Shutting down asynchronous socket client");
        }
    }

    /// Wait up to `timeout` for the worker thread to exit.
    ///
    /// Returns `true` when no worker is running any more.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let Some(handle) = self.lifecycle.lock().worker.take() else {
            return true;
        };
        match handle.join_timeout(timeout) {
            Ok(()) => true,
            Err(handle) => {
                self.lifecycle.lock().worker = Some(handle);
                false
            }
        }
    }

    /// Whether usable credentials can be resolved.
    pub fn validate_credentials(&self) -> bool {
        self.credentials().is_ok()
    }

    fn credentials(&self) -> Result<Credentials, CredentialError> {
        let resolved = {
            let mut cached = self.credentials.lock();
            if let Some(credentials) = cached.as_ref() {
                return Ok(credentials.clone());
            }
            let configured = match self.config.mode {
                Mode::Token => &self.config.token,
                Mode::HttpPut => &self.config.account_key,
            };
            let resolved = self
                .validator
                .resolve(self.config.mode, configured, &self.config.location);
            if let Ok(credentials) = &resolved {
                *cached = Some(credentials.clone());
            }
            resolved
        };
        if let Err(err) = &resolved {
            self.diagnostics.emit(&err.to_string());
        }
        resolved
    }
}

/// Outcome of `start` when the lifecycle has already moved on.
fn settled(state: WorkerState) -> Option<Result<(), ShipperError>> {
    match state {
        WorkerState::Running => Some(Ok(())),
        WorkerState::Interrupted => Some(Err(ShipperError::Shutdown)),
        WorkerState::NotStarted => None,
    }
}

impl RecordSink for FemtoShipper {
    /// Start lazily once credentials check out; the line is queued either
    /// way. Records produced by the shipper's own output are ignored.
    fn on_record(&self, line: &str) {
        if is_emitting() {
            return;
        }
        if self.state() == WorkerState::NotStarted && self.validate_credentials() {
            if let Err(err) = self.start() {
                while_emitting(|| warn!("FemtoShipper failed to start: {err}"));
            }
        }
        self.enqueue(line);
    }

    fn on_start(&self) -> Result<(), ShipperError> {
        self.start()
    }

    fn on_stop(&self) {
        self.shutdown();
    }
}

impl Drop for FemtoShipper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for FemtoShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FemtoShipper")
            .field("mode", &self.config.mode)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
