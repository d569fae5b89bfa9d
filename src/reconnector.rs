//! Connection state machine with unbounded, jittered reconnection.

use std::io;

use log::warn;

use crate::backoff::BackoffState;
use crate::config::BackoffPolicy;
use crate::diagnostics::Diagnostics;
use crate::framing::FramingStrategy;
use crate::rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
use crate::shutdown::{Cancelled, ShutdownSignal};
use crate::transport::{ConnectionError, Transport};

/// Lifecycle of the single live connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Wraps a [`Transport`] and keeps it connected.
///
/// Connect failures are retried forever with exponential backoff; only a
/// shutdown request stops the loop. Every successful connect writes the
/// framing handshake before the connection is considered usable.
pub struct Reconnector<T: Transport> {
    transport: T,
    framing: FramingStrategy,
    backoff: BackoffState,
    state: ConnectionState,
    shutdown: ShutdownSignal,
    diagnostics: Diagnostics,
    warner: RateLimitedWarner,
}

impl<T: Transport> Reconnector<T> {
    pub fn new(
        transport: T,
        framing: FramingStrategy,
        policy: BackoffPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self::with_backoff(transport, framing, BackoffState::new(policy), shutdown)
    }

    pub fn with_backoff(
        transport: T,
        framing: FramingStrategy,
        backoff: BackoffState,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            transport,
            framing,
            backoff,
            state: ConnectionState::Disconnected,
            shutdown,
            diagnostics: Diagnostics::disabled(),
            warner: RateLimitedWarner::new(DEFAULT_WARN_INTERVAL),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_warner(mut self, warner: RateLimitedWarner) -> Self {
        self.warner = warner;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn framing(&self) -> &FramingStrategy {
        &self.framing
    }

    /// Make sure a connection is open, retrying until one is or shutdown is
    /// requested.
    pub fn ensure_connected(&mut self) -> Result<(), Cancelled> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.transport.close();
        self.state = ConnectionState::Connecting;
        loop {
            self.shutdown.check()?;
            match self.try_connect() {
                Ok(()) => {
                    self.backoff.reset();
                    self.state = ConnectionState::Connected;
                    self.warner.flush(|count| {
                        warn!("FemtoShipper reconnected after {count} failed attempts");
                    });
                    self.diagnostics.emit("Connected to collector");
                    return Ok(());
                }
                Err(err) => {
                    self.transport.close();
                    self.state = ConnectionState::Connecting;
                    self.diagnostics.emit_with(|| format!("Unable to connect to collector: {err}"));
                    self.warner.record_drop();
                    self.warner.warn_if_due(|count| {
                        warn!("FemtoShipper failed to connect {count} times; last error: {err}");
                    });
                }
            }
            let delay = self.backoff.next_sleep();
            self.shutdown.sleep(delay)?;
        }
    }

    fn try_connect(&mut self) -> Result<(), ConnectionError> {
        self.transport.connect()?;
        if let Some(handshake) = self.framing.handshake() {
            self.transport.write(&handshake)?;
        }
        Ok(())
    }

    /// Write one frame; a failure marks the connection as lost.
    pub fn write_frame(&mut self, frame: &[u8], flush: bool) -> io::Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "collector connection is not established",
            ));
        }
        let result = self.transport.write(frame).and_then(|()| {
            if flush {
                self.transport.flush()
            } else {
                Ok(())
            }
        });
        if result.is_err() {
            self.state = ConnectionState::Disconnected;
        }
        result
    }

    /// Close the live connection, if any.
    pub fn close(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
    }
}

impl<T: Transport> std::fmt::Debug for Reconnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconnector")
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
