//! In-memory [`Transport`] whose failures are scripted by the test.
//!
//! Clones share state, so a test keeps one handle for inspection and hands
//! another to the reconnector or shipper.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transport::{ConnectionError, Transport};

/// Everything the transport was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connect,
    ConnectFailed,
    Write(Vec<u8>),
    WriteFailed(Vec<u8>),
    Flush,
    Close,
}

#[derive(Default)]
struct Script {
    events: Vec<TransportEvent>,
    connect_failures: Option<usize>,
    write_failures: usize,
    write_delay: Duration,
    open: bool,
}

/// Scripted transport for exercising reconnect and retry paths.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                connect_failures: Some(0),
                ..Script::default()
            })),
        }
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.script.lock().connect_failures = Some(n);
    }

    /// Fail every connection attempt from now on.
    pub fn fail_all_connects(&self) {
        self.script.lock().connect_failures = None;
    }

    /// Fail the next `n` writes, dropping the connection each time.
    pub fn fail_next_writes(&self, n: usize) {
        self.script.lock().write_failures += n;
    }

    /// Sleep before every successful write.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.script.lock().write_delay = delay;
        self
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.script.lock().events.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.script
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, TransportEvent::Connect | TransportEvent::ConnectFailed))
            .count()
    }

    /// Payloads of successful writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of every successfully written byte.
    pub fn written(&self) -> Vec<u8> {
        self.writes().concat()
    }

    /// Successful writes decoded as UTF-8 text.
    pub fn written_lines(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut script = self.script.lock();
        let fail = match script.connect_failures.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        };
        if fail {
            script.events.push(TransportEvent::ConnectFailed);
            script.open = false;
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted connect failure",
            )));
        }
        script.events.push(TransportEvent::Connect);
        script.open = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let delay = {
            let mut script = self.script.lock();
            if !script.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
            }
            if script.write_failures > 0 {
                script.write_failures -= 1;
                script.events.push(TransportEvent::WriteFailed(bytes.to_vec()));
                script.open = false;
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                ));
            }
            script.write_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.script
            .lock()
            .events
            .push(TransportEvent::Write(bytes.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.script.lock().events.push(TransportEvent::Flush);
        Ok(())
    }

    fn close(&mut self) {
        let mut script = self.script.lock();
        if script.open {
            script.events.push(TransportEvent::Close);
        }
        script.open = false;
    }

    fn is_open(&self) -> bool {
        self.script.lock().open
    }
}
