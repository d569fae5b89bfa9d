//! Optional diagnostics channel for human-readable shipper messages.
//!
//! Diagnostics report connection attempts, queue overflow, credential
//! failures and worker lifecycle events. They are only produced when the
//! shipper runs with `debug` enabled and never influence control flow.

use std::cell::Cell;
use std::sync::Arc;

/// Prefix carried by every diagnostic message.
pub const DIAGNOSTIC_PREFIX: &str = "LE: ";

thread_local! {
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside the shipper's own warning or
/// diagnostic output.
///
/// A `log` backend that forwards records to a shipper sees that output
/// again; the shipper ignores records produced while this is set.
pub fn is_emitting() -> bool {
    EMITTING.with(Cell::get)
}

/// Run `f` with the current thread marked as emitting shipper output.
pub(crate) fn while_emitting<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            EMITTING.with(|flag| flag.set(self.0));
        }
    }

    let _restore = Restore(EMITTING.with(|flag| flag.replace(true)));
    f()
}

/// Receiver for diagnostic messages.
pub trait DiagnosticSink: Send + Sync {
    fn debug(&self, message: &str);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn debug(&self, message: &str) {
        self(message)
    }
}

/// Sink forwarding diagnostics to the `log` facade at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn debug(&self, message: &str) {
        log::debug!("{message}");
    }
}

/// Cheaply cloneable handle shared by the shipper components.
#[derive(Clone)]
pub struct Diagnostics {
    enabled: bool,
    sink: Arc<dyn DiagnosticSink>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Diagnostics {
    pub fn new(enabled: bool, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { enabled, sink }
    }

    /// Diagnostics routed to `log::debug!`.
    pub fn to_log(enabled: bool) -> Self {
        Self::new(enabled, Arc::new(LogDiagnostics))
    }

    pub fn disabled() -> Self {
        Self::to_log(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn emit(&self, message: &str) {
        if self.enabled {
            let message = format!("{DIAGNOSTIC_PREFIX}{message}");
            while_emitting(|| self.sink.debug(&message));
        }
    }

    /// Emit a lazily formatted message; `message` only runs when enabled.
    pub fn emit_with(&self, message: impl FnOnce() -> String) {
        if self.enabled {
            self.emit(&message());
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting() -> (Arc<Mutex<Vec<String>>>, Arc<dyn DiagnosticSink>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&messages);
        let sink: Arc<dyn DiagnosticSink> =
            Arc::new(move |msg: &str| captured.lock().push(msg.to_owned()));
        (messages, sink)
    }

    #[test]
    fn prefixes_messages() {
        let (messages, sink) = collecting();
        Diagnostics::new(true, sink).emit("Unable to connect");
        assert_eq!(*messages.lock(), vec!["LE: Unable to connect".to_owned()]);
    }

    #[test]
    fn disabled_sink_skips_formatting() {
        let (messages, sink) = collecting();
        let diagnostics = Diagnostics::new(false, sink);
        diagnostics.emit_with(|| panic!("must not format when disabled"));
        diagnostics.emit("ignored");
        assert!(messages.lock().is_empty());
    }

    #[test]
    fn sink_runs_while_emitting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: Arc<dyn DiagnosticSink> =
            Arc::new(move |_: &str| captured.lock().push(is_emitting()));
        assert!(!is_emitting());
        Diagnostics::new(true, sink).emit("inside");
        assert_eq!(*seen.lock(), vec![true]);
        assert!(!is_emitting());
    }

    #[test]
    fn nested_emission_restores_outer_flag() {
        while_emitting(|| {
            while_emitting(|| assert!(is_emitting()));
            assert!(is_emitting());
        });
        assert!(!is_emitting());
    }
}
