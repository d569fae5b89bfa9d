//! A diagnostic sink that accumulates messages in memory for test assertions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::diagnostics::{DiagnosticSink, Diagnostics};

/// Sink that stores every diagnostic it receives for later inspection.
#[derive(Clone, Default)]
pub struct CollectingDiagnostics {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CollectingDiagnostics {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled [`Diagnostics`] feeding this sink.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(true, Arc::new(self.clone()))
    }

    /// Return a snapshot of all messages received so far.
    pub fn collected(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Whether any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl DiagnosticSink for CollectingDiagnostics {
    fn debug(&self, message: &str) {
        self.messages.lock().push(message.to_owned());
    }
}
