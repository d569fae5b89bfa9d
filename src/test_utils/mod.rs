//! Test helpers shared by unit tests and, through the `test-util` feature,
//! by the integration tests in `tests/`.

pub mod collecting_diagnostics;
pub mod scripted_transport;

pub use collecting_diagnostics::CollectingDiagnostics;
pub use scripted_transport::{ScriptedTransport, TransportEvent};
