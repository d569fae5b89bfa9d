//! Asynchronous log shipping to Logentries-style collectors.
//!
//! Producers hand formatted lines to a [`FemtoShipper`], which queues them
//! in a bounded drop-oldest [`DeliveryQueue`] and delivers them from one
//! background thread over TCP or TLS, reconnecting with jittered
//! exponential backoff whenever the collector goes away.

pub mod backoff;
pub mod builder;
pub mod config;
pub mod config_source;
pub mod credentials;
pub mod diagnostics;
pub mod framing;
pub mod log_line;
pub mod queue;
pub mod rate_limited_warner;
pub mod reconnector;
pub mod shipper;
pub mod shutdown;
pub mod transport;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use backoff::BackoffState;
pub use builder::{BuildError, ShipperBuilder};
pub use config::{BackoffPolicy, Mode, Ports, ShipperConfig};
pub use config_source::{ConfigSource, EnvSource, IniSource, MapSource, NoSource};
pub use credentials::{CredentialError, CredentialValidator, Credentials};
pub use diagnostics::{DiagnosticSink, Diagnostics, LogDiagnostics};
pub use framing::FramingStrategy;
pub use log_line::LogLine;
pub use queue::{Admission, DeliveryQueue, QueueRegistry};
pub use rate_limited_warner::RateLimitedWarner;
pub use reconnector::{ConnectionState, Reconnector};
pub use shipper::{FemtoShipper, RecordSink, ShipperError, TransportFactory};
pub use shutdown::{Cancelled, ShutdownSignal};
pub use transport::{ConnectionError, Endpoint, TcpTransport, TlsOptions, Transport};
pub use worker::{ShipperWorker, WorkerHandle, WorkerState};
