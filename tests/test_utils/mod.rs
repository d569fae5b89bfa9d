//! Shared helpers for integration tests.

pub mod collector;

pub use collector::{LoopbackCollector, Received};

use std::sync::Arc;

use femtoshipper::{NoSource, Ports, ShipperBuilder};

/// A syntactically valid log token.
pub const TOKEN: &str = "2bfbea1e-10c3-4419-bdad-7e6435882e1f";

/// Builder aimed at `collector` with fast reconnects and no fallback
/// credentials.
pub fn builder_for(collector: &LoopbackCollector) -> ShipperBuilder {
    let port = collector.port();
    ShipperBuilder::new()
        .with_host("127.0.0.1")
        .with_ports(Ports {
            token: port,
            token_tls: port,
            http_put: port,
            http_put_tls: port,
        })
        .with_min_backoff_ms(5)
        .with_max_backoff_ms(50)
        .with_connect_timeout_ms(1_000)
        .with_config_source(Arc::new(NoSource))
}
