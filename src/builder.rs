//! Builder for [`FemtoShipper`].
//!
//! Exposes credential selection, collector addressing, TLS material, queue
//! sizing and backoff tuning. Every numeric override is validated before a
//! shipper is constructed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use native_tls::Certificate;
use thiserror::Error;

use crate::config::{BackoffPolicy, Mode, Ports, ShipperConfig};
use crate::config_source::{ConfigSource, EnvSource};
use crate::diagnostics::{DiagnosticSink, Diagnostics, LogDiagnostics};
use crate::queue::QueueRegistry;
use crate::shipper::{FemtoShipper, TransportFactory, tcp_transport_factory};

/// Errors raised while validating builder settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid shipper configuration: {0}")]
    InvalidConfig(String),
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

#[derive(Clone, Debug)]
enum CertificateSource {
    Pem(Vec<u8>),
    File(PathBuf),
}

impl CertificateSource {
    fn load(&self, field: &str) -> Result<Vec<u8>, BuildError> {
        match self {
            CertificateSource::Pem(bytes) => Ok(bytes.clone()),
            CertificateSource::File(path) => read_file(path, field),
        }
    }
}

fn read_file(path: &Path, field: &str) -> Result<Vec<u8>, BuildError> {
    fs::read(path).map_err(|err| {
        BuildError::InvalidConfig(format!("{field} {} is unreadable: {err}", path.display()))
    })
}

/// Builder for constructing [`FemtoShipper`] instances.
#[derive(Clone, Default)]
pub struct ShipperBuilder {
    mode: Option<Mode>,
    token: Option<String>,
    account_key: Option<String>,
    location: Option<String>,
    use_tls: Option<bool>,
    immediate_flush: Option<bool>,
    capacity: Option<usize>,
    min_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    host: Option<String>,
    ports: Option<Ports>,
    tls_domain: Option<String>,
    root_certificate: Option<CertificateSource>,
    pinned_certificate: Option<PathBuf>,
    connect_timeout_ms: Option<u64>,
    warn_interval_ms: Option<u64>,
    debug: Option<bool>,
    diagnostic_sink: Option<Arc<dyn DiagnosticSink>>,
    config_source: Option<Arc<dyn ConfigSource>>,
    transport_factory: Option<TransportFactory>,
    registry: Option<Arc<QueueRegistry>>,
}

impl ShipperBuilder {
    /// Create a builder using token mode and default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identify with a log token; every line is prefixed with it.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.mode = Some(Mode::Token);
        self.token = Some(token.into());
        self
    }

    /// Identify with an account key and host location over HTTP PUT.
    pub fn with_http_put(
        mut self,
        account_key: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        self.mode = Some(Mode::HttpPut);
        self.account_key = Some(account_key.into());
        self.location = Some(location.into());
        self
    }

    option_setter!(
        #[doc = "Connect over TLS."]
        with_tls,
        use_tls,
        bool
    );
    option_setter!(
        #[doc = "Flush the stream after every line."]
        with_immediate_flush,
        immediate_flush,
        bool
    );
    option_setter!(
        #[doc = "Set the bounded queue capacity."]
        with_capacity,
        capacity,
        usize
    );
    option_setter!(with_min_backoff_ms, min_backoff_ms, u64);
    option_setter!(with_max_backoff_ms, max_backoff_ms, u64);
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(
        #[doc = "Interval between repeated warnings of the same kind."]
        with_warn_interval_ms,
        warn_interval_ms,
        u64
    );
    option_setter!(
        #[doc = "Emit diagnostics for connection and queue activity."]
        with_debug,
        debug,
        bool
    );
    option_setter!(with_ports, ports, Ports);

    /// Override the collector host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Identity the collector's certificate must be valid for.
    pub fn with_tls_domain(mut self, domain: impl Into<String>) -> Self {
        self.tls_domain = Some(domain.into());
        self
    }

    /// Trust an additional PEM-encoded root certificate.
    pub fn with_root_certificate_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.root_certificate = Some(CertificateSource::Pem(pem.into()));
        self
    }

    /// Trust an additional root certificate read from a PEM file at build
    /// time.
    pub fn with_root_certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_certificate = Some(CertificateSource::File(path.into()));
        self
    }

    /// Require the collector to present exactly the DER certificate stored
    /// at `path`.
    pub fn with_pinned_certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pinned_certificate = Some(path.into());
        self
    }

    /// Route diagnostics to `sink` instead of `log::debug!`.
    pub fn with_diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostic_sink = Some(sink);
        self
    }

    /// Source consulted for fallback credentials; defaults to the
    /// environment.
    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Register the shipper's queue with `registry` when built.
    pub fn with_registry(mut self, registry: Arc<QueueRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        self.validate_capacity()?;
        self.validate_backoff()?;
        self.validate_timeouts()?;
        self.validate_host()?;
        Ok(())
    }

    fn validate_capacity(&self) -> Result<(), BuildError> {
        if let Some(capacity) = self.capacity {
            ensure_positive!(capacity, "capacity")?;
        }
        Ok(())
    }

    fn validate_backoff(&self) -> Result<(), BuildError> {
        if let Some(min) = self.min_backoff_ms {
            ensure_positive!(min, "min_backoff_ms")?;
        }
        if let Some(max) = self.max_backoff_ms {
            ensure_positive!(max, "max_backoff_ms")?;
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<(), BuildError> {
        if let Some(timeout) = self.connect_timeout_ms {
            ensure_positive!(timeout, "connect_timeout_ms")?;
        }
        if let Some(interval) = self.warn_interval_ms {
            ensure_positive!(interval, "warn_interval_ms")?;
        }
        Ok(())
    }

    fn validate_host(&self) -> Result<(), BuildError> {
        match &self.host {
            Some(host) if host.trim().is_empty() => Err(BuildError::InvalidConfig(
                "host must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Validate every override and produce the resulting configuration.
    pub fn build_config(&self) -> Result<ShipperConfig, BuildError> {
        self.validate()?;
        let mut config = ShipperConfig::default();
        self.apply_credentials(&mut config);
        self.apply_optional_fields(&mut config);
        self.apply_backoff(&mut config.backoff)?;
        self.apply_tls(&mut config)?;
        Ok(config)
    }

    fn apply_credentials(&self, config: &mut ShipperConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if let Some(key) = &self.account_key {
            config.account_key = key.clone();
        }
        if let Some(location) = &self.location {
            config.location = location.clone();
        }
    }

    fn apply_optional_fields(&self, config: &mut ShipperConfig) {
        if let Some(use_tls) = self.use_tls {
            config.use_tls = use_tls;
        }
        if let Some(flush) = self.immediate_flush {
            config.immediate_flush = flush;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(ports) = self.ports {
            config.ports = ports;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(timeout);
        }
        if let Some(interval) = self.warn_interval_ms {
            config.warn_interval = Duration::from_millis(interval);
        }
        if let Some(debug) = self.debug {
            config.debug = debug;
        }
    }

    fn apply_backoff(&self, policy: &mut BackoffPolicy) -> Result<(), BuildError> {
        if let Some(min) = self.min_backoff_ms {
            policy.min_delay = Duration::from_millis(min);
        }
        if let Some(max) = self.max_backoff_ms {
            policy.max_delay = Duration::from_millis(max);
        }
        if policy.max_delay < policy.min_delay {
            return Err(BuildError::InvalidConfig(format!(
                "max_backoff_ms ({}) must not be less than min_backoff_ms ({})",
                policy.max_delay.as_millis(),
                policy.min_delay.as_millis()
            )));
        }
        Ok(())
    }

    fn apply_tls(&self, config: &mut ShipperConfig) -> Result<(), BuildError> {
        if let Some(domain) = self.tls_domain.as_ref().filter(|d| !d.trim().is_empty()) {
            config.tls.domain = domain.clone();
        }
        if let Some(source) = &self.root_certificate {
            let pem = source.load("root certificate")?;
            Certificate::from_pem(&pem).map_err(|err| {
                BuildError::InvalidConfig(format!("root certificate is not valid PEM: {err}"))
            })?;
            config.tls.root_certificate = Some(pem);
        }
        if let Some(path) = &self.pinned_certificate {
            let der = read_file(path, "pinned certificate")?;
            Certificate::from_der(&der).map_err(|err| {
                BuildError::InvalidConfig(format!("pinned certificate is not valid DER: {err}"))
            })?;
            config.tls.pinned_certificate = Some(der);
        }
        Ok(())
    }

    /// Build the shipper. The worker is not started.
    pub fn build(&self) -> Result<FemtoShipper, BuildError> {
        let config = self.build_config()?;
        let diagnostics = match &self.diagnostic_sink {
            Some(sink) => Diagnostics::new(config.debug, Arc::clone(sink)),
            None => Diagnostics::new(config.debug, Arc::new(LogDiagnostics)),
        };
        let source = self
            .config_source
            .clone()
            .unwrap_or_else(|| Arc::new(EnvSource) as Arc<dyn ConfigSource>);
        let factory = self
            .transport_factory
            .clone()
            .unwrap_or_else(tcp_transport_factory);
        let shipper = FemtoShipper::assemble(config, source, factory, diagnostics);
        if let Some(registry) = &self.registry {
            registry.register(shipper.queue());
        }
        Ok(shipper)
    }
}

impl std::fmt::Debug for ShipperBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipperBuilder")
            .field("mode", &self.mode)
            .field("use_tls", &self.use_tls)
            .field("capacity", &self.capacity)
            .field("host", &self.host)
            .field("min_backoff_ms", &self.min_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .finish_non_exhaustive()
    }
}
