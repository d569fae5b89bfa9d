//! Configuration structures consumed by the shipper lifecycle.
//!
//! [`ShipperBuilder`](crate::ShipperBuilder) constructs these values before
//! passing them to [`FemtoShipper`](crate::FemtoShipper) for runtime use.

use std::time::Duration;

use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;
use crate::transport::{Endpoint, TlsOptions};

/// Default bounded queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32768;
/// Default collector host.
pub const DEFAULT_HOST: &str = "api.logentries.com";
/// Identity the collector's TLS certificate must present.
pub const DEFAULT_TLS_DOMAIN: &str = "logentries.com";
/// Port accepting token-prefixed lines.
pub const DEFAULT_TOKEN_PORT: u16 = 10000;
/// Port accepting token-prefixed lines over TLS.
pub const DEFAULT_TOKEN_TLS_PORT: u16 = 20000;
/// Port accepting HTTP PUT streams.
pub const DEFAULT_HTTP_PUT_PORT: u16 = 80;
/// Port accepting HTTP PUT streams over TLS.
pub const DEFAULT_HTTP_PUT_TLS_PORT: u16 = 443;
/// Default connection timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Minimum delay between reconnection attempts.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(100);
/// Maximum delay between reconnection attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Identification scheme, fixed for the lifetime of a shipper.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Every line is prefixed with the log token.
    #[default]
    Token,
    /// One HTTP PUT request addressed by account key and location carries
    /// every line as a real-time body.
    HttpPut,
}

impl Mode {
    /// Map the `UseHttpPut` switch onto a mode.
    pub fn from_http_put(use_http_put: bool) -> Self {
        if use_http_put {
            Mode::HttpPut
        } else {
            Mode::Token
        }
    }
}

/// Collector ports for every mode and TLS combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ports {
    pub token: u16,
    pub token_tls: u16,
    pub http_put: u16,
    pub http_put_tls: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN_PORT,
            token_tls: DEFAULT_TOKEN_TLS_PORT,
            http_put: DEFAULT_HTTP_PUT_PORT,
            http_put_tls: DEFAULT_HTTP_PUT_TLS_PORT,
        }
    }
}

impl Ports {
    pub fn select(&self, mode: Mode, use_tls: bool) -> u16 {
        match (mode, use_tls) {
            (Mode::Token, false) => self.token,
            (Mode::Token, true) => self.token_tls,
            (Mode::HttpPut, false) => self.http_put,
            (Mode::HttpPut, true) => self.http_put_tls,
        }
    }
}

/// Exponential backoff bounds for reconnection attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_BACKOFF,
            max_delay: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Configuration object describing how to construct a
/// [`FemtoShipper`](crate::FemtoShipper).
#[derive(Clone, Debug)]
pub struct ShipperConfig {
    pub mode: Mode,
    /// Log token used in [`Mode::Token`].
    pub token: String,
    /// Account key used in [`Mode::HttpPut`].
    pub account_key: String,
    /// Host location used in [`Mode::HttpPut`].
    pub location: String,
    pub use_tls: bool,
    /// Flush the stream after every frame.
    pub immediate_flush: bool,
    pub capacity: usize,
    pub backoff: BackoffPolicy,
    pub host: String,
    pub ports: Ports,
    pub tls: TlsOptions,
    pub connect_timeout: Duration,
    /// Emit diagnostics through the configured sink.
    pub debug: bool,
    pub warn_interval: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            token: String::new(),
            account_key: String::new(),
            location: String::new(),
            use_tls: false,
            immediate_flush: false,
            capacity: DEFAULT_QUEUE_CAPACITY,
            backoff: BackoffPolicy::default(),
            host: DEFAULT_HOST.into(),
            ports: Ports::default(),
            tls: TlsOptions::new(DEFAULT_TLS_DOMAIN),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            debug: false,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl ShipperConfig {
    /// Port selected by the configured mode and TLS switch.
    pub fn port(&self) -> u16 {
        self.ports.select(self.mode, self.use_tls)
    }

    /// Endpoint the transport connects to.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port(),
            tls: self.use_tls.then(|| self.tls.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Mode::Token, false, DEFAULT_TOKEN_PORT)]
    #[case(Mode::Token, true, DEFAULT_TOKEN_TLS_PORT)]
    #[case(Mode::HttpPut, false, DEFAULT_HTTP_PUT_PORT)]
    #[case(Mode::HttpPut, true, DEFAULT_HTTP_PUT_TLS_PORT)]
    fn selects_port_per_mode_and_tls(#[case] mode: Mode, #[case] tls: bool, #[case] port: u16) {
        let config = ShipperConfig {
            mode,
            use_tls: tls,
            ..ShipperConfig::default()
        };
        assert_eq!(config.port(), port);
        let endpoint = config.endpoint();
        assert_eq!(endpoint.port, port);
        assert_eq!(endpoint.tls.is_some(), tls);
    }

    #[test]
    fn defaults_follow_collector_conventions() {
        let config = ShipperConfig::default();
        assert_eq!(config.capacity, 32768);
        assert_eq!(config.backoff.min_delay, Duration::from_millis(100));
        assert_eq!(config.backoff.max_delay, Duration::from_millis(10_000));
        assert_eq!(config.host, "api.logentries.com");
        assert_eq!(config.tls.domain, "logentries.com");
        assert!(!config.debug);
    }

    #[test]
    fn http_put_flag_selects_mode() {
        assert_eq!(Mode::from_http_put(true), Mode::HttpPut);
        assert_eq!(Mode::from_http_put(false), Mode::Token);
    }
}
