//! Transport primitives for the shipper.
//!
//! A [`Transport`] owns exactly one physical connection to a fixed endpoint
//! and knows nothing about queues or retries. [`TcpTransport`] speaks plain
//! TCP or TLS via `native-tls`.

use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use native_tls::{Certificate, TlsConnector, TlsStream};
use thiserror::Error;

use crate::config::DEFAULT_CONNECT_TIMEOUT;

/// Reasons a connection attempt failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("unable to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("tls handshake with {domain} failed: {reason}")]
    Handshake { domain: String, reason: String },
    #[error("peer certificate for {domain} does not match the pinned certificate")]
    CertificateMismatch { domain: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One physical connection to a remote collector.
pub trait Transport: Send {
    /// Open the connection. On failure no connection is left behind.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Write the whole buffer to the open connection.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Release the connection. Safe to call when closed or never opened.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        (**self).connect()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// TLS connection options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsOptions {
    /// Identity the peer certificate must be valid for.
    pub domain: String,
    /// Extra PEM-encoded root certificate to trust, for private collectors.
    pub root_certificate: Option<Vec<u8>>,
    /// DER-encoded certificate the peer must present exactly.
    pub pinned_certificate: Option<Vec<u8>>,
}

impl TlsOptions {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            root_certificate: None,
            pinned_certificate: None,
        }
    }

    fn connector(&self) -> Result<TlsConnector, ConnectionError> {
        let mut builder = TlsConnector::builder();
        if let Some(pem) = &self.root_certificate {
            builder.add_root_certificate(Certificate::from_pem(pem)?);
        }
        Ok(builder.build()?)
    }

    fn verify_pin(&self, stream: &TlsStream<TcpStream>) -> Result<(), ConnectionError> {
        let Some(pinned) = &self.pinned_certificate else {
            return Ok(());
        };
        let presented = match stream.peer_certificate()? {
            Some(cert) => cert.to_der()?,
            None => Vec::new(),
        };
        if &presented == pinned {
            Ok(())
        } else {
            Err(ConnectionError::CertificateMismatch {
                domain: self.domain.clone(),
            })
        }
    }
}

/// Remote collector address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsOptions>,
}

impl Endpoint {
    fn socket_addrs(&self) -> Result<Vec<SocketAddr>, ConnectionError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
            .map_err(|source| ConnectionError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source,
            })
    }
}

/// Active socket connection state.
enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ActiveConnection {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write_all(buf),
            ActiveConnection::Tls(stream) => stream.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
        }
    }

    fn shutdown(self) {
        match self {
            ActiveConnection::PlainTcp(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            ActiveConnection::Tls(mut stream) => {
                let _ = stream.shutdown();
                let _ = stream.get_ref().shutdown(Shutdown::Both);
            }
        }
    }
}

fn connect_tcp(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    let mut last_err = None;
    for addr in endpoint.socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(ConnectionError::Connect {
        host: endpoint.host.clone(),
        port: endpoint.port,
        source: last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        }),
    })
}

fn connect_tls(
    stream: TcpStream,
    tls: &TlsOptions,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, ConnectionError> {
    let connector = tls.connector()?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let stream = connector
        .connect(&tls.domain, stream)
        .map_err(|err| ConnectionError::Handshake {
            domain: tls.domain.clone(),
            reason: err.to_string(),
        })?;
    tls.verify_pin(&stream)?;
    let tcp_ref = stream.get_ref();
    tcp_ref.set_read_timeout(None)?;
    tcp_ref.set_write_timeout(None)?;
    Ok(stream)
}

/// TCP transport with optional TLS.
pub struct TcpTransport {
    endpoint: Endpoint,
    connect_timeout: Duration,
    connection: Option<ActiveConnection>,
}

impl TcpTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_connect_timeout(endpoint, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            connection: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn open(&self) -> Result<ActiveConnection, ConnectionError> {
        let stream = connect_tcp(&self.endpoint, self.connect_timeout)?;
        match &self.endpoint.tls {
            Some(tls) => {
                let stream = connect_tls(stream, tls, self.connect_timeout)?;
                Ok(ActiveConnection::Tls(Box::new(stream)))
            }
            None => Ok(ActiveConnection::PlainTcp(stream)),
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.close();
        self.connection = Some(self.open()?);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.connection.as_mut() {
            Some(conn) => conn.write_all(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is not connected",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.connection.as_mut() {
            Some(conn) => conn.flush(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is not connected",
            )),
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.shutdown();
        }
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish()
    }
}
