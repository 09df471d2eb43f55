//! Byte transport underneath a WebSocket connection.
//!
//! [`TcpTransport`] owns one TCP stream, optionally wrapped in TLS for
//! `wss://` URLs. The stream stays in blocking mode with a read timeout;
//! [`Transport::poll_readable`] flips it to non-blocking for a single read so
//! the poll never waits.
//!
//! Bytes read ahead are kept in an internal buffer, which also makes
//! readiness correct for TLS, where decrypted data may be pending even though
//! the raw socket has nothing left.

// ============================================================================
// Imports
// ============================================================================

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, trace};
use url::{Host, Url};

use crate::error::{Error, Result};

use super::options::ConnectionOptions;

// ============================================================================
// Constants
// ============================================================================

/// Bytes requested from the OS per read.
const READ_CHUNK: usize = 8192;

// ============================================================================
// Transport
// ============================================================================

/// A connected, bidirectional byte stream.
///
/// Implementations are exclusively owned by one [`Connection`] and are never
/// accessed concurrently.
///
/// [`Connection`]: super::Connection
pub trait Transport {
    /// Returns `true` if at least one byte can be read without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the peer closed the stream.
    fn poll_readable(&mut self) -> Result<bool>;

    /// Reads exactly `length` bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadTimeout`] if the bytes do not arrive in time
    /// - [`Error::BrokenFrame`] if the stream ends first
    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>>;

    /// Writes all of `data` or fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortWrite`] if the socket stops accepting bytes.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Closes the stream in both directions.
    fn shutdown(&mut self) -> Result<()>;
}

// ============================================================================
// Endpoint
// ============================================================================

/// A parsed `ws://` / `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address, without IPv6 brackets.
    pub host: String,
    /// TCP port (80 for `ws`, 443 for `wss` unless given).
    pub port: u16,
    /// Request target: path plus query string.
    pub path: String,
    /// Whether TLS is required.
    pub tls: bool,
}

impl Endpoint {
    /// Parses a WebSocket URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL is malformed
    /// - [`Error::Config`] if the scheme is not `ws`/`wss` or the host is missing
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;

        let tls = match parsed.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(Error::config(format!(
                    "unsupported scheme '{other}', expected ws or wss"
                )));
            }
        };

        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(Error::config(format!("missing host in '{url}'"))),
        };

        let port = parsed
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        let mut path = match parsed.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }

    /// Returns the `Host` header value.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Plain or TLS-wrapped TCP stream.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Returns the underlying TCP socket.
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => stream.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

// ============================================================================
// TcpTransport
// ============================================================================

/// TCP/TLS transport with a zero-timeout readiness poll.
pub struct TcpTransport {
    /// The connected stream.
    stream: Stream,
    /// Bytes read but not yet consumed.
    buffer: Vec<u8>,
    /// Read timeout in milliseconds, for error reporting.
    read_timeout_ms: u64,
}

impl TcpTransport {
    /// Connects to `endpoint`, negotiating TLS for `wss`.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if no resolved address accepts the connection
    /// - [`Error::ConnectionTimeout`] if the connect attempt times out
    /// - [`Error::Tls`] if TLS negotiation fails
    pub fn connect(endpoint: &Endpoint, options: &ConnectionOptions) -> Result<Self> {
        let timeout = options.connect_timeout();
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| Error::connection(format!("{}: {e}", endpoint.host)))?
            .collect();

        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let tcp = connected.ok_or_else(|| match last_error {
            Some(e) if e.kind() == ErrorKind::TimedOut => {
                Error::connection_timeout(timeout.as_millis() as u64)
            }
            Some(e) => Error::connection(format!("{}:{}: {e}", endpoint.host, endpoint.port)),
            None => Error::connection(format!("no address resolved for {}", endpoint.host)),
        })?;

        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(options.read_timeout()))?;

        let stream = if endpoint.tls {
            let verify = options.tls_verify();
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(!verify)
                .danger_accept_invalid_hostnames(!verify)
                .build()
                .map_err(|e| Error::tls(e.to_string()))?;
            let tls = connector
                .connect(&endpoint.host, tcp)
                .map_err(|e| Error::tls(e.to_string()))?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp)
        };

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            tls = endpoint.tls,
            "Transport connected"
        );

        Ok(Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            read_timeout_ms: options.read_timeout().as_millis() as u64,
        })
    }

    /// Reads one chunk from the stream into the buffer.
    fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = self.stream.read(&mut chunk)?;
        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(read)
    }
}

impl Transport for TcpTransport {
    fn poll_readable(&mut self) -> Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }

        self.stream.tcp().set_nonblocking(true)?;
        let filled = self.fill();
        self.stream.tcp().set_nonblocking(false)?;

        match filled {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>> {
        while self.buffer.len() < length {
            match self.fill() {
                Ok(0) => return Err(Error::broken_frame(self.buffer.len(), length)),
                Ok(read) => trace!(read, "Socket read"),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::read_timeout(self.read_timeout_ms));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.buffer.drain(..length).collect())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => return Err(Error::short_write(written, data.len())),
                Ok(count) => written += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::short_write(written, data.len()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.stream.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Stream::Tls(stream) = &mut self.stream {
            let _ = stream.shutdown();
        }
        match self.stream.tcp().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
