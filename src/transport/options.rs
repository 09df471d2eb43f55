//! Connection configuration.
//!
//! Provides a type-safe interface for the settings a [`Connection`] consumes:
//! target URL, timeouts, TLS verification and an optional logger hook.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use websocket_queue::ConnectionOptions;
//!
//! let options = ConnectionOptions::new("wss://db.example.com/rpc")
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_tls_verify(true);
//! ```
//!
//! [`Connection`]: super::Connection

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for a single read-exactly-n.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for a blocking `exec(true)`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent` header sent with the upgrade request.
pub const DEFAULT_USER_AGENT: &str = concat!("websocket-queue/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Types
// ============================================================================

/// Caller-supplied logger hook.
///
/// Receives lifecycle messages (connect, handshake, close) in addition to
/// the crate's own `tracing` events.
pub type Logger = Arc<dyn Fn(Level, &str) + Send + Sync>;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Settings for one WebSocket connection.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Target `ws://` or `wss://` URL.
    url: String,

    /// Timeout for the TCP connect.
    connect_timeout: Duration,

    /// Timeout for a single read-exactly-n.
    read_timeout: Duration,

    /// Timeout for a blocking execution pass.
    request_timeout: Duration,

    /// Verify the TLS peer certificate and hostname.
    tls_verify: bool,

    /// `User-Agent` header value.
    user_agent: String,

    /// Optional logger hook.
    logger: Option<Logger>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options for `url` with default settings.
    ///
    /// TLS verification is disabled by default.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tls_verify: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            logger: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the TCP connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the blocking execution timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables TLS certificate and hostname verification.
    #[inline]
    #[must_use]
    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the `User-Agent` header.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Installs a logger hook.
    #[inline]
    #[must_use]
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(Level, &str) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ConnectionOptions {
    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the TCP connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the read timeout.
    #[inline]
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the blocking execution timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns whether TLS verification is enabled.
    #[inline]
    #[must_use]
    pub fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Returns the `User-Agent` header value.
    #[inline]
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Forwards a lifecycle message to the logger hook, if any.
    pub fn log(&self, level: Level, message: &str) {
        if let Some(logger) = &self.logger {
            logger(level, message);
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("url", &self.url)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("tls_verify", &self.tls_verify)
            .field("user_agent", &self.user_agent)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::new("ws://localhost:8000/rpc");
        assert_eq!(options.url(), "ws://localhost:8000/rpc");
        assert_eq!(options.connect_timeout(), Duration::from_secs(10));
        assert_eq!(options.read_timeout(), DEFAULT_READ_TIMEOUT);
        assert_eq!(options.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert!(!options.tls_verify());
        assert!(options.user_agent().starts_with("websocket-queue/"));
    }

    #[test]
    fn test_overrides_apply_after_defaults() {
        let options = ConnectionOptions::new("wss://example.com")
            .with_tls_verify(true)
            .with_connect_timeout(Duration::from_millis(250))
            .with_user_agent("acme-client");
        assert!(options.tls_verify());
        assert_eq!(options.connect_timeout(), Duration::from_millis(250));
        assert_eq!(options.user_agent(), "acme-client");
    }

    #[test]
    fn test_logger_hook_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = ConnectionOptions::new("ws://localhost")
            .with_logger(move |level, message| {
                sink.lock().unwrap().push((level, message.to_string()));
            });

        options.log(Level::DEBUG, "send http request connect");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Level::DEBUG, "send http request connect".to_string()));
    }

    #[test]
    fn test_debug_hides_logger() {
        let options = ConnectionOptions::new("ws://localhost").with_logger(|_, _| {});
        let text = format!("{options:?}");
        assert!(text.contains("logger: true"));
    }
}
