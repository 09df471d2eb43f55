//! Error types for the WebSocket queue runtime.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use websocket_queue::{Result, NatsDriver, ConnectionOptions};
//!
//! fn example() -> Result<()> {
//!     let mut nats = NatsDriver::open(ConnectionOptions::new("ws://127.0.0.1:8080"));
//!     nats.publish("greet", "hello");
//!     nats.exec(false)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ShortWrite`], [`Error::ReadTimeout`], [`Error::BrokenFrame`], [`Error::Tls`] |
//! | Protocol | [`Error::Handshake`], [`Error::InvalidAcceptKey`], [`Error::InvalidOpcode`], [`Error::Protocol`] |
//! | Correlation | [`Error::UnknownRequest`] |
//! | Execution | [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Url`] |
//!
//! Server-reported failures (`-ERR` lines, JSON `error` fields) are not
//! errors of this type: they are delivered to the callback that issued the
//! request.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Transport and protocol errors are fatal to the connection that raised
/// them. Nothing is retried automatically.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// TCP connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connect attempt exceeded the configured timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed by the peer or by a previous close.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Socket accepted fewer bytes than requested.
    #[error("Could only write {written} out of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes requested.
        expected: usize,
    },

    /// No data arrived within the read timeout.
    #[error("Client read timeout after {timeout_ms}ms")]
    ReadTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Stream ended in the middle of a read.
    #[error("Broken frame, read {read} of stated {expected} bytes")]
    BrokenFrame {
        /// Bytes read before end of stream.
        read: usize,
        /// Bytes expected.
        expected: usize,
    },

    /// TLS setup or negotiation failed.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Server sent an invalid upgrade response.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// `Sec-WebSocket-Accept` did not match the request key.
    #[error("Server sent bad upgrade response: expected accept {expected}, got {actual}")]
    InvalidAcceptKey {
        /// Accept value derived from the request key.
        expected: String,
        /// Accept value the server sent.
        actual: String,
    },

    /// Frame header carried an unknown opcode.
    #[error("Bad opcode in websocket frame: {opcode}")]
    InvalidOpcode {
        /// The raw 4-bit opcode.
        opcode: u8,
    },

    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// Reply carried an id with no pending request.
    ///
    /// The id space is desynchronized; the connection cannot be trusted.
    #[error("Reply for unknown request {request_id}")]
    UnknownRequest {
        /// The unmatched request ID.
        request_id: RequestId,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Blocking execution did not finish within the request timeout.
    #[error("Blocking request timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a short write error.
    #[inline]
    pub fn short_write(written: usize, expected: usize) -> Self {
        Self::ShortWrite { written, expected }
    }

    /// Creates a read timeout error.
    #[inline]
    pub fn read_timeout(timeout_ms: u64) -> Self {
        Self::ReadTimeout { timeout_ms }
    }

    /// Creates a broken frame error.
    #[inline]
    pub fn broken_frame(read: usize, expected: usize) -> Self {
        Self::BrokenFrame { read, expected }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates an accept key mismatch error.
    #[inline]
    pub fn invalid_accept_key(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidAcceptKey {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an invalid opcode error.
    #[inline]
    pub fn invalid_opcode(opcode: u8) -> Self {
        Self::InvalidOpcode { opcode }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unknown request error.
    #[inline]
    pub fn unknown_request(request_id: RequestId) -> Self {
        Self::UnknownRequest { request_id }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(timeout_ms: u64) -> Self {
        Self::RequestTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::ReadTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this error comes from the socket layer.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ShortWrite { .. }
                | Self::ReadTimeout { .. }
                | Self::BrokenFrame { .. }
                | Self::Tls { .. }
                | Self::Io(_)
        )
    }

    /// Returns `true` if the peer violated the wire protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. }
                | Self::InvalidAcceptKey { .. }
                | Self::InvalidOpcode { .. }
                | Self::Protocol { .. }
                | Self::UnknownRequest { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
