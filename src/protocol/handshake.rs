//! WebSocket opening handshake, client side (RFC 6455 Section 4).
//!
//! ```http
//! GET /rpc HTTP/1.1
//! Host: db.example.com
//! User-Agent: websocket-queue/0.1.0
//! Connection: Upgrade
//! Upgrade: websocket
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server must answer `101` with
//! `Sec-WebSocket-Accept: base64(SHA-1(key + GUID))`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{Endpoint, Transport};

// ============================================================================
// Constants
// ============================================================================

/// RFC 6455 GUID appended to the key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the response header block.
const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// End of the HTTP header block.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

static ACCEPT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^Sec-WebSocket-Accept:[ \t]*(.*?)[ \t]*\r?$")
        .expect("accept header pattern is valid")
});

// ============================================================================
// Key Material
// ============================================================================

/// Generates a fresh base64-encoded 16-byte nonce.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// Computes the `Sec-WebSocket-Accept` value for `key`.
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

// ============================================================================
// Request / Response
// ============================================================================

/// Builds the HTTP Upgrade request.
#[must_use]
pub fn build_request(endpoint: &Endpoint, key: &str, user_agent: &str) -> String {
    let headers = [
        ("Host", endpoint.host_header()),
        ("User-Agent", user_agent.to_string()),
        ("Connection", "Upgrade".to_string()),
        ("Upgrade", "websocket".to_string()),
        ("Sec-WebSocket-Key", key.to_string()),
        ("Sec-WebSocket-Version", "13".to_string()),
    ];

    let mut request = format!("GET {} HTTP/1.1\r\n", endpoint.path);
    for (name, value) in headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(&value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Validates the server's upgrade response against the request key.
///
/// # Errors
///
/// - [`Error::Handshake`] if the status is not `101` or the accept header is missing
/// - [`Error::InvalidAcceptKey`] if the accept value does not match
pub fn validate_response(response: &str, key: &str) -> Result<()> {
    let status_line = response.lines().next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "101" {
        return Err(Error::handshake(format!(
            "expected 101 Switching Protocols, got '{status_line}'"
        )));
    }

    let actual = ACCEPT_HEADER
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Error::handshake(format!(
                "server sent invalid upgrade response without Sec-WebSocket-Accept: {response}"
            ))
        })?;

    let expected = compute_accept_key(key);
    if actual != expected {
        return Err(Error::invalid_accept_key(expected, actual));
    }

    Ok(())
}

/// Performs the opening handshake over a freshly connected transport.
///
/// The response is consumed byte by byte up to the blank line, so any frame
/// the server pipelines behind it stays unread.
///
/// # Errors
///
/// Any transport error, plus the validation errors of [`validate_response`].
pub fn perform<T>(socket: &mut T, endpoint: &Endpoint, user_agent: &str) -> Result<()>
where
    T: Transport + ?Sized,
{
    let key = generate_key();
    let request = build_request(endpoint, &key, user_agent);

    debug!(host = %endpoint.host, path = %endpoint.path, "Sending upgrade request");
    socket.write_all(request.as_bytes())?;

    let mut response = Vec::with_capacity(256);
    while !response.ends_with(HEADER_TERMINATOR) {
        if response.len() >= MAX_RESPONSE_BYTES {
            return Err(Error::handshake("upgrade response header too large"));
        }
        response.extend(socket.read_exact(1)?);
    }

    validate_response(&String::from_utf8_lossy(&response), &key)?;

    debug!(host = %endpoint.host, "Handshake complete");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
