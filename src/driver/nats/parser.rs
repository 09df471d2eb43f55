//! NATS server protocol parser.
//!
//! Splits one frame payload into server operations. Control lines are
//! CRLF-terminated; a `MSG` body is taken by its declared byte length, so a
//! body may itself contain CRLF.
//!
//! See <https://docs.nats.io/reference/reference-protocols/nats-protocol>.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::Sid;

// ============================================================================
// Constants
// ============================================================================

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

// ============================================================================
// ServerInfo
// ============================================================================

/// Fields of the server's `INFO` line that the client cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique server id.
    pub server_id: Option<String>,
    /// Human-readable server name.
    pub server_name: Option<String>,
    /// Server version string.
    pub version: Option<String>,
    /// Protocol version.
    pub proto: Option<i64>,
    /// Largest payload the server accepts.
    pub max_payload: Option<u64>,
    /// Whether message headers are supported.
    pub headers: Option<bool>,
    /// Client id assigned by the server.
    pub client_id: Option<u64>,
    /// Whether the server requires authentication.
    pub auth_required: Option<bool>,
}

// ============================================================================
// Msg
// ============================================================================

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    /// Concrete subject the message was published to.
    pub subject: String,
    /// Subscription the message was delivered for.
    pub sid: Sid,
    /// Reply subject, for request/reply.
    pub reply_to: Option<String>,
    /// Raw body.
    pub payload: Vec<u8>,
}

impl Msg {
    /// Returns the body as text, replacing invalid UTF-8.
    #[inline]
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ============================================================================
// ServerOp
// ============================================================================

/// One operation sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    /// `INFO {json}`.
    Info(ServerInfo),
    /// `PING`.
    Ping,
    /// `PONG`.
    Pong,
    /// `+OK`.
    Ok,
    /// `-ERR <reason>`.
    Err(String),
    /// `MSG <subject> <sid> [reply-to] <#bytes>` plus body.
    Msg(Msg),
    /// Anything else, kept for diagnostics.
    Unknown(String),
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses every operation in one frame payload.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for a malformed `MSG` header or a body shorter
/// than declared.
pub fn parse(payload: &[u8]) -> Result<Vec<ServerOp>> {
    let mut ops = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        let (line, next) = match find_crlf(&payload[pos..]) {
            Some(end) => (&payload[pos..pos + end], pos + end + CRLF.len()),
            None => (&payload[pos..], payload.len()),
        };
        pos = next;

        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (action, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let op = match action.to_ascii_uppercase().as_str() {
            "PING" => ServerOp::Ping,
            "PONG" => ServerOp::Pong,
            "+OK" => ServerOp::Ok,
            "-ERR" => ServerOp::Err(rest.trim_matches('\'').to_string()),
            "INFO" => ServerOp::Info(parse_info(rest)),
            "MSG" => {
                let (mut msg, length) = parse_msg_header(rest)?;
                let end = pos
                    .checked_add(length)
                    .filter(|&end| end <= payload.len())
                    .ok_or_else(|| {
                        Error::protocol(format!(
                            "MSG body truncated: declared {length} bytes, {} available",
                            payload.len() - pos
                        ))
                    })?;
                msg.payload = payload[pos..end].to_vec();
                pos = end;
                if payload[pos..].starts_with(CRLF) {
                    pos += CRLF.len();
                }
                ServerOp::Msg(msg)
            }
            _ => ServerOp::Unknown(line.to_string()),
        };
        ops.push(op);
    }

    Ok(ops)
}

/// Parses an `INFO` body, falling back to defaults on bad JSON.
fn parse_info(body: &str) -> ServerInfo {
    serde_json::from_str(body).unwrap_or_else(|e| {
        warn!(error = %e, "Unparsable INFO payload");
        ServerInfo::default()
    })
}

/// Parses `subject sid [reply-to] #bytes`, returning the message shell and length.
fn parse_msg_header(header: &str) -> Result<(Msg, usize)> {
    let parts: Vec<&str> = header.split_whitespace().collect();
    let (subject, sid, reply_to, length) = match parts.as_slice() {
        [subject, sid, length] => (*subject, *sid, None, *length),
        [subject, sid, reply_to, length] => (*subject, *sid, Some(*reply_to), *length),
        _ => return Err(Error::protocol(format!("malformed MSG header: '{header}'"))),
    };

    let sid = sid
        .parse::<u64>()
        .map_err(|_| Error::protocol(format!("invalid sid in MSG: '{sid}'")))?;
    let length = length
        .parse::<usize>()
        .map_err(|_| Error::protocol(format!("invalid byte count in MSG: '{length}'")))?;

    let msg = Msg {
        subject: subject.to_string(),
        sid: Sid::new(sid),
        reply_to: reply_to.map(str::to_string),
        payload: Vec::new(),
    };
    Ok((msg, length))
}

/// Returns the offset of the first CRLF in `data`.
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|window| window == CRLF)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_lines() {
        let ops = parse(b"PING\r\nPONG\r\n+OK\r\n").unwrap();
        assert_eq!(ops, vec![ServerOp::Ping, ServerOp::Pong, ServerOp::Ok]);
    }

    #[test]
    fn test_parse_err_strips_quotes() {
        let ops = parse(b"-ERR 'Unknown Protocol Operation'\r\n").unwrap();
        assert_eq!(
            ops,
            vec![ServerOp::Err("Unknown Protocol Operation".to_string())]
        );
    }

    #[test]
    fn test_parse_info() {
        let line: &[u8] = br#"INFO {"server_id":"NABC","version":"2.10.7","proto":1,"#;
        let rest: &[u8] = br#""max_payload":1048576,"headers":true}"#;
        let ops = parse(&[line, rest].concat()).unwrap();
        let ServerOp::Info(info) = &ops[0] else {
            panic!("expected INFO, got {ops:?}");
        };
        assert_eq!(info.server_id.as_deref(), Some("NABC"));
        assert_eq!(info.version.as_deref(), Some("2.10.7"));
        assert_eq!(info.max_payload, Some(1_048_576));
        assert_eq!(info.headers, Some(true));
    }

    #[test]
    fn test_parse_msg() {
        let ops = parse(b"MSG foo 3 5\r\nhello\r\n").unwrap();
        assert_eq!(
            ops,
            vec![ServerOp::Msg(Msg {
                subject: "foo".to_string(),
                sid: Sid::new(3),
                reply_to: None,
                payload: b"hello".to_vec(),
            })]
        );
    }

    #[test]
    fn test_parse_msg_with_reply_to() {
        let ops = parse(b"MSG svc.echo 9 _INBOX.abc 2\r\nhi\r\n").unwrap();
        let ServerOp::Msg(msg) = &ops[0] else {
            panic!("expected MSG");
        };
        assert_eq!(msg.reply_to.as_deref(), Some("_INBOX.abc"));
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn test_parse_msg_body_with_embedded_crlf() {
        let ops = parse(b"MSG foo 1 12\r\nline1\r\nline2\r\nPING\r\n").unwrap();
        assert_eq!(ops.len(), 2);
        let ServerOp::Msg(msg) = &ops[0] else {
            panic!("expected MSG");
        };
        assert_eq!(msg.payload, b"line1\r\nline2");
        assert_eq!(ops[1], ServerOp::Ping);
    }

    #[test]
    fn test_parse_empty_msg_body() {
        let ops = parse(b"MSG foo 1 0\r\n\r\n").unwrap();
        let ServerOp::Msg(msg) = &ops[0] else {
            panic!("expected MSG");
        };
        assert!(msg.payload.is_empty());
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_parse_truncated_body_is_error() {
        let err = parse(b"MSG foo 1 10\r\nshort").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_msg_length_overflow_is_error() {
        let err = parse(b"MSG foo 1 18446744073709551615\r\nhello\r\n").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_malformed_header_is_error() {
        assert!(parse(b"MSG foo\r\n").is_err());
        assert!(parse(b"MSG foo bar 5\r\nhello\r\n").is_err());
    }

    #[test]
    fn test_parse_unknown_action() {
        let ops = parse(b"HMSG foo 1 10 12\r\n").unwrap();
        assert!(matches!(&ops[0], ServerOp::Unknown(line) if line.starts_with("HMSG")));
    }
}
