//! SurrealDB JSON-RPC message types.
//!
//! One JSON object per text frame.
//!
//! See <https://surrealdb.com/docs/surrealdb/integration/rpc>.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{LiveId, RequestId};

// ============================================================================
// Request
// ============================================================================

/// An outbound RPC call.
///
/// # Format
///
/// ```json
/// { "id": 0, "method": "query", "params": ["SELECT 1", null] }
/// ```
///
/// `params` is omitted for parameterless methods.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    /// Correlation id.
    pub id: RequestId,

    /// RPC method name.
    pub method: &'a str,

    /// Positional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl Request<'_> {
    /// Serializes the request to its wire text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a parameter cannot be serialized.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Response
// ============================================================================

/// An inbound RPC frame: either a reply or a live-query push.
///
/// # Format
///
/// Reply:
/// ```json
/// { "id": 0, "result": [{ "ok": true }] }
/// { "id": 0, "error": { "code": -32000, "message": "..." } }
/// ```
///
/// Push (no `id`):
/// ```json
/// { "result": { "id": "<live id>", "action": "CREATE", "result": { ... } } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Correlation id, absent for pushes.
    #[serde(default)]
    pub id: Option<RequestId>,

    /// Result data.
    #[serde(default)]
    pub result: Option<Value>,

    /// Server-reported error.
    #[serde(default)]
    pub error: Option<Value>,
}

impl Response {
    /// Parses one frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload is not a JSON response object.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns `true` for a live-query push.
    #[inline]
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Extracts the push carried by this frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `result` is not a notification object.
    pub fn into_notification(self) -> Result<Notification> {
        let result = self
            .result
            .ok_or_else(|| Error::protocol("push without result"))?;
        serde_json::from_value(result)
            .map_err(|e| Error::protocol(format!("malformed live notification: {e}")))
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A live-query push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    /// Live query the push belongs to.
    pub id: LiveId,

    /// `CREATE`, `UPDATE`, `DELETE` or `CLOSE`.
    pub action: String,

    /// Affected record or diff.
    #[serde(default)]
    pub result: Value,
}

// ============================================================================
// Live id extraction
// ============================================================================

/// Outcome of a live-query registration reply.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveReply {
    /// Server issued a live id.
    Started(LiveId),
    /// Registration failed; carries the error value.
    Failed(Value),
}

/// Interprets the `result` of a live-query registration.
///
/// A `live` call answers with the id string. A `LIVE SELECT` sent through
/// `query` answers with a statement list whose first entry carries the id in
/// `result`, or `status: "ERR"` on failure.
#[must_use]
pub fn live_reply(result: Option<&Value>) -> LiveReply {
    let Some(result) = result else {
        return LiveReply::Failed(Value::Null);
    };

    if let Some(id) = result.as_str() {
        return LiveReply::Started(LiveId::new(id));
    }

    let statement = result.get(0);
    if statement
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .is_some_and(|status| status == "ERR")
    {
        let detail = statement
            .and_then(|s| s.get("result"))
            .cloned()
            .unwrap_or(Value::Null);
        return LiveReply::Failed(detail);
    }

    match statement
        .and_then(|s| s.get("result"))
        .and_then(Value::as_str)
    {
        Some(id) => LiveReply::Started(LiveId::new(id)),
        None => LiveReply::Failed(result.clone()),
    }
}

// ============================================================================
// Tests
// ============================================================================
