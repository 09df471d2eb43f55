//! Pending RPC calls and their handles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::{Value, json};
use tracing::warn;

use crate::identifiers::{LiveId, RequestId};

// ============================================================================
// Types
// ============================================================================

/// Reply callback: `(result, error, outbox)`. At most one of `result` and
/// `error` is `Some` for a well-formed reply.
pub type ReplyCallback = Box<dyn FnMut(Option<Value>, Option<Value>, &mut Outbox)>;

/// Live-query callback: `(action, payload, outbox)`.
///
/// Receives `CONNECT` with the registration result, `ERROR` with the failure,
/// then every push action (`CREATE`, `UPDATE`, `DELETE`, ...).
pub type LiveCallback = Box<dyn FnMut(&str, &Value, &mut Outbox)>;

/// Task status.
///
/// ```text
/// New ──step()──► Sent  ──reply──► removed      (non-blocking)
/// New ──step()──► Await ──reply──► removed      (blocking)
/// ```
///
/// A successful live registration moves the watchers to the live table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    New,
    Sent,
    Await,
}

// ============================================================================
// Task
// ============================================================================

/// One outstanding RPC call.
pub(crate) struct Task {
    /// RPC method name.
    pub(crate) method: &'static str,
    /// Positional parameters, `None` for parameterless methods.
    pub(crate) params: Option<Value>,
    pub(crate) status: Status,
    /// Whether a blocking `exec` waits for this reply.
    pub(crate) blocking: bool,
    pub(crate) on_reply: Option<ReplyCallback>,
    pub(crate) on_change: Option<LiveCallback>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("status", &self.status)
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(method: &'static str, params: Option<Value>, blocking: bool) -> Self {
        Self {
            method,
            params,
            status: Status::New,
            blocking,
            on_reply: None,
            on_change: None,
        }
    }

    /// Method name as sent on the wire.
    ///
    /// A `LIVE SELECT` statement is registered through `query`; the server
    /// answers with the live id inside the statement result.
    pub(crate) fn wire_method(&self) -> &'static str {
        let is_statement = self
            .params
            .as_ref()
            .and_then(|params| params.get(0))
            .and_then(Value::as_str)
            .is_some_and(|sql| sql.starts_with("LIVE "));

        if self.method == "live" && is_statement {
            "query"
        } else {
            self.method
        }
    }

    /// Hands the reply to the callback, or logs the error when there is none.
    pub(crate) fn reply(
        mut self,
        result: Option<Value>,
        error: Option<Value>,
        outbox: &mut Outbox,
    ) {
        match self.on_reply.as_mut() {
            Some(callback) => callback(result, error, outbox),
            None => {
                if let Some(error) = error {
                    warn!(method = self.method, %error, "Surreal request failed");
                }
            }
        }
    }
}

/// `query` parameters: the statement and its variables.
pub(crate) fn query_params(sql: &str, vars: Option<Value>) -> Value {
    json!([sql, vars.unwrap_or(Value::Null)])
}

// ============================================================================
// Outbox
// ============================================================================

/// Calls queued from inside a reply or live-query callback.
///
/// The driver is mutably borrowed while callbacks run. Queued calls get
/// request ids once the callback returns and go out on the next step.
/// Their replies are not observed; failures are logged.
#[derive(Debug, Default)]
pub struct Outbox {
    pub(crate) calls: Vec<Task>,
}

impl Outbox {
    /// Queues a SurrealQL query.
    pub fn query(&mut self, sql: &str, vars: Option<Value>) -> &mut Self {
        let params = query_params(sql, vars);
        self.calls.push(Task::new("query", Some(params), false));
        self
    }

    /// Queues the end of a live query, possibly the calling one.
    pub fn kill(&mut self, live_id: &LiveId) -> &mut Self {
        let params = json!([live_id.as_str()]);
        self.calls.push(Task::new("kill", Some(params), false));
        self
    }

    /// Returns the number of queued calls.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Handle to a freshly queued call, used to attach callbacks before it is sent.
///
/// # Example
///
/// ```ignore
/// surreal
///     .query("SELECT * FROM person", None)
///     .on_reply(|result, error| println!("{result:?} {error:?}"))
///     .blocking(true);
/// surreal.exec(true)?;
/// ```
pub struct TaskHandle<'a> {
    id: RequestId,
    task: &'a mut Task,
}

impl fmt::Debug for TaskHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("method", &self.task.method)
            .finish()
    }
}

impl<'a> TaskHandle<'a> {
    pub(crate) fn new(id: RequestId, task: &'a mut Task) -> Self {
        Self { id, task }
    }

    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Sets the `(result, error)` callback.
    pub fn on_reply<F>(self, callback: F) -> Self
    where
        F: FnMut(Option<Value>, Option<Value>) + 'static,
    {
        let mut callback = callback;
        self.on_reply_with(move |result, error, _: &mut Outbox| callback(result, error))
    }

    /// Sets a reply callback that can queue follow-up calls.
    pub fn on_reply_with<F>(self, callback: F) -> Self
    where
        F: FnMut(Option<Value>, Option<Value>, &mut Outbox) + 'static,
    {
        self.task.on_reply = Some(Box::new(callback));
        self
    }

    /// Sets the `(action, payload)` callback of a live query.
    ///
    /// Ignored for calls that do not start a live query.
    pub fn on_change<F>(self, callback: F) -> Self
    where
        F: FnMut(&str, &Value) + 'static,
    {
        self.on_change_with(watcher(callback))
    }

    /// Sets a live-query callback that can queue follow-up calls.
    pub fn on_change_with<F>(self, callback: F) -> Self
    where
        F: FnMut(&str, &Value, &mut Outbox) + 'static,
    {
        self.task.on_change = Some(Box::new(callback));
        self
    }

    /// Overrides whether a blocking `exec` waits for this reply.
    pub fn blocking(self, blocking: bool) -> Self {
        self.task.blocking = blocking;
        self
    }
}

/// Adapts a plain `(action, payload)` closure to a [`LiveCallback`].
pub(crate) fn watcher<F>(callback: F) -> LiveCallback
where
    F: FnMut(&str, &Value) + 'static,
{
    let mut callback = callback;
    Box::new(move |action: &str, payload: &Value, _: &mut Outbox| callback(action, payload))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    #[test]
    fn test_wire_method_rewrites_live_statement() {
        let task = Task::new("live", Some(json!(["LIVE SELECT * FROM t", null])), false);
        assert_eq!(task.wire_method(), "query");

        let task = Task::new("live", Some(json!(["person", false])), false);
        assert_eq!(task.wire_method(), "live");

        let task = Task::new("query", Some(json!(["LIVE SELECT * FROM t", null])), false);
        assert_eq!(task.wire_method(), "query");
    }

    #[test]
    fn test_handle_sets_callbacks_and_blocking() {
        let mut task = Task::new("query", None, false);
        let handle = TaskHandle::new(RequestId::new(4), &mut task)
            .on_reply(|_, _| {})
            .blocking(true);
        assert_eq!(handle.id(), RequestId::new(4));

        assert!(task.blocking);
        assert!(task.on_reply.is_some());
        assert!(task.on_change.is_none());
    }

    #[test]
    fn test_reply_invokes_callback() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let mut task = Task::new("info", None, true);
        task.on_reply = Some(Box::new(move |result, error, _: &mut Outbox| {
            *sink.borrow_mut() = Some((result, error));
        }));

        let mut outbox = Outbox::default();
        task.reply(Some(json!({"name": "root"})), None, &mut outbox);

        assert_eq!(*seen.borrow(), Some((Some(json!({"name": "root"})), None)));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_reply_callback_fills_outbox() {
        let mut task = Task::new("query", None, false);
        TaskHandle::new(RequestId::new(0), &mut task).on_reply_with(|_, _, outbox| {
            outbox
                .query("SELECT * FROM t WHERE n = $n", Some(json!({"n": 1})))
                .kill(&LiveId::new("lq-9"));
        });

        let mut outbox = Outbox::default();
        task.reply(Some(Value::Null), None, &mut outbox);

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.calls[0].method, "query");
        assert_eq!(
            outbox.calls[0].params,
            Some(json!(["SELECT * FROM t WHERE n = $n", {"n": 1}]))
        );
        assert_eq!(outbox.calls[1].method, "kill");
        assert_eq!(outbox.calls[1].params, Some(json!(["lq-9"])));
    }
}
