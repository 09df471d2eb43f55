//! SurrealDB RPC driver.
//!
//! Sends one JSON-RPC object per masked text frame and correlates replies by
//! numeric request id.
//!
//! # Task Lifecycle
//!
//! ```text
//! new ──step()──► sent  ──reply──► done     (fire-and-forget)
//! new ──step()──► await ──reply──► done     (blocking)
//! new ──step()──► sent  ──reply──► live     (live query, keyed by live id)
//! ```
//!
//! A blocking task keeps [`Protocol::step`] reporting pending work, which is
//! what makes `exec(true)` wait for its reply.
//!
//! Callbacks set with [`TaskHandle::on_reply_with`] or
//! [`TaskHandle::on_change_with`] get an [`Outbox`] for follow-up calls, since
//! the driver itself is borrowed while they run.
//!
//! # Defaults
//!
//! | Operation | Method | Blocking |
//! |-----------|--------|----------|
//! | [`signin`](Driver::signin) | `signin` | yes |
//! | [`use_namespace`](Driver::use_namespace) | `use` | yes |
//! | [`query`](Driver::query) | `query` | no |
//! | [`live_query`](Driver::live_query) | `live` (sent as `query`) | no |
//! | [`live`](Driver::live) | `live` | no |
//! | [`let_var`](Driver::let_var) | `let` | yes |
//! | [`unset`](Driver::unset) | `unset` | yes |
//! | [`kill`](Driver::kill) | `kill` | no |
//! | [`authenticate`](Driver::authenticate) | `authenticate` | yes |
//! | [`invalidate`](Driver::invalidate) | `invalidate` | yes |
//! | [`info`](Driver::info) | `info` | yes |
//! | [`version`](Driver::version) | `version` | yes |

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC wire types.
pub mod rpc;

/// Pending calls and handles.
pub mod task;

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use semver::Version;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{LiveId, RequestId};
use crate::protocol::frame::{Frame, Opcode};
use crate::transport::{Connection, ConnectionOptions};

use super::core::{Driver, Protocol};

use rpc::{LiveReply, Notification, Response};
use task::{Status, Task};

pub use task::{LiveCallback, Outbox, ReplyCallback, TaskHandle};

// ============================================================================
// Constants
// ============================================================================

/// First server version that no longer needs `ns`/`db` in `signin`.
const SCOPED_SIGNIN_VERSION: Version = Version::new(2, 0, 0);

/// Extracts `major.minor.patch` from a version string such as `surrealdb-1.5.4`.
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+\.\d+\.\d+").expect("static version regex is valid")
});

// ============================================================================
// Types
// ============================================================================

/// SurrealDB driver.
pub type SurrealDriver = Driver<Surreal>;

// ============================================================================
// Surreal
// ============================================================================

/// SurrealDB protocol state: pending calls, live queries and session info.
pub struct Surreal {
    /// Next request id.
    counter: u64,
    /// Pending calls in creation order.
    tasks: BTreeMap<RequestId, Task>,
    /// Watchers of each running live query.
    live: FxHashMap<LiveId, Vec<LiveCallback>>,
    /// Namespace from the last `use`.
    namespace: String,
    /// Database from the last `use`.
    database: String,
    /// Server version, once negotiated.
    version: Option<Version>,
}

impl Default for Surreal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Surreal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surreal")
            .field("counter", &self.counter)
            .field("tasks", &self.tasks)
            .field("live", &self.live.len())
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("version", &self.version)
            .finish()
    }
}

impl Surreal {
    /// Creates an empty protocol state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: 0,
            tasks: BTreeMap::new(),
            live: FxHashMap::default(),
            namespace: String::new(),
            database: String::new(),
            version: None,
        }
    }

    /// Queues a call and returns its handle.
    fn add_task(
        &mut self,
        method: &'static str,
        params: Option<Value>,
        blocking: bool,
    ) -> TaskHandle<'_> {
        self.insert(Task::new(method, params, blocking))
    }

    /// Assigns the next request id to `task`.
    fn insert(&mut self, task: Task) -> TaskHandle<'_> {
        let id = RequestId::new(self.counter);
        self.counter += 1;
        debug!(%id, method = task.method, blocking = task.blocking, "Surreal task queued");

        let task = self.tasks.entry(id).or_insert(task);
        TaskHandle::new(id, task)
    }

    /// Moves what callbacks queued into the task table.
    fn flush(&mut self, outbox: Outbox) {
        for task in outbox.calls {
            self.insert(task);
        }
    }

    /// Whether `signin` must carry the session namespace and database.
    fn needs_scoped_signin(&self) -> bool {
        self.version
            .as_ref()
            .is_none_or(|version| *version < SCOPED_SIGNIN_VERSION)
    }

    /// Resolves a reply against its pending call.
    fn resolve(&mut self, id: RequestId, response: Response) -> Result<()> {
        let task = self
            .tasks
            .remove(&id)
            .ok_or_else(|| Error::unknown_request(id))?;
        let failed = response.error.is_some();
        debug!(%id, method = task.method, failed, "Surreal reply");

        let Response { result, error, .. } = response;
        let mut outbox = Outbox::default();

        match task.method {
            "live" => {
                self.start_live(id, task, result, error, &mut outbox);
                self.flush(outbox);
                return Ok(());
            }
            "version" => {
                if let Some(text) = result.as_ref().and_then(Value::as_str) {
                    self.version = parse_version(text);
                    debug!(version = ?self.version, "Surreal server version");
                }
            }
            "kill" if error.is_none() => {
                let target = task
                    .params
                    .as_ref()
                    .and_then(|params| params.get(0))
                    .and_then(Value::as_str);
                if let Some(target) = target
                    && self.live.remove(&LiveId::new(target)).is_some()
                {
                    debug!(live_id = target, "Live query killed");
                }
            }
            _ => {}
        }

        task.reply(result, error, &mut outbox);
        self.flush(outbox);
        Ok(())
    }

    /// Completes a live-query registration.
    fn start_live(
        &mut self,
        id: RequestId,
        task: Task,
        result: Option<Value>,
        error: Option<Value>,
        outbox: &mut Outbox,
    ) {
        let Task {
            mut on_reply,
            on_change,
            ..
        } = task;

        let outcome = match error {
            Some(error) => LiveReply::Failed(error),
            None => rpc::live_reply(result.as_ref()),
        };

        match outcome {
            LiveReply::Started(live_id) => {
                debug!(%id, %live_id, "Live query started");
                let result = result.unwrap_or(Value::Null);
                let watchers = self.live.entry(live_id).or_default();
                if let Some(mut callback) = on_change {
                    callback("CONNECT", &result, outbox);
                    watchers.push(callback);
                }
                if let Some(callback) = on_reply.as_mut() {
                    callback(Some(result), None, outbox);
                }
            }
            LiveReply::Failed(error) => {
                warn!(%id, %error, "Live query failed");
                if let Some(mut callback) = on_change {
                    callback("ERROR", &error, outbox);
                }
                if let Some(callback) = on_reply.as_mut() {
                    callback(None, Some(error), outbox);
                }
            }
        }
    }

    /// Fans a push out to the watchers of its live query.
    fn notify(&mut self, push: &Notification) {
        let Notification { id, action, result } = push;
        let mut outbox = Outbox::default();
        match self.live.get_mut(id) {
            Some(watchers) => {
                trace!(live_id = %id, %action, watchers = watchers.len(), "Live push");
                for watcher in watchers {
                    watcher(action.as_str(), result, &mut outbox);
                }
            }
            None => {
                warn!(live_id = %id, %action, "Push for unknown live query");
            }
        }
        self.flush(outbox);
    }
}

impl Protocol for Surreal {
    fn step(&mut self, connection: &mut Connection) -> Result<bool> {
        for (id, task) in self.tasks.iter_mut() {
            if task.status != Status::New {
                continue;
            }

            let method = task.wire_method();
            let text = rpc::Request {
                id: *id,
                method,
                params: task.params.as_ref(),
            }
            .to_text()?;
            connection.send(&Frame::text(text))?;

            task.status = if task.blocking {
                Status::Await
            } else {
                Status::Sent
            };
            trace!(%id, method, "Surreal request sent");
        }

        Ok(self
            .tasks
            .values()
            .any(|task| task.status == Status::Await))
    }

    fn message(&mut self, frame: &Frame, _connection: &mut Connection) -> Result<()> {
        if !matches!(frame.opcode, Opcode::Text | Opcode::Binary) {
            return Ok(());
        }

        let response = Response::parse(&frame.payload)?;
        match response.id {
            Some(id) => self.resolve(id, response),
            None => {
                let push = response.into_notification()?;
                self.notify(&push);
                Ok(())
            }
        }
    }
}

/// Parses the first `major.minor.patch` found in `text`.
fn parse_version(text: &str) -> Option<Version> {
    let found = VERSION_PATTERN.find(text)?;
    Version::parse(found.as_str()).ok()
}

// ============================================================================
// SurrealDriver - Constructors
// ============================================================================

impl Driver<Surreal> {
    /// Creates a driver that connects lazily, without version negotiation.
    #[must_use]
    pub fn open(options: ConnectionOptions) -> Self {
        Self::new(Connection::new(options), Surreal::new())
    }

    /// Connects and negotiates the server version.
    ///
    /// # Errors
    ///
    /// Any connection error, or [`Error::RequestTimeout`] if the server does
    /// not answer `version` in time.
    pub fn connect(options: ConnectionOptions) -> Result<Self> {
        Self::negotiate(Connection::new(options))
    }

    /// Negotiates the server version over an existing connection.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn negotiate(connection: Connection) -> Result<Self> {
        let mut driver = Self::new(connection, Surreal::new());
        driver.version();
        driver.exec(true)?;
        Ok(driver)
    }
}

// ============================================================================
// SurrealDriver - RPC Methods
// ============================================================================

impl Driver<Surreal> {
    /// Signs in a root, namespace, database or scope user.
    ///
    /// Before server 2.0.0, or while the version is unknown, the namespace
    /// and database from [`use_namespace`](Self::use_namespace) are added to
    /// `auth` when missing.
    pub fn signin(&mut self, auth: Value) -> TaskHandle<'_> {
        let mut auth = auth;
        if self.protocol.needs_scoped_signin()
            && let Some(fields) = auth.as_object_mut()
        {
            fields
                .entry("ns")
                .or_insert_with(|| Value::String(self.protocol.namespace.clone()));
            fields
                .entry("db")
                .or_insert_with(|| Value::String(self.protocol.database.clone()));
        }
        self.protocol.add_task("signin", Some(json!([auth])), true)
    }

    /// Selects the namespace and database for this connection.
    pub fn use_namespace(&mut self, namespace: &str, database: &str) -> TaskHandle<'_> {
        self.protocol.namespace = namespace.to_string();
        self.protocol.database = database.to_string();
        self.protocol
            .add_task("use", Some(json!([namespace, database])), true)
    }

    /// Runs a SurrealQL query with optional variables.
    pub fn query(&mut self, sql: &str, vars: Option<Value>) -> TaskHandle<'_> {
        self.protocol
            .add_task("query", Some(task::query_params(sql, vars)), false)
    }

    /// Starts a live query from a `SELECT` statement (without the `LIVE` keyword).
    ///
    /// Attach watchers with [`TaskHandle::on_change`].
    pub fn live_query(&mut self, sql: &str, vars: Option<Value>) -> TaskHandle<'_> {
        let params = task::query_params(&format!("LIVE {sql}"), vars);
        self.protocol.add_task("live", Some(params), false)
    }

    /// Starts a live query on a whole table.
    pub fn live(&mut self, table: &str, diff: bool) -> TaskHandle<'_> {
        self.protocol
            .add_task("live", Some(json!([table, diff])), false)
    }

    /// Adds a watcher to a running live query.
    ///
    /// Does nothing if `live_id` is not a running live query.
    pub fn live_listener<F>(&mut self, live_id: &LiveId, callback: F) -> &mut Self
    where
        F: FnMut(&str, &Value) + 'static,
    {
        match self.protocol.live.get_mut(live_id) {
            Some(watchers) => watchers.push(task::watcher(callback)),
            None => warn!(%live_id, "Listener for unknown live query"),
        }
        self
    }

    /// Defines a connection-scoped variable.
    pub fn let_var(&mut self, name: &str, value: Value) -> TaskHandle<'_> {
        self.protocol.add_task("let", Some(json!([name, value])), true)
    }

    /// Removes a connection-scoped variable.
    pub fn unset(&mut self, name: &str) -> TaskHandle<'_> {
        self.protocol.add_task("unset", Some(json!([name])), true)
    }

    /// Stops a live query. Its watchers are dropped once the server confirms.
    pub fn kill(&mut self, live_id: &LiveId) -> TaskHandle<'_> {
        self.protocol
            .add_task("kill", Some(json!([live_id.as_str()])), false)
    }

    /// Authenticates with a token.
    pub fn authenticate(&mut self, token: &str) -> TaskHandle<'_> {
        self.protocol
            .add_task("authenticate", Some(json!([token])), true)
    }

    /// Invalidates the session.
    pub fn invalidate(&mut self) -> TaskHandle<'_> {
        self.protocol.add_task("invalidate", None, true)
    }

    /// Fetches the record of the authenticated user.
    pub fn info(&mut self) -> TaskHandle<'_> {
        self.protocol.add_task("info", None, true)
    }

    /// Asks the server for its version. The reply also updates
    /// [`server_version`](Self::server_version).
    pub fn version(&mut self) -> TaskHandle<'_> {
        self.protocol.add_task("version", None, true)
    }
}

// ============================================================================
// SurrealDriver - Accessors
// ============================================================================

impl Driver<Surreal> {
    /// Returns the negotiated server version.
    #[inline]
    #[must_use]
    pub fn server_version(&self) -> Option<&Version> {
        self.protocol.version.as_ref()
    }

    /// Returns the namespace from the last `use`.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.protocol.namespace
    }

    /// Returns the database from the last `use`.
    #[inline]
    #[must_use]
    pub fn database(&self) -> &str {
        &self.protocol.database
    }

    /// Returns `true` while `live_id` is a running live query.
    #[must_use]
    pub fn is_live(&self, live_id: &LiveId) -> bool {
        self.protocol.live.contains_key(live_id)
    }

    /// Returns the number of running live queries.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.protocol.live.len()
    }

    /// Returns the number of calls waiting to be sent or answered.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.protocol.tasks.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
