//! NATS publish/subscribe driver.
//!
//! Speaks the NATS text protocol over WebSocket binary frames.
//!
//! # Task Lifecycle
//!
//! ```text
//! new ──step()──► sent ──► removed          (PUB, UNSUB)
//! new ──step()──► sent ──► kept until UNSUB (SUB)
//! ```
//!
//! Every task is keyed by a per-driver counter, which doubles as the NATS
//! subscription id. Inbound `MSG` lines are correlated by that sid; the
//! server echoes the concrete subject, which differs from the subscribed
//! one for wildcard subscriptions.
//!
//! # Replying from a callback
//!
//! The driver is mutably borrowed while a subscription callback runs.
//! Callbacks registered with [`subscribe_with_outbox`](Driver::subscribe_with_outbox)
//! get an [`Outbox`] instead; what they queue there joins the task table as
//! soon as the callback returns and goes out on the next step.
//!
//! # Keep-alive
//!
//! `step()` sends `PING` when none was sent during the last 30 seconds.
//! A server `PING` is answered with `PONG` immediately.

// ============================================================================
// Submodules
// ============================================================================

/// Server protocol parser.
pub mod parser;

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::identifiers::Sid;
use crate::protocol::frame::{Frame, Opcode};
use crate::transport::{Connection, ConnectionOptions};

use super::core::{Driver, Protocol};

pub use parser::{CRLF, Msg, ServerInfo, ServerOp};

// ============================================================================
// Constants
// ============================================================================

/// Keep-alive interval.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Subscription callback.
pub type MsgCallback = Box<dyn FnMut(&Msg, &mut Outbox)>;

/// Hook for `-ERR` lines.
pub type ErrorHook = Box<dyn FnMut(&str)>;

/// NATS driver.
pub type NatsDriver = Driver<Nats>;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    New,
    Sent,
}

/// One outbound protocol operation.
struct Task {
    /// `SUB`, `PUB` or `UNSUB`.
    method: &'static str,
    /// Target subject (empty for `UNSUB`).
    subject: String,
    status: Status,
    /// Serialized operation, without the trailing CRLF.
    payload: Vec<u8>,
    /// Message callback, subscriptions only.
    callback: Option<MsgCallback>,
}

impl Task {
    fn is_subscription(&self) -> bool {
        self.method == "SUB"
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Operations queued by a subscription callback.
#[derive(Debug, Default)]
pub struct Outbox {
    ops: Vec<Outbound>,
}

#[derive(Debug)]
enum Outbound {
    Publish { subject: String, payload: Vec<u8> },
    Unsubscribe(Sid),
}

impl Outbox {
    /// Queues a publish of `body` to `subject`.
    pub fn publish(&mut self, subject: &str, body: impl AsRef<[u8]>) -> &mut Self {
        self.ops.push(Outbound::Publish {
            subject: subject.to_string(),
            payload: pub_payload(subject, None, body.as_ref()),
        });
        self
    }

    /// Queues a publish of `body` to `subject` with a reply subject.
    pub fn publish_with_reply(
        &mut self,
        subject: &str,
        reply_to: &str,
        body: impl AsRef<[u8]>,
    ) -> &mut Self {
        self.ops.push(Outbound::Publish {
            subject: subject.to_string(),
            payload: pub_payload(subject, Some(reply_to), body.as_ref()),
        });
        self
    }

    /// Queues the cancellation of a subscription, possibly the calling one.
    pub fn unsubscribe(&mut self, sid: Sid) -> &mut Self {
        self.ops.push(Outbound::Unsubscribe(sid));
        self
    }

    /// Returns the number of queued operations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ============================================================================
// Nats
// ============================================================================

/// NATS protocol state: task table, keep-alive clock and server info.
pub struct Nats {
    /// Next task key / sid.
    counter: u64,
    /// Tasks in creation order.
    tasks: BTreeMap<Sid, Task>,
    /// When the last `PING` was sent.
    last_ping: Option<Instant>,
    /// Latest `INFO` from the server.
    server_info: Option<ServerInfo>,
    /// Receiver for `-ERR` reasons.
    error_hook: Option<ErrorHook>,
}

impl Default for Nats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Nats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nats")
            .field("counter", &self.counter)
            .field("tasks", &self.tasks.len())
            .field("last_ping", &self.last_ping)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl Nats {
    /// Creates an empty protocol state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: 0,
            tasks: BTreeMap::new(),
            last_ping: None,
            server_info: None,
            error_hook: None,
        }
    }

    /// Queues a task and returns its key.
    fn add_task(
        &mut self,
        method: &'static str,
        subject: &str,
        payload: Vec<u8>,
        callback: Option<MsgCallback>,
    ) -> Sid {
        let sid = Sid::new(self.counter);
        self.counter += 1;
        debug!(method, subject, %sid, "NATS task queued");
        self.tasks.insert(
            sid,
            Task {
                method,
                subject: subject.to_string(),
                status: Status::New,
                payload,
                callback,
            },
        );
        sid
    }

    /// Queues `SUB` with a pre-computed sid.
    fn subscribe(
        &mut self,
        subject: &str,
        queue_group: Option<&str>,
        callback: MsgCallback,
    ) -> Sid {
        let sid = Sid::new(self.counter);
        let payload = match queue_group {
            Some(queue) => format!("SUB {subject} {queue} {sid}"),
            None => format!("SUB {subject} {sid}"),
        };
        self.add_task("SUB", subject, payload.into_bytes(), Some(callback))
    }

    /// Drops a subscription and queues `UNSUB`.
    fn unsubscribe(&mut self, sid: Sid) {
        if self.tasks.remove(&sid).is_some() {
            let payload = format!("UNSUB {sid}").into_bytes();
            self.add_task("UNSUB", "", payload, None);
        }
    }

    /// Moves what callbacks queued into the task table.
    fn flush(&mut self, outbox: Outbox) {
        for op in outbox.ops {
            match op {
                Outbound::Publish { subject, payload } => {
                    self.add_task("PUB", &subject, payload, None);
                }
                Outbound::Unsubscribe(sid) => self.unsubscribe(sid),
            }
        }
    }

    /// Sends one protocol line (CRLF appended) in a masked binary frame.
    fn send_line(connection: &mut Connection, line: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + CRLF.len());
        data.extend_from_slice(line);
        data.extend_from_slice(CRLF);
        connection.send(&Frame::binary(data))
    }

    /// Sends `PING` and restarts the keep-alive clock.
    fn ping(&mut self, connection: &mut Connection) -> Result<()> {
        trace!("NATS -> PING");
        Self::send_line(connection, b"PING")?;
        self.last_ping = Some(Instant::now());
        Ok(())
    }

    /// Sends `PING` if the keep-alive interval has elapsed.
    fn auto_ping(&mut self, connection: &mut Connection, interval: Duration) -> Result<()> {
        let due = match self.last_ping {
            None => true,
            Some(last) => last.elapsed() > interval,
        };
        if due {
            self.ping(connection)?;
        }
        Ok(())
    }

    /// Routes a `MSG` to its subscription.
    fn deliver(&mut self, msg: &Msg) {
        let mut outbox = Outbox::default();
        match self.tasks.get_mut(&msg.sid) {
            Some(task) if task.is_subscription() => {
                let bytes = msg.payload.len();
                trace!(subject = %msg.subject, sid = %msg.sid, bytes, "NATS MSG");
                if let Some(callback) = task.callback.as_mut() {
                    callback(msg, &mut outbox);
                }
            }
            _ => {
                warn!(subject = %msg.subject, sid = %msg.sid, "Listener not found for MSG");
            }
        }
        self.flush(outbox);
    }
}

impl Protocol for Nats {
    fn step(&mut self, connection: &mut Connection) -> Result<bool> {
        for (sid, task) in self.tasks.iter_mut() {
            if task.status == Status::New {
                Self::send_line(connection, &task.payload)?;
                task.status = Status::Sent;
                let subject = &task.subject;
                trace!(method = task.method, %subject, %sid, "NATS task sent");
            }
        }
        self.tasks
            .retain(|_, task| task.is_subscription() || task.status == Status::New);

        self.auto_ping(connection, PING_INTERVAL)?;
        Ok(false)
    }

    fn message(&mut self, frame: &Frame, connection: &mut Connection) -> Result<()> {
        if !matches!(frame.opcode, Opcode::Text | Opcode::Binary) {
            trace!(opcode = %frame.opcode, "Ignoring non-data frame");
            return Ok(());
        }

        for op in parser::parse(&frame.payload)? {
            match op {
                ServerOp::Info(info) => {
                    debug!(server = ?info.server_name, version = ?info.version, "NATS INFO");
                    self.server_info = Some(info);
                }
                ServerOp::Ping => {
                    trace!("NATS <- PING");
                    Self::send_line(connection, b"PONG")?;
                }
                ServerOp::Pong => trace!("NATS <- PONG"),
                ServerOp::Ok => trace!("NATS <- +OK"),
                ServerOp::Err(reason) => match self.error_hook.as_mut() {
                    Some(hook) => hook(&reason),
                    None => warn!(%reason, "NATS -ERR"),
                },
                ServerOp::Msg(msg) => self.deliver(&msg),
                ServerOp::Unknown(line) => warn!(%line, "Event not found"),
            }
        }
        Ok(())
    }
}

// ============================================================================
// NatsDriver - Public API
// ============================================================================

impl Driver<Nats> {
    /// Creates a NATS driver that connects lazily with `options`.
    #[must_use]
    pub fn open(options: ConnectionOptions) -> Self {
        Self::new(Connection::new(options), Nats::new())
    }

    /// Subscribes to `subject`, optionally in a queue group.
    ///
    /// Emits `SUB <subject>[ <queue>] <sid>` on the next step.
    pub fn subscribe<F>(&mut self, subject: &str, queue_group: Option<&str>, callback: F) -> Sid
    where
        F: FnMut(&Msg) + 'static,
    {
        let mut callback = callback;
        self.protocol.subscribe(
            subject,
            queue_group,
            Box::new(move |msg: &Msg, _: &mut Outbox| callback(msg)),
        )
    }

    /// Subscribes with a callback that can publish and unsubscribe.
    ///
    /// # Example
    ///
    /// ```ignore
    /// nats.subscribe_with_outbox("svc.echo", None, |msg, outbox| {
    ///     if let Some(reply_to) = &msg.reply_to {
    ///         outbox.publish(reply_to, &msg.payload);
    ///     }
    /// });
    /// ```
    pub fn subscribe_with_outbox<F>(
        &mut self,
        subject: &str,
        queue_group: Option<&str>,
        callback: F,
    ) -> Sid
    where
        F: FnMut(&Msg, &mut Outbox) + 'static,
    {
        self.protocol.subscribe(subject, queue_group, Box::new(callback))
    }

    /// Publishes `body` to `subject`.
    ///
    /// Emits `PUB <subject> <#bytes>\r\n<body>` on the next step.
    pub fn publish(&mut self, subject: &str, body: impl AsRef<[u8]>) -> &mut Self {
        let payload = pub_payload(subject, None, body.as_ref());
        self.protocol.add_task("PUB", subject, payload, None);
        self
    }

    /// Publishes `body` to `subject` with a reply subject.
    pub fn publish_with_reply(
        &mut self,
        subject: &str,
        reply_to: &str,
        body: impl AsRef<[u8]>,
    ) -> &mut Self {
        let payload = pub_payload(subject, Some(reply_to), body.as_ref());
        self.protocol.add_task("PUB", subject, payload, None);
        self
    }

    /// Cancels a subscription.
    ///
    /// The callback is dropped immediately; `UNSUB <sid>` goes out on the
    /// next step. Messages still in flight are reported as orphans.
    pub fn unsubscribe(&mut self, sid: Sid) -> &mut Self {
        self.protocol.unsubscribe(sid);
        self
    }

    /// Installs a hook receiving `-ERR` reasons.
    pub fn on_error<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&str) + 'static,
    {
        self.protocol.error_hook = Some(Box::new(hook));
        self
    }

    /// Sends `PING` now.
    ///
    /// # Errors
    ///
    /// Any transport error.
    pub fn ping(&mut self) -> Result<()> {
        self.protocol.ping(&mut self.connection)
    }

    /// Returns the latest server `INFO`.
    #[inline]
    #[must_use]
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.protocol.server_info.as_ref()
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.protocol
            .tasks
            .values()
            .filter(|task| task.is_subscription())
            .count()
    }

    /// Returns the number of tasks not yet sent.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.protocol
            .tasks
            .values()
            .filter(|task| task.status == Status::New)
            .count()
    }
}

/// Serializes a `PUB` operation.
fn pub_payload(subject: &str, reply_to: Option<&str>, body: &[u8]) -> Vec<u8> {
    let header = match reply_to {
        Some(reply_to) => format!("PUB {subject} {reply_to} {}\r\n", body.len()),
        None => format!("PUB {subject} {}\r\n", body.len()),
    };
    let mut payload = header.into_bytes();
    payload.extend_from_slice(body);
    payload
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::transport::mock::{self, MockHandle};

    fn driver() -> (NatsDriver, MockHandle) {
        let (connection, handle) = mock::connection();
        let mut driver = Driver::new(connection, Nats::new());
        driver.connection_mut().connect().unwrap();
        (driver, handle)
    }

    fn count(handle: &MockHandle, line: &str) -> usize {
        handle.sent_texts().iter().filter(|t| *t == line).count()
    }

    #[test]
    fn test_subscribe_sends_sub_and_keeps_task() {
        let (mut nats, handle) = driver();
        let sid = nats.subscribe("foo", None, |_| {});

        nats.exec(false).unwrap();

        assert_eq!(count(&handle, &format!("SUB foo {sid}\r\n")), 1);
        assert_eq!(nats.subscription_count(), 1);
        assert_eq!(nats.pending_count(), 0);

        nats.exec(false).unwrap();
        assert_eq!(count(&handle, &format!("SUB foo {sid}\r\n")), 1);
    }

    #[test]
    fn test_subscribe_with_queue_group() {
        let (mut nats, handle) = driver();
        let sid = nats.subscribe("jobs", Some("workers"), |_| {});
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, &format!("SUB jobs workers {sid}\r\n")), 1);
    }

    #[test]
    fn test_publish_is_sent_once_and_removed() {
        let (mut nats, handle) = driver();
        nats.publish("greet", "hello");

        nats.exec(false).unwrap();
        nats.exec(false).unwrap();

        assert_eq!(count(&handle, "PUB greet 5\r\nhello\r\n"), 1);
        assert_eq!(nats.protocol().tasks.len(), 0);
        assert!(handle.sent().iter().all(|f| f.opcode == Opcode::Binary && f.masked));
    }

    #[test]
    fn test_publish_with_reply_subject() {
        let (mut nats, handle) = driver();
        nats.publish_with_reply("svc.echo", "_INBOX.1", b"ping".to_vec());
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, "PUB svc.echo _INBOX.1 4\r\nping\r\n"), 1);
    }

    #[test]
    fn test_publish_counts_bytes_not_chars() {
        let (mut nats, handle) = driver();
        nats.publish("utf", "héllo");
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, "PUB utf 6\r\nhéllo\r\n"), 1);
    }

    #[test]
    fn test_msg_invokes_subscription_callback_once() {
        let (mut nats, handle) = driver();
        let bodies = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&bodies);
        let sid = nats.subscribe("foo", None, move |msg| sink.borrow_mut().push(msg.text()));
        nats.exec(false).unwrap();

        handle.push_binary(format!("MSG foo {sid} 5\r\nhello\r\n").as_bytes());
        nats.exec(false).unwrap();
        nats.exec(false).unwrap();

        assert_eq!(*bodies.borrow(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_orphan_msg_is_not_fatal() {
        let (mut nats, handle) = driver();
        let hits = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&hits);
        nats.subscribe("foo", None, move |_| *sink.borrow_mut() += 1);
        nats.exec(false).unwrap();

        handle.push_binary(b"MSG bar 99 3\r\nabc\r\n");
        nats.exec(false).unwrap();

        assert_eq!(*hits.borrow(), 0);
        assert_eq!(nats.subscription_count(), 1);
    }

    #[test]
    fn test_wildcard_subject_routes_by_sid() {
        let (mut nats, handle) = driver();
        let subjects = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&subjects);
        let sid = nats.subscribe("orders.*", None, move |msg| {
            sink.borrow_mut().push(msg.subject.clone());
        });
        nats.exec(false).unwrap();

        handle.push_binary(format!("MSG orders.created {sid} 2\r\n{{}}\r\n").as_bytes());
        nats.exec(false).unwrap();

        assert_eq!(*subjects.borrow(), vec!["orders.created".to_string()]);
    }

    #[test]
    fn test_unsubscribe_sends_unsub_and_drops_callback() {
        let (mut nats, handle) = driver();
        let hits = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&hits);
        let sid = nats.subscribe("foo", None, move |_| *sink.borrow_mut() += 1);
        nats.exec(false).unwrap();

        nats.unsubscribe(sid);
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, &format!("UNSUB {sid}\r\n")), 1);
        assert_eq!(nats.subscription_count(), 0);

        handle.push_binary(format!("MSG foo {sid} 1\r\nx\r\n").as_bytes());
        nats.exec(false).unwrap();
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_first_step_pings_then_waits_for_interval() {
        let (mut nats, handle) = driver();

        nats.exec(false).unwrap();
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, "PING\r\n"), 1);

        let overdue = PING_INTERVAL + Duration::from_secs(1);
        nats.protocol.last_ping = Instant::now().checked_sub(overdue);
        nats.exec(false).unwrap();
        nats.exec(false).unwrap();
        assert_eq!(count(&handle, "PING\r\n"), 2);
    }

    #[test]
    fn test_server_ping_gets_one_pong() {
        let (mut nats, handle) = driver();
        nats.exec(false).unwrap();
        handle.clear_sent();

        handle.push_binary(b"PING\r\n");
        nats.exec(false).unwrap();

        assert_eq!(count(&handle, "PONG\r\n"), 1);
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn test_info_is_cached() {
        let (mut nats, handle) = driver();
        handle.push_binary(b"INFO {\"server_name\":\"n1\",\"version\":\"2.10.7\"}\r\n");
        nats.exec(false).unwrap();

        let info = nats.server_info().unwrap();
        assert_eq!(info.server_name.as_deref(), Some("n1"));
    }

    #[test]
    fn test_err_goes_to_error_hook() {
        let (mut nats, handle) = driver();
        let reasons = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reasons);
        nats.on_error(move |reason| sink.borrow_mut().push(reason.to_string()));

        handle.push_binary(b"-ERR 'Authorization Violation'\r\n");
        nats.exec(false).unwrap();

        assert_eq!(*reasons.borrow(), vec!["Authorization Violation".to_string()]);
    }

    #[test]
    fn test_callback_replies_through_outbox() {
        let (mut nats, handle) = driver();
        let sid = nats.subscribe_with_outbox("svc.echo", None, |msg, outbox| {
            if let Some(reply_to) = &msg.reply_to {
                outbox.publish(reply_to, &msg.payload);
            }
        });
        nats.exec(false).unwrap();

        handle.push_binary(format!("MSG svc.echo {sid} _INBOX.7 2\r\nhi\r\n").as_bytes());
        nats.exec(false).unwrap();
        nats.exec(false).unwrap();

        assert_eq!(count(&handle, "PUB _INBOX.7 2\r\nhi\r\n"), 1);
        assert_eq!(nats.pending_count(), 0);
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let (mut nats, handle) = driver();
        let hits = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&hits);
        let sid = nats.subscribe_with_outbox("once", None, move |msg, outbox| {
            *sink.borrow_mut() += 1;
            outbox.unsubscribe(msg.sid);
        });
        nats.exec(false).unwrap();

        handle.push_binary(format!("MSG once {sid} 1\r\na\r\n").as_bytes());
        nats.exec(false).unwrap();
        handle.push_binary(format!("MSG once {sid} 1\r\nb\r\n").as_bytes());
        nats.exec(false).unwrap();

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(count(&handle, &format!("UNSUB {sid}\r\n")), 1);
        assert_eq!(nats.subscription_count(), 0);
    }

    #[test]
    fn test_server_ping_frame_gets_pong_frame() {
        let (mut nats, handle) = driver();
        nats.exec(false).unwrap();
        handle.clear_sent();

        handle.push_frame(&mock::server_frame(Opcode::Ping, b"keep"));
        nats.exec(false).unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, Opcode::Pong);
        assert_eq!(sent[0].payload, b"keep");
    }

    #[test]
    fn test_blocking_exec_returns_after_one_pass() {
        let (mut nats, handle) = driver();
        nats.publish("a", "1").publish("b", "2");
        nats.exec(true).unwrap();
        assert_eq!(count(&handle, "PUB a 1\r\n1\r\n"), 1);
        assert_eq!(count(&handle, "PUB b 1\r\n2\r\n"), 1);
    }
}
