//! Generic protocol driver over one connection.
//!
//! A [`Driver`] pairs a [`Connection`] with a [`Protocol`] implementation and
//! defines the cooperative execution step.
//!
//! # Execution Step
//!
//! ```text
//! exec(blocking):
//!   loop
//!     poll socket (zero timeout)
//!     if readable: read ONE frame -> pong if ping -> protocol.message -> listeners
//!     if !blocking: run due timers, protocol.step, return
//!     if !protocol.step: return      (no more pending work)
//! ```
//!
//! Only one frame is drained per pass; a busy peer is drained across many
//! scheduler ticks instead of in one burst.
//!
//! # Example
//!
//! ```ignore
//! use websocket_queue::{ConnectionOptions, NatsDriver};
//!
//! let mut nats = NatsDriver::open(ConnectionOptions::new("ws://127.0.0.1:8080"));
//! nats.subscribe("greet", None, |msg| println!("{}", msg.text()));
//! loop {
//!     nats.exec(false)?;
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, Opcode};
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Pause between empty polls while blocking.
const IDLE_BACKOFF: Duration = Duration::from_micros(100);

// ============================================================================
// Protocol
// ============================================================================

/// Application protocol spoken over a WebSocket connection.
pub trait Protocol {
    /// Sends queued work. Returns `true` while work is still pending.
    ///
    /// # Errors
    ///
    /// Any error raised while writing to the connection.
    fn step(&mut self, connection: &mut Connection) -> Result<bool>;

    /// Handles one inbound data or control frame (never `Close`).
    ///
    /// # Errors
    ///
    /// A fatal protocol or correlation error.
    fn message(&mut self, frame: &Frame, connection: &mut Connection) -> Result<()>;
}

// ============================================================================
// Exec
// ============================================================================

/// A unit the [`Queue`](crate::Queue) can drive.
pub trait Exec {
    /// Runs one execution step; see [`Driver::exec`].
    ///
    /// # Errors
    ///
    /// Any transport, protocol or timeout error.
    fn exec(&mut self, blocking: bool) -> Result<()>;
}

// ============================================================================
// Driver
// ============================================================================

/// A protocol bound to one connection.
pub struct Driver<P> {
    /// The owned connection.
    pub(crate) connection: Connection,
    /// Protocol state, including its task table.
    pub(crate) protocol: P,
}

impl<P> fmt::Debug for Driver<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Driver - Public API
// ============================================================================

impl<P: Protocol> Driver<P> {
    /// Binds `protocol` to `connection`.
    #[inline]
    #[must_use]
    pub fn new(connection: Connection, protocol: P) -> Self {
        Self {
            connection,
            protocol,
        }
    }

    /// Returns the connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the connection mutably.
    #[inline]
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Returns the protocol state.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Adds a timer with the default 1 s minimum interval.
    pub fn on_timer<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut() + 'static,
    {
        self.connection.on_timer(callback);
        self
    }

    /// Adds a timer with an explicit minimum interval.
    pub fn register_timer<F>(&mut self, callback: F, interval: Duration) -> &mut Self
    where
        F: FnMut() + 'static,
    {
        self.connection.register_timer(callback, interval);
        self
    }

    /// Adds a raw frame listener, called after protocol dispatch.
    pub fn on_message<F>(&mut self, listener: F) -> &mut Self
    where
        F: FnMut(&Frame) + 'static,
    {
        self.connection.on_message(listener);
        self
    }

    /// Adds a hook run once after the handshake.
    pub fn on_connect<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut() + 'static,
    {
        self.connection.on_connect(hook);
        self
    }

    /// Runs the cooperative execution step.
    ///
    /// Non-blocking: at most one frame is read and dispatched, due timers
    /// run, the protocol step runs once, and the call returns.
    ///
    /// Blocking: repeats read-and-step until the protocol step reports no
    /// pending work. It monopolizes the thread, so it must not be called from
    /// inside a [`Queue`](crate::Queue) loop.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if blocking exceeds the request timeout
    /// - [`Error::ConnectionClosed`] if the peer sent a close frame
    /// - Any transport, protocol or correlation error
    pub fn exec(&mut self, blocking: bool) -> Result<()> {
        let started = Instant::now();
        let timeout = self.connection.options().request_timeout();

        loop {
            let handled = self.pump()?;

            if !blocking {
                self.connection.run_timers();
                self.protocol.step(&mut self.connection)?;
                return Ok(());
            }

            if !self.protocol.step(&mut self.connection)? {
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(Error::request_timeout(timeout.as_millis() as u64));
            }
            if !handled {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns the transport shutdown error, if any.
    pub fn close(&mut self) -> Result<()> {
        self.connection.close()
    }

    /// Reads and dispatches at most one frame. Returns whether one was read.
    fn pump(&mut self) -> Result<bool> {
        if !self.connection.poll_readable()? {
            return Ok(false);
        }

        let frame = self.connection.read_frame()?;
        if frame.opcode == Opcode::Close {
            debug!(url = %self.connection.options().url(), "Peer sent close frame");
            self.connection.dispatch(&frame);
            self.connection.close()?;
            return Err(Error::ConnectionClosed);
        }

        if frame.opcode == Opcode::Ping {
            trace!(length = frame.payload.len(), "Answering ping");
            self.connection.send(&Frame::pong(frame.payload.clone()))?;
        }

        trace!(opcode = %frame.opcode, "Dispatching frame");
        self.protocol.message(&frame, &mut self.connection)?;
        self.connection.dispatch(&frame);
        Ok(true)
    }
}

impl<P: Protocol> Exec for Driver<P> {
    fn exec(&mut self, blocking: bool) -> Result<()> {
        Driver::exec(self, blocking)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::protocol::frame::Opcode;
    use crate::transport::{ConnectionOptions, mock};

    /// Protocol that records frames and reports `pending` steps of work.
    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
        pending: u32,
        steps: u32,
    }

    impl Protocol for Recorder {
        fn step(&mut self, _connection: &mut Connection) -> Result<bool> {
            self.steps += 1;
            self.pending = self.pending.saturating_sub(1);
            Ok(self.pending > 0)
        }

        fn message(&mut self, frame: &Frame, _connection: &mut Connection) -> Result<()> {
            self.frames.push(frame.payload.clone());
            Ok(())
        }
    }

    fn driver() -> (Driver<Recorder>, mock::MockHandle) {
        let (connection, handle) = mock::connection();
        (Driver::new(connection, Recorder::default()), handle)
    }

    #[test]
    fn test_non_blocking_reads_one_frame_per_pass() {
        let (mut driver, handle) = driver();
        driver.connection_mut().connect().unwrap();
        handle.push_text("a");
        handle.push_text("b");

        driver.exec(false).unwrap();
        assert_eq!(driver.protocol().frames, vec![b"a".to_vec()]);

        driver.exec(false).unwrap();
        assert_eq!(driver.protocol().frames.len(), 2);
        assert_eq!(driver.protocol().steps, 2);
    }

    #[test]
    fn test_non_blocking_runs_due_timers() {
        let (mut driver, _handle) = driver();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        driver.on_timer(move || counter.set(counter.get() + 1));

        driver.exec(false).unwrap();
        driver.exec(false).unwrap();

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_protocol_sees_frame_before_listeners() {
        let (mut driver, handle) = driver();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        driver.on_message(move |frame| sink.borrow_mut().push(frame.payload.clone()));

        driver.connection_mut().connect().unwrap();
        handle.push_text("x");
        driver.exec(false).unwrap();

        assert_eq!(driver.protocol().frames.len(), 1);
        assert_eq!(*seen.borrow(), vec![b"x".to_vec()]);
    }

    #[test]
    fn test_blocking_loops_until_step_done() {
        let (mut driver, _handle) = driver();
        driver.protocol.pending = 5;

        driver.exec(true).unwrap();

        assert_eq!(driver.protocol().steps, 5);
    }

    #[test]
    fn test_blocking_times_out() {
        let (transport, _handle) = mock::pair();
        let options = ConnectionOptions::new("ws://mock.test")
            .with_request_timeout(Duration::from_millis(20));
        let connection = Connection::with_transport(options, Box::new(transport));
        let mut driver = Driver::new(connection, Recorder::default());
        driver.protocol.pending = u32::MAX;

        let err = driver.exec(true).unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 20 }));
    }

    #[test]
    fn test_ping_is_answered_with_matching_pong() {
        let (mut driver, handle) = driver();
        driver.connection_mut().connect().unwrap();
        handle.push_frame(&mock::server_frame(Opcode::Ping, b"hb"));

        driver.exec(false).unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, Opcode::Pong);
        assert!(sent[0].masked);
        assert_eq!(sent[0].payload, b"hb");
        assert_eq!(driver.protocol().frames, vec![b"hb".to_vec()]);
    }

    #[test]
    fn test_close_frame_surfaces_connection_closed() {
        let (mut driver, handle) = driver();
        driver.connection_mut().connect().unwrap();
        handle.push_frame(&mock::server_frame(Opcode::Close, &[]));

        let err = driver.exec(false).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(driver.protocol().frames.is_empty());
        assert_eq!(handle.sent().last().map(|f| f.opcode), Some(Opcode::Close));
        assert!(!driver.connection().is_open());
    }
}
