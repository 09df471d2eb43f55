//! One WebSocket connection and its dispatch lists.
//!
//! A [`Connection`] owns its transport exclusively. The socket is opened
//! lazily on first use, and the opening handshake completes exactly once
//! before any frame is read or written.
//!
//! # Dispatch
//!
//! The connection keeps three ordered lists:
//!
//! - frame listeners, called for every frame read by [`Connection::read_packet`]
//! - interval timers, run by [`Connection::run_timers`]
//! - connect hooks, run once right after the handshake
//!
//! Reading and timer execution are independent operations; the driver layer
//! decides when to call each.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{Level, debug, trace};

use crate::error::{Error, Result};
use crate::protocol::frame::{self, Frame};
use crate::protocol::handshake;

use super::options::ConnectionOptions;
use super::socket::{Endpoint, TcpTransport, Transport};
use super::timer::{DEFAULT_TIMER_INTERVAL, Timer};

// ============================================================================
// Types
// ============================================================================

/// Frame listener callback.
pub type FrameListener = Box<dyn FnMut(&Frame)>;

/// Connect hook callback.
pub type ConnectHook = Box<dyn FnMut()>;

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Handshake not yet performed.
    Pending,
    /// Handshake complete.
    Open,
    /// Closed locally or by the peer.
    Closed,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection over one exclusively owned transport.
pub struct Connection {
    /// Connection settings.
    options: ConnectionOptions,
    /// Transport, `None` until first access when built from options.
    socket: Option<Box<dyn Transport>>,
    /// Lifecycle state.
    state: State,
    /// Frame listeners in registration order.
    listeners: Vec<FrameListener>,
    /// Interval timers in registration order.
    timers: Vec<Timer>,
    /// Hooks run once after the handshake.
    connect_hooks: Vec<ConnectHook>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.options.url())
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructors
// ============================================================================

impl Connection {
    /// Creates a connection that opens a TCP/TLS socket on first use.
    #[must_use]
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            socket: None,
            state: State::Pending,
            listeners: Vec::new(),
            timers: Vec::new(),
            connect_hooks: Vec::new(),
        }
    }

    /// Creates a connection over an already connected transport.
    ///
    /// The handshake still runs on first use.
    #[must_use]
    pub fn with_transport(options: ConnectionOptions, transport: Box<dyn Transport>) -> Self {
        Self {
            socket: Some(transport),
            ..Self::new(options)
        }
    }
}

// ============================================================================
// Connection - Registration
// ============================================================================

impl Connection {
    /// Appends a frame listener.
    pub fn on_message<F>(&mut self, listener: F)
    where
        F: FnMut(&Frame) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Appends a timer with the default 1 s interval.
    pub fn on_timer<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.register_timer(callback, DEFAULT_TIMER_INTERVAL);
    }

    /// Appends a timer with an explicit minimum interval.
    pub fn register_timer<F>(&mut self, callback: F, interval: Duration)
    where
        F: FnMut() + 'static,
    {
        self.timers.push(Timer::new(Box::new(callback), interval));
    }

    /// Appends a hook run once right after the handshake.
    pub fn on_connect<F>(&mut self, hook: F)
    where
        F: FnMut() + 'static,
    {
        self.connect_hooks.push(Box::new(hook));
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Returns the connection settings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns `true` once the handshake has completed and until close.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Opens the socket and performs the handshake if not done yet.
    ///
    /// # Errors
    ///
    /// Any transport or handshake error. A failed handshake closes the
    /// connection.
    pub fn connect(&mut self) -> Result<()> {
        self.transport().map(|_| ())
    }

    /// Encodes and writes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShortWrite`] or another transport error.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame::encode(frame);
        trace!(
            opcode = %frame.opcode,
            length = frame.payload.len(),
            "Sending frame"
        );
        self.transport()?.write_all(&bytes)
    }

    /// Polls the socket for readability without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the peer has gone away.
    pub fn poll_readable(&mut self) -> Result<bool> {
        self.transport()?.poll_readable()
    }

    /// Decodes exactly one frame without dispatching it.
    ///
    /// # Errors
    ///
    /// Any decode or transport error.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let socket = self.transport()?;
        let frame = frame::decode(|length| socket.read_exact(length))?;
        trace!(
            opcode = %frame.opcode,
            length = frame.payload.len(),
            fin = frame.fin,
            "Received frame"
        );
        Ok(frame)
    }

    /// Invokes every listener with `frame`, in registration order.
    pub fn dispatch(&mut self, frame: &Frame) {
        for listener in &mut self.listeners {
            listener(frame);
        }
    }

    /// Decodes one frame and dispatches it to all listeners.
    ///
    /// # Errors
    ///
    /// Any decode or transport error.
    pub fn read_packet(&mut self) -> Result<Frame> {
        let frame = self.read_frame()?;
        self.dispatch(&frame);
        Ok(frame)
    }

    /// Runs every timer whose interval has elapsed, in registration order.
    pub fn run_timers(&mut self) {
        let now = Instant::now();
        for (index, timer) in self.timers.iter_mut().enumerate() {
            if timer.fire_if_due(now) {
                trace!(index, "Timer fired");
            }
        }
    }

    /// Sends a close frame and shuts the transport down.
    ///
    /// Further use fails with [`Error::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns the shutdown error, if any. A failed close frame is ignored.
    pub fn close(&mut self) -> Result<()> {
        let was_open = self.state == State::Open;
        self.state = State::Closed;

        let Some(mut socket) = self.socket.take() else {
            return Ok(());
        };
        if was_open {
            let _ = socket.write_all(&frame::encode(&Frame::close()));
        }
        self.options.log(Level::INFO, "connection closed");
        debug!(url = %self.options.url(), "Connection closed");
        socket.shutdown()
    }
}

// ============================================================================
// Connection - Internals
// ============================================================================

impl Connection {
    /// Returns the open transport, connecting and handshaking on first use.
    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        match self.state {
            State::Closed => return Err(Error::ConnectionClosed),
            State::Pending => self.open()?,
            State::Open => {}
        }
        self.socket.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Establishes the socket, performs the handshake and runs connect hooks.
    fn open(&mut self) -> Result<()> {
        let endpoint = Endpoint::parse(self.options.url())?;

        if self.socket.is_none() {
            self.options.log(
                Level::DEBUG,
                &format!("connecting to {}:{}", endpoint.host, endpoint.port),
            );
            let transport = TcpTransport::connect(&endpoint, &self.options)?;
            self.socket = Some(Box::new(transport));
        }

        let socket = self.socket.as_mut().ok_or(Error::ConnectionClosed)?;
        self.options.log(Level::DEBUG, "send http request connect");
        if let Err(e) = handshake::perform(&mut **socket, &endpoint, self.options.user_agent()) {
            self.options.log(Level::ERROR, &format!("handshake failed: {e}"));
            self.state = State::Closed;
            if let Some(mut socket) = self.socket.take() {
                let _ = socket.shutdown();
            }
            return Err(e);
        }

        self.state = State::Open;
        self.options.log(Level::INFO, "connection established");
        debug!(url = %self.options.url(), "Connection open");

        for hook in &mut self.connect_hooks {
            hook();
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
