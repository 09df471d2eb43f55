//! WebSocket Queue - Cooperative WebSocket client runtime.
//!
//! This library drives many WebSocket connections from a single thread and
//! speaks two application protocols over them: NATS publish/subscribe and
//! SurrealDB RPC with live queries.
//!
//! # Architecture
//!
//! ```text
//! Queue ─► Driver::exec(false) ─► Connection ─► frame codec ─► Transport
//!               │                      │
//!               ▼                      ▼
//!      Protocol::step / message    listeners, timers, connect hooks
//!               │
//!               ▼
//!      task table ─► application callback
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns its socket; the handshake runs once, lazily
//! - One non-blocking `exec` reads at most one frame, so a busy peer never
//!   starves the other drivers
//! - Each driver owns its task table and correlates replies by id
//! - No reactor, no threads: all suspension is an explicit zero-timeout poll
//!
//! # Quick Start
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use websocket_queue::{ConnectionOptions, NatsDriver, Queue, Result, SurrealDriver};
//!
//! fn main() -> Result<()> {
//!     let nats = Rc::new(RefCell::new(NatsDriver::open(ConnectionOptions::new(
//!         "ws://127.0.0.1:8080",
//!     ))));
//!     nats.borrow_mut()
//!         .subscribe("orders.*", None, |msg| println!("{}: {}", msg.subject, msg.text()));
//!
//!     let surreal = SurrealDriver::connect(ConnectionOptions::new("ws://127.0.0.1:8000/rpc"))?;
//!     let surreal = Rc::new(RefCell::new(surreal));
//!     surreal
//!         .borrow_mut()
//!         .live_query("SELECT * FROM orders", None)
//!         .on_change(|action, record| println!("{action}: {record}"));
//!
//!     let mut queue = Queue::new();
//!     queue.register(nats);
//!     queue.register(surreal);
//!     queue.run_forever()
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`driver`] | Generic driver, NATS and SurrealDB protocols |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | WebSocket frame codec and handshake |
//! | [`queue`] | Cooperative scheduler |
//! | [`transport`] | Sockets, connections and timers |

// ============================================================================
// Modules
// ============================================================================

/// Protocol drivers.
///
/// [`Driver`] pairs a connection with a [`Protocol`]; [`NatsDriver`] and
/// [`SurrealDriver`] are the two shipped protocols.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for correlation entries.
pub mod identifiers;

/// WebSocket wire protocol: frames and handshake.
pub mod protocol;

/// Cooperative scheduler.
pub mod queue;

/// Socket transport, connection and timers.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Driver types
pub use driver::{
    Driver, Exec, Msg, Nats, NatsDriver, Protocol, ServerInfo, Surreal, SurrealDriver, TaskHandle,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{LiveId, RequestId, Sid};

// Wire types
pub use protocol::{Frame, Opcode};

// Scheduler
pub use queue::Queue;

// Transport types
pub use transport::{Connection, ConnectionOptions, Transport};
