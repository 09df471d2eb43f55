//! WebSocket transport layer.
//!
//! This module owns the socket and everything that happens on it below the
//! protocol drivers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Connection                               │
//! │  listeners ─┐   timers   connect hooks   │
//! │             │                            │
//! │   frame codec (protocol::frame)          │
//! │             │                            │
//! │   Transport (TcpTransport: TCP / TLS)    │
//! └─────────────┼────────────────────────────┘
//!               ▼
//!         ws:// or wss:// peer
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::new` - store options, no socket yet
//! 2. First socket access - TCP connect, TLS for `wss`, opening handshake
//! 3. Connect hooks run once
//! 4. `send` / `read_packet` / `run_timers` - driven by a driver
//! 5. `Connection::close` - close frame and shutdown
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection, listener/timer/hook lists |
//! | `options` | Connection configuration |
//! | `socket` | Transport trait, TCP/TLS transport, URL parsing |
//! | `timer` | Interval timers |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and dispatch lists.
pub mod connection;

/// Connection configuration.
pub mod options;

/// Byte transport and endpoint parsing.
pub mod socket;

/// Interval timers.
pub mod timer;

/// In-memory transport for tests.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectHook, Connection, FrameListener};
pub use options::{ConnectionOptions, Logger};
pub use socket::{Endpoint, TcpTransport, Transport};
pub use timer::{DEFAULT_TIMER_INTERVAL, Timer, TimerCallback};
