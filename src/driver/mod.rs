//! Protocol drivers.
//!
//! A driver binds one application protocol to one [`Connection`](crate::Connection)
//! and keeps the protocol's table of pending tasks.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Driver`] | Generic connection + protocol pair with the execution step |
//! | [`Protocol`] | Outbound step and inbound dispatch of one protocol |
//! | [`Exec`] | Object-safe execution step used by the [`Queue`](crate::Queue) |
//! | [`NatsDriver`] | NATS publish/subscribe |
//! | [`SurrealDriver`] | SurrealDB RPC with live queries |
//!
//! # Example
//!
//! ```no_run
//! use websocket_queue::{ConnectionOptions, Result, SurrealDriver};
//!
//! # fn example() -> Result<()> {
//! let mut surreal = SurrealDriver::connect(ConnectionOptions::new("ws://127.0.0.1:8000/rpc"))?;
//! surreal.use_namespace("test", "test");
//! surreal
//!     .query("SELECT * FROM person", None)
//!     .on_reply(|result, error| println!("{result:?} {error:?}"))
//!     .blocking(true);
//! surreal.exec(true)?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Generic driver and execution step.
pub mod core;

/// NATS driver.
pub mod nats;

/// SurrealDB driver.
pub mod surreal;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{Driver, Exec, Protocol};
pub use nats::{Msg, Nats, NatsDriver, ServerInfo};
pub use surreal::{LiveCallback, ReplyCallback, Surreal, SurrealDriver, TaskHandle};
