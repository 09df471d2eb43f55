//! WebSocket wire protocol.
//!
//! This module implements the RFC 6455 subset the runtime needs: the client
//! opening handshake and single-frame encode/decode. Continuation frames are
//! carried through as-is and never reassembled.
//!
//! # Wire Format Overview
//!
//! | Piece | Direction | Purpose |
//! |-------|-----------|---------|
//! | Upgrade request | Client → Server | HTTP/1.1 `GET` with `Sec-WebSocket-Key` |
//! | Upgrade response | Server → Client | `101` with `Sec-WebSocket-Accept` |
//! | Frame | Both | Header, optional mask, payload |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Opcodes, frames, encode/decode |
//! | `handshake` | Key generation and upgrade validation |

// ============================================================================
// Submodules
// ============================================================================

/// Frame codec.
pub mod frame;

/// Opening handshake.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, Opcode};
pub use handshake::{WS_GUID, compute_accept_key};
