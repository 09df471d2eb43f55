//! In-memory transport for tests.
//!
//! Answers the upgrade request with the correct accept key, records every
//! frame the client writes, and lets a responder closure script replies.

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::protocol::frame::{self, Frame, Opcode};
use crate::protocol::handshake::compute_accept_key;

use super::{Connection, ConnectionOptions, Transport};

// ============================================================================
// Types
// ============================================================================

/// Scripted server behavior: frames to push back for each client frame.
type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame>>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    sent: Vec<Frame>,
    handshake_request: Option<String>,
    accept_override: Option<String>,
    responder: Option<Responder>,
    shut_down: bool,
}

// ============================================================================
// MockHandle
// ============================================================================

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub(crate) struct MockHandle(Rc<RefCell<MockState>>);

impl MockHandle {
    /// Queues a server frame for the client to read.
    pub(crate) fn push_frame(&self, frame: &Frame) {
        self.0.borrow_mut().inbound.extend(frame::encode(frame));
    }

    /// Queues an unmasked server text frame.
    pub(crate) fn push_text(&self, text: &str) {
        self.push_frame(&server_frame(Opcode::Text, text.as_bytes()));
    }

    /// Queues an unmasked server binary frame.
    pub(crate) fn push_binary(&self, data: &[u8]) {
        self.push_frame(&server_frame(Opcode::Binary, data));
    }

    /// Queues raw bytes.
    pub(crate) fn push_raw(&self, data: &[u8]) {
        self.0.borrow_mut().inbound.extend(data.iter().copied());
    }

    /// Returns every frame the client wrote after the handshake.
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.0.borrow().sent.clone()
    }

    /// Returns the payloads of written frames as text.
    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.0
            .borrow()
            .sent
            .iter()
            .map(|frame| frame.text_payload().into_owned())
            .collect()
    }

    /// Forgets recorded frames.
    pub(crate) fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    /// Returns the upgrade request, once written.
    pub(crate) fn handshake_request(&self) -> Option<String> {
        self.0.borrow().handshake_request.clone()
    }

    /// Makes the server answer the handshake with `accept` instead of the correct key.
    pub(crate) fn set_accept_override(&self, accept: &str) {
        self.0.borrow_mut().accept_override = Some(accept.to_string());
    }

    /// Installs a responder called for every client frame.
    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&Frame) -> Vec<Frame> + 'static,
    {
        self.0.borrow_mut().responder = Some(Box::new(responder));
    }

    /// Returns whether the client shut the transport down.
    pub(crate) fn is_shut_down(&self) -> bool {
        self.0.borrow().shut_down
    }
}

// ============================================================================
// MockTransport
// ============================================================================

/// Transport backed by in-memory buffers.
pub(crate) struct MockTransport(Rc<RefCell<MockState>>);

impl MockTransport {
    fn answer_handshake(&self, request: &str) {
        let key = request
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut state = self.0.borrow_mut();
        let accept = state
            .accept_override
            .clone()
            .unwrap_or_else(|| compute_accept_key(&key));
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        state.handshake_request = Some(request.to_string());
        state.inbound.extend(response.into_bytes());
    }

    fn record_frames(&self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let (frame, used) = frame::decode_slice(&data[offset..])?;
            offset += used;

            let responder = {
                let mut state = self.0.borrow_mut();
                state.sent.push(frame.clone());
                state.responder.take()
            };

            if let Some(mut responder) = responder {
                let replies = responder(&frame);
                let mut state = self.0.borrow_mut();
                for reply in &replies {
                    state.inbound.extend(frame::encode(reply));
                }
                state.responder = Some(responder);
            }
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn poll_readable(&mut self) -> Result<bool> {
        Ok(!self.0.borrow().inbound.is_empty())
    }

    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut state = self.0.borrow_mut();
        if state.inbound.len() < length {
            return Err(Error::read_timeout(0));
        }
        Ok(state.inbound.drain(..length).collect())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.0.borrow().handshake_request.is_none() && data.starts_with(b"GET ") {
            self.answer_handshake(&String::from_utf8_lossy(data));
            return Ok(());
        }
        self.record_frames(data)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.0.borrow_mut().shut_down = true;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Creates a connected transport/handle pair.
pub(crate) fn pair() -> (MockTransport, MockHandle) {
    let state = Rc::new(RefCell::new(MockState::default()));
    (MockTransport(Rc::clone(&state)), MockHandle(state))
}

/// Creates a connection over a fresh mock transport.
pub(crate) fn connection() -> (Connection, MockHandle) {
    let (transport, handle) = pair();
    let options = ConnectionOptions::new("ws://mock.test/socket");
    (Connection::with_transport(options, Box::new(transport)), handle)
}

/// Builds an unmasked, final server frame.
pub(crate) fn server_frame(opcode: Opcode, payload: &[u8]) -> Frame {
    Frame::new(true, opcode, false, payload.to_vec())
}
