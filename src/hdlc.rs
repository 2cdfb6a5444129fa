//! HDLC-style frame synchronization.
//!
//! Frames on the radio link are delimited by [`HDLC_FLAG`]. Any flag or escape
//! byte inside a frame body is sent as [`HDLC_ESCAPE`] followed by the byte
//! XORed with [`HDLC_ESCAPE_XOR`].
//!
//! ```text
//! FLAG | stuffed(body) | FLAG
//! ```
//!
//! [`HdlcHandler`] recovers frame bodies from an arbitrarily chunked stream one
//! byte at a time. It has a single output slot: a completed frame must be taken
//! with [`HdlcHandler::take_payload`] before the next flag, otherwise it is
//! replaced by the next frame.

use tracing::{debug, trace};

use crate::GatewayError;

/// Frame boundary marker.
pub const HDLC_FLAG: u8 = 0x7E;
/// Marks the next byte as literal.
pub const HDLC_ESCAPE: u8 = 0x7D;
/// Transform applied to an escaped byte.
pub const HDLC_ESCAPE_XOR: u8 = 0x20;
/// Longest frame body accepted before the frame is dropped.
pub const MAX_FRAME_LEN: usize = 1024;

/// Synchronizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdlcState {
    Idle,
    Receiving,
    EscapePending,
    Ready,
    Error,
}

/// Byte-level frame synchronizer.
#[derive(Debug)]
pub struct HdlcHandler {
    state: HdlcState,
    buffer: Vec<u8>,
    frames_completed: u64,
    frames_dropped: u64,
    last_error: Option<&'static str>,
}

impl Default for HdlcHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HdlcHandler {
    pub fn new() -> Self {
        Self {
            state: HdlcState::Idle,
            buffer: Vec::with_capacity(64),
            frames_completed: 0,
            frames_dropped: 0,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HdlcState {
        self.state
    }

    /// Number of frames that reached [`HdlcState::Ready`].
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// Number of frames discarded because of a malformed sequence.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Reason the most recent frame was dropped, reported once.
    pub fn take_error(&mut self) -> Option<GatewayError> {
        self.last_error.take().map(GatewayError::frame_sync)
    }

    /// Consume one byte from the stream.
    pub fn feed(&mut self, byte: u8) {
        match (self.state, byte) {
            (HdlcState::Idle | HdlcState::Ready | HdlcState::Error, HDLC_FLAG) => {
                if self.state == HdlcState::Ready {
                    trace!("Unconsumed frame overwritten by next boundary");
                }
                self.buffer.clear();
                self.state = HdlcState::Receiving;
            }
            (HdlcState::Idle | HdlcState::Ready | HdlcState::Error, _) => {}
            (HdlcState::Receiving, HDLC_FLAG) => {
                // Back-to-back flags delimit an empty frame, keep waiting for a body
                if !self.buffer.is_empty() {
                    self.frames_completed += 1;
                    self.state = HdlcState::Ready;
                }
            }
            (HdlcState::Receiving, HDLC_ESCAPE) => {
                self.state = HdlcState::EscapePending;
            }
            (HdlcState::Receiving, _) => self.push(byte),
            (HdlcState::EscapePending, HDLC_ESCAPE) => self.fail("escape byte repeated"),
            (HdlcState::EscapePending, HDLC_FLAG) => self.fail("frame aborted after escape"),
            (HdlcState::EscapePending, _) => {
                self.state = HdlcState::Receiving;
                self.push(byte ^ HDLC_ESCAPE_XOR);
            }
        }
    }

    /// Feed a chunk of bytes, returning every frame completed along the way.
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            self.feed(byte);
            if let Some(frame) = self.take_payload() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Signal that the byte stream has ended.
    ///
    /// A frame still open at this point can never complete and is discarded.
    pub fn end_of_stream(&mut self) {
        match self.state {
            HdlcState::EscapePending => self.fail("stream ended after escape"),
            HdlcState::Receiving if !self.buffer.is_empty() => {
                self.fail("stream ended inside a frame")
            }
            _ => {}
        }
    }

    /// Take the completed frame body.
    ///
    /// Returns `None` unless the state is [`HdlcState::Ready`]. Taking the
    /// payload resets the synchronizer to [`HdlcState::Idle`].
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        if self.state != HdlcState::Ready {
            return None;
        }
        self.state = HdlcState::Idle;
        Some(std::mem::take(&mut self.buffer))
    }

    fn push(&mut self, byte: u8) {
        if self.buffer.len() >= MAX_FRAME_LEN {
            self.fail("frame exceeds maximum length");
            return;
        }
        self.buffer.push(byte);
    }

    fn fail(&mut self, reason: &'static str) {
        debug!(reason, discarded = self.buffer.len(), "Dropping malformed frame");
        self.frames_dropped += 1;
        self.last_error = Some(reason);
        self.buffer.clear();
        self.state = HdlcState::Error;
    }
}

/// Wrap a frame body in flags, escaping reserved bytes.
pub fn hdlc_encode(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + body.len() / 8 + 2);
    frame.push(HDLC_FLAG);
    for &byte in body {
        if byte == HDLC_FLAG || byte == HDLC_ESCAPE {
            frame.push(HDLC_ESCAPE);
            frame.push(byte ^ HDLC_ESCAPE_XOR);
        } else {
            frame.push(byte);
        }
    }
    frame.push(HDLC_FLAG);
    frame
}
