// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Length-prefix framing for the routed message stream.
//!
//! TCP is a stream protocol without message boundaries; every routed message
//! travels as one length-prefixed frame:
//!
//! ```text
//! +----------------+---------------+---------------+--------------+---------+
//! | Length (4B BE) | Target (8B BE)| Source (8B BE)| Magic (4B BE)| Payload |
//! +----------------+---------------+---------------+--------------+---------+
//! ```
//!
//! The length field counts everything after itself. Target and source are
//! connection cookies assigned by the router; the magic is the runtime class
//! identity of the serialized event, so the receiver can reconstruct the
//! event type without a shared type table.

use super::ItemId;
use std::fmt;
use std::io::{self, Read};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Fixed frame content: target (8) + source (8) + magic (4).
pub const FRAME_FIXED_SIZE: usize = 20;

/// Default maximum frame size (anti-OOM guard).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Cookie of the connection this frame is addressed to.
    pub target_cookie: ItemId,
    /// Cookie of the connection that produced the frame.
    pub source_cookie: ItemId,
    /// Runtime class magic of the serialized event.
    pub class_magic: u32,
    /// Opaque event bytes.
    pub payload: Vec<u8>,
}

/// Framing errors.
#[derive(Debug)]
pub enum FrameError {
    /// Declared length exceeds the configured maximum.
    TooLarge { size: usize, max: usize },

    /// Declared length is smaller than the fixed frame content.
    Undersized(usize),

    /// The stream ended inside a frame.
    Truncated,

    /// Transport failure.
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, max } => write!(f, "frame too large: {} > {}", size, max),
            Self::Undersized(size) => write!(f, "frame undersized: {} bytes", size),
            Self::Truncated => write!(f, "stream ended inside a frame"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl MessageFrame {
    pub fn new(
        target_cookie: ItemId,
        source_cookie: ItemId,
        class_magic: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            target_cookie,
            source_cookie,
            class_magic,
            payload,
        }
    }

    /// Encode with the length prefix, ready to write to a stream.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = FRAME_FIXED_SIZE + self.payload.len();
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&self.target_cookie.to_be_bytes());
        out.extend_from_slice(&self.source_cookie.to_be_bytes());
        out.extend_from_slice(&self.class_magic.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a frame body (everything after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < FRAME_FIXED_SIZE {
            return Err(FrameError::Undersized(body.len()));
        }
        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&body[0..8]);
        let target_cookie = ItemId::from_be_bytes(cookie);
        cookie.copy_from_slice(&body[8..16]);
        let source_cookie = ItemId::from_be_bytes(cookie);
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&body[16..20]);
        let class_magic = u32::from_be_bytes(magic);
        Ok(Self {
            target_cookie,
            source_cookie,
            class_magic,
            payload: body[FRAME_FIXED_SIZE..].to_vec(),
        })
    }

    /// Blocking frame read. Returns `Ok(None)` when the peer closed the
    /// stream cleanly at a frame boundary.
    pub fn read_from<R: Read>(reader: &mut R, max_size: usize) -> Result<Option<Self>, FrameError> {
        let mut len_buf = [0u8; FRAME_HEADER_SIZE];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FrameError::Io(e)),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len < FRAME_FIXED_SIZE {
            return Err(FrameError::Undersized(len));
        }
        if len > max_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: max_size,
            });
        }

        let mut body = vec![0u8; len];
        match reader.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Truncated),
            Err(e) => return Err(FrameError::Io(e)),
        }
        Ok(Some(Self::decode(&body)?))
    }
}

/// Accumulates bytes from a non-blocking stream and yields complete frames.
///
/// Partial reads keep their state here between calls, so the reader can feed
/// whatever each `read` returned and pop frames as they complete.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_size,
        }
    }

    /// Append raw bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<MessageFrame>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut len_buf = [0u8; FRAME_HEADER_SIZE];
        len_buf.copy_from_slice(&self.buffer[0..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(len_buf) as usize;
        if len < FRAME_FIXED_SIZE {
            return Err(FrameError::Undersized(len));
        }
        if len > self.max_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_size,
            });
        }
        let total = FRAME_HEADER_SIZE + len;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let frame = MessageFrame::decode(&self.buffer[FRAME_HEADER_SIZE..total])?;
        self.buffer.drain(0..total);
        Ok(Some(frame))
    }

    /// Bytes currently buffered (for diagnostics).
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> MessageFrame {
        MessageFrame::new(3, 7, 0xdead_beef, b"payload".to_vec())
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = sample();
        let wire = frame.encode();
        assert_eq!(
            &wire[0..4],
            &((FRAME_FIXED_SIZE + 7) as u32).to_be_bytes()
        );

        let decoded = MessageFrame::decode(&wire[FRAME_HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn empty_payload_frame() {
        let frame = MessageFrame::new(1, 2, 42, Vec::new());
        let wire = frame.encode();
        assert_eq!(wire.len(), FRAME_HEADER_SIZE + FRAME_FIXED_SIZE);
        let decoded = MessageFrame::decode(&wire[FRAME_HEADER_SIZE..]).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn blocking_read_yields_frames_then_eof() {
        let mut wire = sample().encode();
        wire.extend(MessageFrame::new(9, 3, 1, Vec::new()).encode());
        let mut cursor = Cursor::new(wire);

        let first = MessageFrame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(first, sample());
        let second = MessageFrame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(second.target_cookie, 9);
        // Clean close at a frame boundary.
        assert!(MessageFrame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn eof_inside_a_frame_is_truncation() {
        let wire = sample().encode();
        let mut cursor = Cursor::new(&wire[..wire.len() - 2]);
        assert!(matches!(
            MessageFrame::read_from(&mut cursor, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::Truncated)
        ));
    }

    #[test]
    fn oversized_frame_rejected() {
        let frame = MessageFrame::new(1, 2, 3, vec![0u8; 128]);
        let wire = frame.encode();
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            MessageFrame::read_from(&mut cursor, 64),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn buffer_handles_arbitrary_chunking() {
        let mut wire = sample().encode();
        wire.extend(MessageFrame::new(5, 6, 2, b"x".to_vec()).encode());

        let mut buffer = FrameBuffer::new(DEFAULT_MAX_FRAME_SIZE);
        let mut frames = Vec::new();
        // Feed one byte at a time; frames must pop exactly at boundaries.
        for byte in wire {
            buffer.extend(&[byte]);
            while let Some(frame) = buffer.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], sample());
        assert_eq!(frames[1].target_cookie, 5);
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn buffer_rejects_undersized_length() {
        let mut buffer = FrameBuffer::new(DEFAULT_MAX_FRAME_SIZE);
        buffer.extend(&(4u32).to_be_bytes());
        buffer.extend(&[0, 0, 0, 0]);
        assert!(matches!(
            buffer.next_frame(),
            Err(FrameError::Undersized(4))
        ));
    }
}
