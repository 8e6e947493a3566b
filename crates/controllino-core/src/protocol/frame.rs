//! Frame encoding/decoding
//!
//! Frame format:
//! - 1 byte: start marker (0x02)
//! - 1 byte: payload length
//! - N bytes: payload
//! - 1 byte: checksum of length + payload
//!
//! Decoding is incremental: [`try_decode`] inspects the head of a receive
//! buffer and reports whether more bytes are needed, a frame was found, or
//! the head byte must be dropped to resynchronize. [`FrameBuffer`] applies
//! that policy across partial reads.

use tracing::trace;

use super::{Checksum, Command, FrameError, MalformedReason, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE, START_BYTE};

/// Limits applied while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub checksum: Checksum,
    /// Frames declaring a longer payload are rejected as malformed
    pub max_payload: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            checksum: Checksum::default(),
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }
}

/// Result of inspecting the head of a receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes yet
    Incomplete,
    /// A valid frame starts at the buffer head
    Frame { payload: Vec<u8>, consumed: usize },
    /// The buffer head is not a valid frame; drop one byte and retry
    Malformed(MalformedReason),
}

/// Wrap a payload in a frame
pub fn encode_frame(payload: &[u8], checksum: Checksum) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut bytes = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    bytes.push(START_BYTE);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    bytes.push(checksum.compute(payload));
    Ok(bytes)
}

/// Encode a command into a complete frame
pub fn encode(
    command: &Command,
    sequence: Option<u8>,
    checksum: Checksum,
) -> Result<Vec<u8>, FrameError> {
    encode_frame(&command.to_payload(sequence), checksum)
}

/// Try to decode one frame from the start of `buffer`
pub fn try_decode(buffer: &[u8], options: &DecodeOptions) -> Decoded {
    let Some(&first) = buffer.first() else {
        return Decoded::Incomplete;
    };
    if first != START_BYTE {
        return Decoded::Malformed(MalformedReason::BadStartByte(first));
    }

    let Some(&length) = buffer.get(1) else {
        return Decoded::Incomplete;
    };
    let length = length as usize;
    if length > options.max_payload {
        return Decoded::Malformed(MalformedReason::LengthExceeded {
            declared: length,
            max: options.max_payload,
        });
    }

    let total = length + FRAME_OVERHEAD;
    if buffer.len() < total {
        return Decoded::Incomplete;
    }

    let payload = &buffer[2..2 + length];
    let expected = options.checksum.compute(payload);
    let actual = buffer[2 + length];
    if expected != actual {
        return Decoded::Malformed(MalformedReason::ChecksumMismatch { expected, actual });
    }

    Decoded::Frame {
        payload: payload.to_vec(),
        consumed: total,
    }
}

/// Receive buffer that accumulates partial reads and yields frame payloads.
///
/// Malformed input is dropped one byte at a time. A stray start byte can
/// declare a length that swallows a real frame behind it; once the caller
/// knows no more input is coming, [`flush_frame`](Self::flush_frame) treats
/// such a truncated head as malformed and keeps resynchronizing.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    options: DecodeOptions,
    discarded: usize,
}

impl FrameBuffer {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            bytes: Vec::new(),
            options,
            discarded: 0,
        }
    }

    /// Append bytes from a read
    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes dropped while resynchronizing, since creation
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Pop the next complete frame payload.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match try_decode(&self.bytes, &self.options) {
                Decoded::Incomplete => return None,
                Decoded::Frame { payload, consumed } => {
                    self.bytes.drain(..consumed);
                    return Some(payload);
                }
                Decoded::Malformed(reason) => self.drop_head(reason),
            }
        }
    }

    /// Like [`next_frame`](Self::next_frame), for input that has ended.
    ///
    /// An incomplete head is dropped as malformed, so the buffer is either
    /// empty or positioned after the returned frame.
    pub fn flush_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(payload) = self.next_frame() {
                return Some(payload);
            }
            if self.bytes.is_empty() {
                return None;
            }
            let declared = self.bytes.get(1).map_or(0, |&len| len as usize + FRAME_OVERHEAD);
            self.drop_head(MalformedReason::Truncated {
                declared,
                available: self.bytes.len(),
            });
        }
    }

    fn drop_head(&mut self, reason: MalformedReason) {
        trace!("resync: dropping byte {:#04x} ({})", self.bytes[0], reason);
        self.bytes.remove(0);
        self.discarded += 1;
    }
}
