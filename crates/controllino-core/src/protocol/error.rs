//! Protocol errors

use thiserror::Error;

/// Errors raised while building a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Why the bytes at the head of a receive buffer are not a valid frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// First byte is not the start marker
    #[error("bad start byte {0:#04x}")]
    BadStartByte(u8),
    /// Declared length exceeds the configured maximum payload
    #[error("declared length {declared} exceeds max {max}")]
    LengthExceeded { declared: usize, max: usize },
    /// Length-complete frame whose trailer does not match
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Input ended partway through a declared frame
    #[error("truncated frame: {available} of {declared} bytes")]
    Truncated { declared: usize, available: usize },
}

/// Errors that can end a dispatched call
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Channel-level read or write failure. Never retried.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("No response after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Corrupted frames persisted through every attempt
    #[error("Malformed frames persisted through {attempts} attempts")]
    MalformedFrame { attempts: u32 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Another call is already in flight on this dispatcher
    #[error("Dispatcher busy: a command is already in flight")]
    Busy,

    #[error("Cannot encode command: {0}")]
    Frame(#[from] FrameError),
}

impl DispatchError {
    /// True for failures that came from the channel rather than the device
    pub fn is_transport(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }
}
