//! Controllino Protocol
//!
//! Implements framing, command encoding and the request/response dispatcher
//! for the Controllino serial protocol.
//!
//! Wire format:
//! - 1 byte: start marker ([`START_BYTE`])
//! - 1 byte: payload length
//! - N bytes: payload
//! - 1 byte: checksum over length + payload (see [`Checksum`])

mod checksum;
pub mod commands;
mod dispatcher;
mod error;
mod frame;
mod response;

pub use checksum::Checksum;
pub use commands::{Command, Opcode, PayloadBuilder, PinMode};
pub use dispatcher::{DispatchConfig, Dispatcher, ResponseStream};
pub use error::{DispatchError, FrameError, MalformedReason};
pub use frame::{encode, encode_frame, try_decode, DecodeOptions, Decoded, FrameBuffer};
pub use response::{Response, Status};

/// Start-of-frame marker (ASCII STX)
pub const START_BYTE: u8 = 0x02;

/// Bytes of framing around a payload: start marker, length and checksum
pub const FRAME_OVERHEAD: usize = 3;

/// Largest payload the one-byte length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Default time allowed for a response to arrive, per attempt
pub const DEFAULT_BYTE_TIMEOUT_MS: u64 = 500;

/// Default number of retransmissions after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
