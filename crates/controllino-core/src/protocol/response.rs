//! Decoded device responses

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status byte reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    /// Device did not recognize the opcode or its arguments
    InvalidCommand,
    /// Device recognized the command but could not execute it
    CommandFailed,
    Busy,
    Other(u8),
}

impl Status {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Status::Ok,
            0x01 => Status::InvalidCommand,
            0x02 => Status::CommandFailed,
            0x03 => Status::Busy,
            other => Status::Other(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::InvalidCommand => 0x01,
            Status::CommandFailed => 0x02,
            Status::Busy => 0x03,
            Status::Other(b) => b,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::InvalidCommand => f.write_str("COMMAND_INVALID"),
            Status::CommandFailed => f.write_str("COMMAND_FAILED"),
            Status::Busy => f.write_str("BUSY"),
            Status::Other(b) => write!(f, "STATUS_{:#04x}", b),
        }
    }
}

/// A complete, checksum-valid response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub result: Vec<u8>,
}

impl Response {
    /// Interpret a response payload with any sequence byte already removed.
    ///
    /// An empty payload is an acknowledgement with no result bytes.
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload.split_first() {
            None => Self::ack(),
            Some((&status, result)) => Self {
                status: Status::from_byte(status),
                result: result.to_vec(),
            },
        }
    }

    /// Acknowledgement with no result bytes
    pub fn ack() -> Self {
        Self {
            status: Status::Ok,
            result: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Encode back into a payload (used by the simulated device)
    pub fn to_payload(&self) -> Vec<u8> {
        if self.status.is_ok() && self.result.is_empty() {
            return Vec::new();
        }
        let mut payload = Vec::with_capacity(1 + self.result.len());
        payload.push(self.status.byte());
        payload.extend_from_slice(&self.result);
        payload
    }

    /// Read a result byte
    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.result.get(offset).copied()
    }

    /// Read a little-endian u16 from the result bytes
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        self.result
            .get(offset..offset + 2)
            .map(LittleEndian::read_u16)
    }

    /// Read a little-endian u32 from the result bytes
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        self.result
            .get(offset..offset + 4)
            .map(LittleEndian::read_u32)
    }

    /// Read a little-endian f32 from the result bytes
    pub fn f32_at(&self, offset: usize) -> Option<f32> {
        self.result
            .get(offset..offset + 4)
            .map(LittleEndian::read_f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_ack() {
        let response = Response::from_payload(&[]);
        assert!(response.is_ok());
        assert!(response.result.is_empty());
    }

    #[test]
    fn test_status_and_result() {
        let response = Response::from_payload(&[0x00, 0x7B, 0x00]);
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.u16_at(0), Some(123));
        assert_eq!(response.u16_at(1), None);
    }

    #[test]
    fn test_error_status() {
        assert_eq!(Response::from_payload(&[0x01]).status, Status::InvalidCommand);
        assert_eq!(Response::from_payload(&[0x42]).status, Status::Other(0x42));
    }

    #[test]
    fn test_to_payload() {
        assert!(Response::ack().to_payload().is_empty());
        let response = Response {
            status: Status::CommandFailed,
            result: vec![],
        };
        assert_eq!(response.to_payload(), vec![0x02]);
    }

    #[test]
    fn test_typed_reads() {
        let mut result = vec![0x10, 0x27, 0x00, 0x00];
        result.extend_from_slice(&1.5f32.to_le_bytes());
        let response = Response {
            status: Status::Ok,
            result,
        };
        assert_eq!(response.u32_at(0), Some(10_000));
        assert_eq!(response.f32_at(4), Some(1.5));
        assert_eq!(response.u8_at(8), None);
    }
}
