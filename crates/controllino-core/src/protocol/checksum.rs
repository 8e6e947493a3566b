//! Frame checksums
//!
//! Both algorithms cover the length byte followed by the payload. The start
//! marker and the checksum byte itself are never included.

use crc::{Crc, CRC_8_SMBUS};
use serde::{Deserialize, Serialize};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Checksum algorithm used for the frame trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checksum {
    /// Sum of the length byte and all payload bytes, modulo 256
    #[default]
    Sum8,
    /// CRC-8/SMBUS (poly 0x07, init 0x00)
    Crc8,
}

impl Checksum {
    /// Compute the trailer byte for a payload.
    ///
    /// `payload` must not be longer than 255 bytes; the length byte is taken
    /// as `payload.len() as u8`.
    pub fn compute(self, payload: &[u8]) -> u8 {
        let length = payload.len() as u8;
        match self {
            Checksum::Sum8 => payload
                .iter()
                .fold(length, |acc, &b| acc.wrapping_add(b)),
            Checksum::Crc8 => {
                let mut digest = CRC8.digest();
                digest.update(&[length]);
                digest.update(payload);
                digest.finalize()
            }
        }
    }
}
