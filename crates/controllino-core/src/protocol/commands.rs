//! Protocol commands
//!
//! Defines the commands understood by Controllino firmware and their
//! argument layout on the wire.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opcode byte of each known command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Ready = 0x01,
    GetInput = 0x10,
    SetOutput = 0x11,
    GetPinMode = 0x12,
    SetPinMode = 0x13,
    LoadPinModes = 0x14,
    SavePinModes = 0x15,
    ResetPinModes = 0x16,
    TriggerPulse = 0x17,
    LogSignal = 0x18,
    EndLogSignal = 0x19,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::Ready,
        Opcode::GetInput,
        Opcode::SetOutput,
        Opcode::GetPinMode,
        Opcode::SetPinMode,
        Opcode::LoadPinModes,
        Opcode::SavePinModes,
        Opcode::ResetPinModes,
        Opcode::TriggerPulse,
        Opcode::LogSignal,
        Opcode::EndLogSignal,
    ];

    /// The byte sent on the wire
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Look up a known opcode from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.byte() == byte)
    }
}

/// Pin configuration, as stored by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PinMode {
    Input,
    Output,
    InputPullup,
}

impl PinMode {
    pub fn byte(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::InputPullup => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PinMode::Input),
            1 => Some(PinMode::Output),
            2 => Some(PinMode::InputPullup),
            _ => None,
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinMode::Input => "INPUT",
            PinMode::Output => "OUTPUT",
            PinMode::InputPullup => "INPUT_PULLUP",
        };
        f.write_str(name)
    }
}

impl FromStr for PinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INPUT" => Ok(PinMode::Input),
            "OUTPUT" => Ok(PinMode::Output),
            "INPUT_PULLUP" => Ok(PinMode::InputPullup),
            other => Err(format!("unknown pin mode '{}'", other)),
        }
    }
}

/// A command sent to the device
///
/// Commands carry no sequence number; the dispatcher adds one when the
/// session is configured for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Liveness check, answered with an empty acknowledgement
    Ready,
    /// Read the level of an input pin
    GetInput { pin: u8 },
    /// Drive an output pin (digital 0/1 or analog level)
    SetOutput { pin: u8, level: u16 },
    GetPinMode { pin: u8 },
    SetPinMode { pin: u8, mode: PinMode },
    /// Restore pin modes from device EEPROM
    LoadPinModes,
    /// Persist current pin modes to device EEPROM
    SavePinModes,
    ResetPinModes,
    TriggerPulse { pin: u8 },
    /// Start periodic sampling of a pin; samples arrive as unsolicited frames
    LogSignal { pin: u8, period_ms: u32 },
    EndLogSignal { pin: u8 },
    /// Any opcode with raw argument bytes
    Raw { opcode: u8, args: Vec<u8> },
}

impl Command {
    /// Opcode byte for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Ready => Opcode::Ready.byte(),
            Command::GetInput { .. } => Opcode::GetInput.byte(),
            Command::SetOutput { .. } => Opcode::SetOutput.byte(),
            Command::GetPinMode { .. } => Opcode::GetPinMode.byte(),
            Command::SetPinMode { .. } => Opcode::SetPinMode.byte(),
            Command::LoadPinModes => Opcode::LoadPinModes.byte(),
            Command::SavePinModes => Opcode::SavePinModes.byte(),
            Command::ResetPinModes => Opcode::ResetPinModes.byte(),
            Command::TriggerPulse { .. } => Opcode::TriggerPulse.byte(),
            Command::LogSignal { .. } => Opcode::LogSignal.byte(),
            Command::EndLogSignal { .. } => Opcode::EndLogSignal.byte(),
            Command::Raw { opcode, .. } => *opcode,
        }
    }

    /// Wire name of the command, used in logs and by the session lookup table
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ready => "READY",
            Command::GetInput { .. } => "GET_INPUT",
            Command::SetOutput { .. } => "SET_OUTPUT",
            Command::GetPinMode { .. } => "GET_PIN_MODE",
            Command::SetPinMode { .. } => "SET_PIN_MODE",
            Command::LoadPinModes => "LOAD_PIN_MODES",
            Command::SavePinModes => "SAVE_PIN_MODES",
            Command::ResetPinModes => "RESET_PIN_MODES",
            Command::TriggerPulse { .. } => "TRIGGER_PULSE",
            Command::LogSignal { .. } => "LOG_SIGNAL",
            Command::EndLogSignal { .. } => "END_LOG_SIGNAL",
            Command::Raw { .. } => "RAW",
        }
    }

    /// Append the argument bytes to a payload builder
    fn write_args(&self, builder: PayloadBuilder) -> PayloadBuilder {
        match self {
            Command::Ready
            | Command::LoadPinModes
            | Command::SavePinModes
            | Command::ResetPinModes => builder,
            Command::GetInput { pin }
            | Command::GetPinMode { pin }
            | Command::TriggerPulse { pin }
            | Command::EndLogSignal { pin } => builder.byte(*pin),
            Command::SetOutput { pin, level } => builder.byte(*pin).u16_le(*level),
            Command::SetPinMode { pin, mode } => builder.byte(*pin).byte(mode.byte()),
            Command::LogSignal { pin, period_ms } => builder.byte(*pin).u32_le(*period_ms),
            Command::Raw { args, .. } => builder.bytes(args),
        }
    }

    /// Build the frame payload: `[SEQ?][OPCODE][ARGS..]`
    pub fn to_payload(&self, sequence: Option<u8>) -> Vec<u8> {
        let mut builder = PayloadBuilder::new();
        if let Some(seq) = sequence {
            builder = builder.byte(seq);
        }
        self.write_args(builder.byte(self.opcode())).build()
    }

    /// Whether re-sending this command may change device state twice
    pub fn has_side_effects(&self) -> bool {
        !matches!(
            self,
            Command::Ready | Command::GetInput { .. } | Command::GetPinMode { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Raw { opcode, args } => write!(f, "RAW({:#04x}, {:02x?})", opcode, args),
            other => f.write_str(other.name()),
        }
    }
}

/// Builder for payload bytes, little-endian for multi-byte fields
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    payload: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self { payload: Vec::new() }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a boolean as 0/1
    pub fn bool(self, value: bool) -> Self {
        self.byte(value as u8)
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit value (little-endian)
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a 32-bit float (little-endian)
    pub fn f32_le(mut self, value: f32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_f32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.payload
    }
}
