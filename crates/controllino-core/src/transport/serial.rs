//! Serial port transport
//!
//! Thin adapter from a `serialport` handle to [`Transport`]. Port settings
//! are passed through to the OS; the protocol engine never interprets them.

use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::Transport;

/// Default baud rate for Controllino boards
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// How long to sleep between polls when no bytes are waiting
const POLL_GRAIN: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    One,
    Two,
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Timeout for individual OS read/write calls
    pub timeout_ms: u64,
    /// Keep DTR asserted so opening the port does not reset the board
    pub assert_dtr: bool,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout_ms: 100,
            assert_dtr: true,
        }
    }
}

impl SerialSettings {
    fn data_bits(&self) -> io::Result<serialport::DataBits> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported data bits: {}", other),
            )),
        }
    }

    fn parity(&self) -> serialport::Parity {
        match self.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn stop_bits(&self) -> serialport::StopBits {
        match self.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// [`Transport`] over an OS serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Open and configure a named port (e.g. "/dev/ttyACM0" or "COM3")
    pub fn open(name: &str, settings: &SerialSettings) -> io::Result<Self> {
        let mut port = serialport::new(name, settings.baud_rate)
            .data_bits(settings.data_bits()?)
            .parity(settings.parity())
            .stop_bits(settings.stop_bits())
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
            .map_err(io::Error::from)?;

        if settings.assert_dtr {
            // Opening the port toggles DTR, which resets Arduino-class boards
            if let Err(e) = port.write_data_terminal_ready(true) {
                warn!("failed to set DTR high on {}: {} (continuing)", name, e);
            }
        }

        port.clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)?;
        debug!("opened {} at {} baud", name, settings.baud_rate);

        Ok(Self { port })
    }

    /// Give back the underlying port
    pub fn into_inner(self) -> Box<dyn SerialPort> {
        self.port
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.port)
    }

    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Poll bytes_to_read() so a read() call never blocks past the deadline
        loop {
            let available = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
            if available > 0 {
                let to_read = available.min(buf.len());
                match self.port.read(&mut buf[..to_read]) {
                    Ok(n) => {
                        trace!("serial read {} bytes", n);
                        return Ok(n);
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            std::thread::sleep(POLL_GRAIN.min(deadline - now));
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert!(settings.assert_dtr);
    }

    #[test]
    fn test_settings_from_json() {
        let settings: SerialSettings =
            serde_json::from_str(r#"{"baud_rate": 9600, "parity": "even"}"#).unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::One);
    }

    #[test]
    fn test_invalid_data_bits() {
        let settings = SerialSettings {
            data_bits: 9,
            ..SerialSettings::default()
        };
        assert!(settings.data_bits().is_err());
    }

    #[test]
    fn test_open_missing_port() {
        let result = SerialTransport::open("/dev/does-not-exist-controllino", &SerialSettings::default());
        assert!(result.is_err());
    }
}
