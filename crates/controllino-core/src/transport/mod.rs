//! Byte transports
//!
//! The dispatcher talks to the device through [`Transport`]. The caller
//! opens the channel, hands it to a session, and gets it back on close.

use std::io;
use std::time::Instant;

pub mod serial;

pub use serial::{Parity, SerialSettings, SerialTransport, StopBits};

/// Abstraction for a synchronous byte channel with deadline-bounded reads
pub trait Transport: Send {
    /// Write all bytes to the channel
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push buffered output to the device
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Read whatever is available into `buf`.
    ///
    /// Must return at or before `deadline`. Returns `Ok(0)` when the deadline
    /// passes with nothing available.
    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize>;

    /// Drop any input received but not yet read
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        (**self).read_available(buf, deadline)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        (**self).read_available(buf, deadline)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}
