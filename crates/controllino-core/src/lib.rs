//! # Controllino Core Library
//!
//! Client-side protocol engine for Controllino devices on a serial link.
//!
//! This library provides:
//! - Frame encoding/decoding with checksum and byte-level resynchronization
//! - A [`Transport`](transport::Transport) abstraction over deadline-bounded
//!   byte channels, with a serial port implementation
//! - A command dispatcher with retry and timeout policy
//! - A device session with typed helpers and name-based command lookup
//! - A simulated device for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use controllino_core::prelude::*;
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", &SerialSettings::default())?;
//! let session = Session::open(transport, DispatchConfig::default());
//!
//! session.set_pin_mode(30, PinMode::Output)?;
//! session.set_output(30, 1)?;
//! let response = session.send_named("GET_INPUT", &["54"])?;
//! println!("A0 = {:?}", response.u16_at(0));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod protocol;
pub mod session;
pub mod simulator;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        Checksum, Command, DispatchConfig, DispatchError, Dispatcher, PinMode, Response, Status,
    };
    pub use crate::session::{LogSample, LogStream, Session, SessionError, TimeSeries};
    pub use crate::simulator::SimulatedDevice;
    pub use crate::transport::{SerialSettings, SerialTransport, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
