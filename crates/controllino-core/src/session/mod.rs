//! Device session
//!
//! Convenience layer over [`Dispatcher`]: typed helpers for each command,
//! status checking, signal logging, and lookup of commands by name.
//!
//! ```rust,ignore
//! use controllino_core::prelude::*;
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", &SerialSettings::default())?;
//! let session = Session::open(transport, DispatchConfig::default());
//! session.ping()?;
//! session.set_output(44, 1)?;
//! let level = session.get_input(54)?;
//! let port = session.close();
//! ```

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{
    Command, DispatchConfig, DispatchError, Dispatcher, PinMode, Response, ResponseStream, Status,
};
use crate::transport::Transport;

mod names;

pub use names::{command_from_name, command_names};

/// Errors surfaced by session helpers
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Device answered with a non-OK status
    #[error("{command} rejected by device: {status}")]
    Device { command: &'static str, status: Status },

    #[error("Unexpected response to {command}: {reason}")]
    UnexpectedResponse { command: &'static str, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    /// No log sample arrived within the expected period
    #[error("Signal log stalled after {received} samples")]
    LogStalled { received: usize },
}

/// One sample of a logged signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogSample {
    /// Device time since logging started
    pub time_ms: u32,
    pub value: f32,
    /// Last sample of the job
    pub done: bool,
}

impl LogSample {
    /// Result bytes of one sample: time, value and done flag
    pub const SIZE: usize = 9;

    /// Whether a response has the shape of a log sample rather than an ack
    fn matches(response: &Response) -> bool {
        response.is_ok() && response.result.len() == Self::SIZE
    }

    fn from_response(response: &Response) -> Option<Self> {
        Some(Self {
            time_ms: response.u32_at(0)?,
            value: response.f32_at(4)?,
            done: response.u8_at(8)? != 0,
        })
    }
}

/// Samples collected from a logging job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub time_ms: Vec<u32>,
    pub values: Vec<f32>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.time_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_ms.is_empty()
    }

    fn push(&mut self, sample: &LogSample) {
        self.time_ms.push(sample.time_ms);
        self.values.push(sample.value);
    }
}

/// An open conversation with one device
pub struct Session<T> {
    dispatcher: Dispatcher<T>,
}

impl<T: Transport> Session<T> {
    /// Start a session on an already opened transport
    pub fn open(transport: T, config: DispatchConfig) -> Self {
        debug!(
            "opening session (byte_timeout={}ms, max_retries={}, checksum={:?}, sequence_numbers={})",
            config.byte_timeout_ms, config.max_retries, config.checksum, config.sequence_numbers
        );
        Self {
            dispatcher: Dispatcher::new(transport, config),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.dispatcher.transport_mut()
    }

    /// End the session and hand the transport back to the caller
    pub fn close(self) -> T {
        debug!("closing session");
        self.dispatcher.into_transport()
    }

    /// Send a command and return the raw response, whatever its status
    pub fn send(&self, command: &Command) -> Result<Response, DispatchError> {
        self.dispatcher.send(command)
    }

    /// Send a command and require an OK status
    pub fn execute(&self, command: &Command) -> Result<Response, SessionError> {
        let response = self.dispatcher.send(command)?;
        check_status(command, response)
    }

    /// Look up a command by wire name, then execute it
    pub fn send_named(&self, name: &str, args: &[&str]) -> Result<Response, SessionError> {
        let command = command_from_name(name, args)?;
        self.execute(&command)
    }

    /// Check that the device is alive and answering
    pub fn ping(&self) -> Result<(), SessionError> {
        self.execute(&Command::Ready).map(|_| ())
    }

    pub fn get_input(&self, pin: u8) -> Result<u16, SessionError> {
        let response = self.execute(&Command::GetInput { pin })?;
        response.u16_at(0).ok_or_else(|| SessionError::UnexpectedResponse {
            command: "GET_INPUT",
            reason: format!("expected 2 result bytes, got {}", response.result.len()),
        })
    }

    pub fn set_output(&self, pin: u8, level: u16) -> Result<(), SessionError> {
        self.execute(&Command::SetOutput { pin, level }).map(|_| ())
    }

    pub fn get_pin_mode(&self, pin: u8) -> Result<PinMode, SessionError> {
        let response = self.execute(&Command::GetPinMode { pin })?;
        let byte = response.u8_at(0).ok_or_else(|| SessionError::UnexpectedResponse {
            command: "GET_PIN_MODE",
            reason: "missing mode byte".to_string(),
        })?;
        PinMode::from_byte(byte).ok_or_else(|| SessionError::UnexpectedResponse {
            command: "GET_PIN_MODE",
            reason: format!("unknown pin mode {:#04x}", byte),
        })
    }

    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), SessionError> {
        self.execute(&Command::SetPinMode { pin, mode }).map(|_| ())
    }

    pub fn load_pin_modes(&self) -> Result<(), SessionError> {
        self.execute(&Command::LoadPinModes).map(|_| ())
    }

    pub fn save_pin_modes(&self) -> Result<(), SessionError> {
        self.execute(&Command::SavePinModes).map(|_| ())
    }

    pub fn reset_pin_modes(&self) -> Result<(), SessionError> {
        self.execute(&Command::ResetPinModes).map(|_| ())
    }

    pub fn trigger_pulse(&self, pin: u8) -> Result<(), SessionError> {
        self.execute(&Command::TriggerPulse { pin }).map(|_| ())
    }

    /// Ask the device to start sampling a pin every `period_ms`.
    ///
    /// The returned stream holds the session until dropped; other commands
    /// fail with [`DispatchError::Busy`] meanwhile. Dropping it leaves the
    /// device job running, end it with [`end_log_signal`](Self::end_log_signal).
    pub fn log_signal(&self, pin: u8, period_ms: u32) -> Result<LogStream<'_, T>, SessionError> {
        let command = Command::LogSignal { pin, period_ms };
        let (response, stream) = self.dispatcher.send_streaming(&command)?;
        check_status(&command, response)?;
        Ok(LogStream {
            stream,
            pin,
            received: 0,
        })
    }

    /// Stop a running log job.
    ///
    /// Samples already on the wire may arrive ahead of the acknowledgement;
    /// they are skipped.
    pub fn end_log_signal(&self, pin: u8) -> Result<(), SessionError> {
        let command = Command::EndLogSignal { pin };
        let (mut response, mut stream) = self.dispatcher.send_streaming(&command)?;

        let deadline = Instant::now() + self.config().byte_timeout();
        let mut skipped = 0usize;
        while LogSample::matches(&response) {
            skipped += 1;
            response = stream.next_response(deadline)?.ok_or_else(|| {
                SessionError::UnexpectedResponse {
                    command: "END_LOG_SIGNAL",
                    reason: format!("{} log samples but no acknowledgement", skipped),
                }
            })?;
        }
        if skipped > 0 {
            debug!("skipped {} in-flight samples before END_LOG_SIGNAL ack", skipped);
        }

        check_status(&command, response).map(|_| ())
    }

    /// Log a pin for up to `max_samples` samples.
    ///
    /// Stops early when the device marks a sample as the last one; otherwise
    /// ends the job once enough samples are in. On error the job is ended
    /// too, if the device still answers.
    pub fn collect_log(
        &self,
        pin: u8,
        period_ms: u32,
        max_samples: usize,
    ) -> Result<TimeSeries, SessionError> {
        let sample_timeout = Duration::from_millis(period_ms as u64) + self.config().byte_timeout();

        let mut stream = self.log_signal(pin, period_ms)?;
        let collected = stream.collect_series(max_samples, sample_timeout);
        drop(stream);

        match collected {
            Ok((series, true)) => {
                debug!("collected {} samples from pin {} (device done)", series.len(), pin);
                Ok(series)
            }
            Ok((series, false)) => {
                self.end_log_signal(pin)?;
                debug!("collected {} samples from pin {}", series.len(), pin);
                Ok(series)
            }
            Err(e) => {
                if let Err(end_err) = self.end_log_signal(pin) {
                    warn!("could not end log of pin {} after error: {}", pin, end_err);
                }
                Err(e)
            }
        }
    }
}

fn check_status(command: &Command, response: Response) -> Result<Response, SessionError> {
    if !response.is_ok() {
        warn!("{} rejected by device: {}", command, response.status);
        return Err(SessionError::Device {
            command: command.name(),
            status: response.status,
        });
    }
    Ok(response)
}

/// Samples of a running log job
pub struct LogStream<'a, T> {
    stream: ResponseStream<'a, T>,
    pin: u8,
    received: usize,
}

impl<T: Transport> LogStream<'_, T> {
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Samples returned so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Wait up to `timeout` for the next sample
    pub fn next_sample(&mut self, timeout: Duration) -> Result<Option<LogSample>, SessionError> {
        let Some(response) = self.stream.next_response(Instant::now() + timeout)? else {
            return Ok(None);
        };
        if !response.is_ok() {
            return Err(SessionError::Device {
                command: "LOG_SIGNAL",
                status: response.status,
            });
        }
        let sample = LogSample::from_response(&response).ok_or_else(|| {
            SessionError::UnexpectedResponse {
                command: "LOG_SIGNAL",
                reason: format!(
                    "sample needs {} result bytes, got {}",
                    LogSample::SIZE,
                    response.result.len()
                ),
            }
        })?;
        self.received += 1;
        Ok(Some(sample))
    }

    /// Read samples until `max_samples` or a sample marked done.
    ///
    /// Returns the series and whether the device ended the job itself.
    fn collect_series(
        &mut self,
        max_samples: usize,
        sample_timeout: Duration,
    ) -> Result<(TimeSeries, bool), SessionError> {
        let mut series = TimeSeries::default();
        while series.len() < max_samples {
            match self.next_sample(sample_timeout)? {
                Some(sample) => {
                    series.push(&sample);
                    if sample.done {
                        return Ok((series, true));
                    }
                }
                None => {
                    warn!("log of pin {} stalled after {} samples", self.pin, series.len());
                    return Err(SessionError::LogStalled {
                        received: series.len(),
                    });
                }
            }
        }
        Ok((series, false))
    }
}
