//! Command dispatcher
//!
//! Sends one command at a time over a [`Transport`], collects bytes until a
//! checksum-valid frame arrives, and retransmits on timeout or corruption.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{
    encode, Checksum, Command, DecodeOptions, DispatchError, FrameBuffer, Response,
    DEFAULT_BYTE_TIMEOUT_MS, DEFAULT_MAX_RETRIES, MAX_PAYLOAD_SIZE,
};
use crate::transport::Transport;

/// Size of each read request handed to the transport
const READ_CHUNK: usize = 64;

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Time allowed for a complete response after each transmission
    pub byte_timeout_ms: u64,
    /// Retransmissions after the first attempt
    pub max_retries: u32,
    /// Frame trailer algorithm
    pub checksum: Checksum,
    /// Prefix payloads with a sequence byte the device must echo
    pub sequence_numbers: bool,
    /// Largest payload accepted while decoding
    pub max_payload: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            byte_timeout_ms: DEFAULT_BYTE_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            checksum: Checksum::default(),
            sequence_numbers: false,
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }
}

impl DispatchConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            checksum: self.checksum,
            max_payload: self.max_payload.min(MAX_PAYLOAD_SIZE),
        }
    }
}

/// Transport plus the only state that outlives a call
struct Link<T> {
    transport: T,
    next_sequence: u8,
}

impl<T> Link<T> {
    fn take_sequence(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }
}

/// What went wrong during one attempt
#[derive(Debug, Default)]
struct AttemptFaults {
    corrupted: bool,
    sequence_mismatch: bool,
}

/// Request/response engine over a single transport
///
/// One call may be in flight at a time. A second concurrent call is
/// rejected with [`DispatchError::Busy`] rather than queued.
pub struct Dispatcher<T> {
    link: Mutex<Link<T>>,
    config: DispatchConfig,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: DispatchConfig) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                next_sequence: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Direct access to the transport when no call can be in flight
    pub fn transport_mut(&mut self) -> &mut T {
        let link = match self.link.get_mut() {
            Ok(link) => link,
            Err(poisoned) => poisoned.into_inner(),
        };
        &mut link.transport
    }

    /// Release the dispatcher and hand the transport back
    pub fn into_transport(self) -> T {
        match self.link.into_inner() {
            Ok(link) => link.transport,
            Err(poisoned) => poisoned.into_inner().transport,
        }
    }

    /// Send a command and wait for its response, retrying per configuration
    pub fn send(&self, command: &Command) -> Result<Response, DispatchError> {
        let mut link = self.lock()?;
        let mut buffer = FrameBuffer::new(self.config.decode_options());
        self.exchange(&mut link, &mut buffer, command, None)
            .map(|(response, _)| response)
    }

    /// Like [`send`](Self::send), but gives up once `deadline` passes
    pub fn send_until(&self, command: &Command, deadline: Instant) -> Result<Response, DispatchError> {
        let mut link = self.lock()?;
        let mut buffer = FrameBuffer::new(self.config.decode_options());
        self.exchange(&mut link, &mut buffer, command, Some(deadline))
            .map(|(response, _)| response)
    }

    /// Send a command that starts a stream of unsolicited frames.
    ///
    /// Returns the command's own response plus a [`ResponseStream`] that
    /// keeps the transport and any bytes read past the response. The call
    /// stays in flight, so other commands get [`DispatchError::Busy`], until
    /// the stream is dropped.
    pub fn send_streaming(
        &self,
        command: &Command,
    ) -> Result<(Response, ResponseStream<'_, T>), DispatchError> {
        let mut link = self.lock()?;
        let mut buffer = FrameBuffer::new(self.config.decode_options());
        let (response, sequence) = self.exchange(&mut link, &mut buffer, command, None)?;
        let stream = ResponseStream {
            dispatcher: self,
            link,
            buffer,
            sequence,
        };
        Ok((response, stream))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Link<T>>, DispatchError> {
        match self.link.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => {
                warn!("rejecting command: another command is in flight");
                Err(DispatchError::Busy)
            }
            // Per-call state is never left inside the link, so a panic in a
            // previous call leaves nothing half-updated
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn exchange(
        &self,
        link: &mut Link<T>,
        buffer: &mut FrameBuffer,
        command: &Command,
        call_deadline: Option<Instant>,
    ) -> Result<(Response, Option<u8>), DispatchError> {
        let sequence = if self.config.sequence_numbers {
            Some(link.take_sequence())
        } else {
            None
        };
        let frame = encode(command, sequence, self.config.checksum)?;
        let max_attempts = self.config.max_retries.saturating_add(1);

        let mut attempts = 0u32;
        let mut corrupted_attempts = 0u32;
        let mut mismatch_attempts = 0u32;

        while attempts < max_attempts {
            let now = Instant::now();
            if call_deadline.is_some_and(|d| now >= d) {
                debug!("{}: caller deadline passed after {} attempts", command, attempts);
                break;
            }

            if attempts > 0 {
                if command.has_side_effects() {
                    warn!(
                        "{}: retransmitting (retry {}/{}); the device may apply it twice",
                        command, attempts, self.config.max_retries
                    );
                } else {
                    debug!(
                        "{}: retransmitting (retry {}/{})",
                        command, attempts, self.config.max_retries
                    );
                }
            }
            // Anything still arriving belongs to an earlier exchange
            buffer.clear();
            link.transport.discard_input()?;
            attempts += 1;

            debug!("{}: sending {} bytes: {:02x?}", command, frame.len(), frame);
            if let Err(e) = link.transport.write_all(&frame).and_then(|_| link.transport.flush()) {
                warn!("{}: write failed: {}", command, e);
                return Err(DispatchError::Transport(e));
            }

            let mut attempt_deadline = Instant::now() + self.config.byte_timeout();
            if let Some(d) = call_deadline {
                attempt_deadline = attempt_deadline.min(d);
            }

            let mut faults = AttemptFaults::default();
            let started = Instant::now();
            if let Some(response) = self.await_response(
                &mut link.transport,
                buffer,
                attempt_deadline,
                sequence,
                &mut faults,
            )? {
                debug!(
                    "{}: {} response with {} result bytes in {}ms",
                    command,
                    response.status,
                    response.result.len(),
                    started.elapsed().as_millis()
                );
                return Ok((response, sequence));
            }

            if faults.sequence_mismatch {
                mismatch_attempts += 1;
            }
            if faults.corrupted {
                corrupted_attempts += 1;
            }
            warn!(
                "{}: no valid response (attempt {}/{}, corrupted={}, sequence_mismatch={})",
                command, attempts, max_attempts, faults.corrupted, faults.sequence_mismatch
            );
        }

        if attempts > 0 && mismatch_attempts == attempts {
            return Err(DispatchError::ProtocolViolation(format!(
                "sequence echo mismatch on all {} attempts for {}",
                attempts, command
            )));
        }
        if attempts > 0 && corrupted_attempts == attempts {
            return Err(DispatchError::MalformedFrame { attempts });
        }
        Err(DispatchError::Timeout { attempts })
    }

    /// Read and decode until a valid frame or the deadline.
    ///
    /// Frames whose sequence byte does not match `expected` are dropped
    /// whole. At the deadline, bytes still held back by a truncated head are
    /// resynchronized one at a time before giving up.
    fn await_response(
        &self,
        transport: &mut T,
        buffer: &mut FrameBuffer,
        deadline: Instant,
        expected: Option<u8>,
        faults: &mut AttemptFaults,
    ) -> Result<Option<Response>, DispatchError> {
        let discarded_before = buffer.discarded();
        let mut chunk = [0u8; READ_CHUNK];

        let result = loop {
            if let Some(response) = self.next_response(buffer, expected, faults, false) {
                break Some(response);
            }

            if Instant::now() >= deadline {
                if !buffer.is_empty() {
                    debug!("deadline reached with {} undecoded bytes, resynchronizing", buffer.len());
                }
                break self.next_response(buffer, expected, faults, true);
            }

            let n = match transport.read_available(&mut chunk, deadline) {
                Ok(n) => n,
                Err(e) => {
                    warn!("read failed: {}", e);
                    return Err(DispatchError::Transport(e));
                }
            };
            if n > 0 {
                trace!("received {} bytes: {:02x?}", n, &chunk[..n]);
                buffer.extend(&chunk[..n]);
            }
        };

        if buffer.discarded() > discarded_before {
            faults.corrupted = true;
        }
        Ok(result)
    }

    /// Pop buffered frames until one carries the expected sequence byte
    fn next_response(
        &self,
        buffer: &mut FrameBuffer,
        expected: Option<u8>,
        faults: &mut AttemptFaults,
        input_ended: bool,
    ) -> Option<Response> {
        loop {
            let payload = if input_ended {
                buffer.flush_frame()?
            } else {
                buffer.next_frame()?
            };
            match strip_sequence(&payload, expected, self.config.sequence_numbers) {
                Some(body) => return Some(Response::from_payload(body)),
                None => {
                    warn!(
                        "dropping frame with unexpected sequence (expected {:?}): {:02x?}",
                        expected, payload
                    );
                    faults.sequence_mismatch = true;
                }
            }
        }
    }
}

/// Unsolicited frames following a streaming command
///
/// Holds the dispatcher's transport for its whole lifetime. Frames that
/// arrived in the same read as the command's response are kept and returned
/// first.
pub struct ResponseStream<'a, T> {
    dispatcher: &'a Dispatcher<T>,
    link: MutexGuard<'a, Link<T>>,
    buffer: FrameBuffer,
    /// Sequence byte of the streaming command, echoed by every frame
    sequence: Option<u8>,
}

impl<T: Transport> ResponseStream<'_, T> {
    /// Wait for the next frame; `Ok(None)` if nothing valid arrives before
    /// `deadline`. Nothing is transmitted and nothing is retried.
    pub fn next_response(&mut self, deadline: Instant) -> Result<Option<Response>, DispatchError> {
        let mut faults = AttemptFaults::default();
        self.dispatcher.await_response(
            &mut self.link.transport,
            &mut self.buffer,
            deadline,
            self.sequence,
            &mut faults,
        )
    }
}

/// Check and remove the echoed sequence byte.
///
/// Returns `None` when sequencing is enabled and the echo is missing or wrong.
fn strip_sequence(payload: &[u8], expected: Option<u8>, sequenced: bool) -> Option<&[u8]> {
    if !sequenced {
        return Some(payload);
    }
    let (&seq, body) = payload.split_first()?;
    match expected {
        Some(want) if want != seq => None,
        _ => Some(body),
    }
}
