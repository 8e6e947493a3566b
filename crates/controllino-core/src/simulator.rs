//! Simulated Controllino device
//!
//! Implements [`Transport`] by decoding the frames written to it and
//! answering like the firmware would. Useful for running the client without
//! hardware and for exercising retry paths: responses can be dropped,
//! corrupted on demand, or corrupted at random with a seeded RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Instant;
use tracing::{debug, trace};

use crate::protocol::{
    encode_frame, try_decode, Checksum, DecodeOptions, DispatchConfig, Decoded, Opcode,
    PayloadBuilder, PinMode, Response, Status,
};
use crate::transport::Transport;

/// Number of addressable pins on the simulated board
pub const PIN_COUNT: u8 = 64;

/// Active signal logging job
#[derive(Debug, Clone)]
struct LogJob {
    pin: u8,
    period_ms: u32,
    sent: u32,
    /// Sequence byte of the LogSignal command, echoed by every sample
    sequence: Option<u8>,
}

/// Simulated device answering protocol frames
pub struct SimulatedDevice {
    checksum: Checksum,
    sequence_numbers: bool,
    /// Bytes written by the client, not yet decoded
    rx: Vec<u8>,
    /// Bytes waiting to be read by the client
    tx: VecDeque<u8>,
    levels: [u16; PIN_COUNT as usize],
    modes: HashMap<u8, PinMode>,
    saved_modes: HashMap<u8, PinMode>,
    pulses: HashMap<u8, u32>,
    log: Option<LogJob>,
    /// Device ends a log job on its own after this many samples
    log_limit: Option<u32>,
    ignore_next: u32,
    corrupt_next: u32,
    noise: Option<(StdRng, f64)>,
    commands_received: u32,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

impl SimulatedDevice {
    /// Create a device speaking the framing described by `config`
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            checksum: config.checksum,
            sequence_numbers: config.sequence_numbers,
            rx: Vec::new(),
            tx: VecDeque::new(),
            levels: [0; PIN_COUNT as usize],
            modes: HashMap::new(),
            saved_modes: HashMap::new(),
            pulses: HashMap::new(),
            log: None,
            log_limit: None,
            ignore_next: 0,
            corrupt_next: 0,
            noise: None,
            commands_received: 0,
        }
    }

    /// Corrupt each response with the given probability
    pub fn with_noise(mut self, seed: u64, probability: f64) -> Self {
        self.noise = Some((StdRng::seed_from_u64(seed), probability.clamp(0.0, 1.0)));
        self
    }

    /// End log jobs after `samples` samples
    pub fn with_log_limit(mut self, samples: u32) -> Self {
        self.log_limit = Some(samples);
        self
    }

    /// Stay silent for the next `count` commands
    pub fn ignore_next(&mut self, count: u32) {
        self.ignore_next = count;
    }

    /// Send a corrupted checksum for the next `count` responses
    pub fn corrupt_next(&mut self, count: u32) {
        self.corrupt_next = count;
    }

    /// Set the level an input pin will report
    pub fn set_input(&mut self, pin: u8, level: u16) {
        if let Some(slot) = self.levels.get_mut(pin as usize) {
            *slot = level;
        }
    }

    /// Current level of a pin
    pub fn level(&self, pin: u8) -> Option<u16> {
        self.levels.get(pin as usize).copied()
    }

    /// Number of pulses triggered on a pin
    pub fn pulses(&self, pin: u8) -> u32 {
        self.pulses.get(&pin).copied().unwrap_or(0)
    }

    /// Complete frames received, including ignored ones
    pub fn commands_received(&self) -> u32 {
        self.commands_received
    }

    pub fn is_logging(&self) -> bool {
        self.log.is_some()
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            checksum: self.checksum,
            ..DecodeOptions::default()
        }
    }

    /// Decode every complete frame in the receive buffer
    fn process_rx(&mut self) {
        let options = self.decode_options();
        loop {
            match try_decode(&self.rx, &options) {
                Decoded::Incomplete => break,
                Decoded::Malformed(_) => {
                    self.rx.remove(0);
                }
                Decoded::Frame { payload, consumed } => {
                    self.rx.drain(..consumed);
                    self.handle_frame(&payload);
                }
            }
        }
    }

    fn handle_frame(&mut self, payload: &[u8]) {
        self.commands_received += 1;
        if self.ignore_next > 0 {
            self.ignore_next -= 1;
            debug!("simulator: ignoring frame {:02x?}", payload);
            return;
        }

        let (sequence, body) = if self.sequence_numbers {
            match payload.split_first() {
                Some((&seq, body)) => (Some(seq), body),
                None => return,
            }
        } else {
            (None, payload)
        };

        let response = match body.split_first() {
            Some((&opcode, args)) => self.execute(opcode, args, sequence),
            None => status(Status::InvalidCommand),
        };
        self.queue(sequence, &response);
    }

    fn execute(&mut self, opcode: u8, args: &[u8], sequence: Option<u8>) -> Response {
        let Some(op) = Opcode::from_byte(opcode) else {
            return status(Status::InvalidCommand);
        };
        trace!("simulator: {:?} {:02x?}", op, args);

        let pin = args.first().copied();
        let valid_pin = pin.filter(|&p| p < PIN_COUNT);

        match op {
            Opcode::Ready => Response::ack(),
            Opcode::GetInput => match valid_pin {
                Some(p) => ok(PayloadBuilder::new().u16_le(self.levels[p as usize]).build()),
                None => status(Status::CommandFailed),
            },
            Opcode::SetOutput => match (valid_pin, args.get(1..3)) {
                (Some(p), Some(level)) => {
                    self.levels[p as usize] = u16::from_le_bytes([level[0], level[1]]);
                    Response::ack()
                }
                _ => status(Status::InvalidCommand),
            },
            Opcode::GetPinMode => match valid_pin {
                Some(p) => {
                    let mode = self.modes.get(&p).copied().unwrap_or(PinMode::Input);
                    ok(vec![mode.byte()])
                }
                None => status(Status::CommandFailed),
            },
            Opcode::SetPinMode => {
                match (valid_pin, args.get(1).copied().and_then(PinMode::from_byte)) {
                    (Some(p), Some(mode)) => {
                        self.modes.insert(p, mode);
                        Response::ack()
                    }
                    _ => status(Status::InvalidCommand),
                }
            }
            Opcode::LoadPinModes => {
                self.modes = self.saved_modes.clone();
                Response::ack()
            }
            Opcode::SavePinModes => {
                self.saved_modes = self.modes.clone();
                Response::ack()
            }
            Opcode::ResetPinModes => {
                self.modes.clear();
                Response::ack()
            }
            Opcode::TriggerPulse => match valid_pin {
                Some(p) => {
                    *self.pulses.entry(p).or_insert(0) += 1;
                    Response::ack()
                }
                None => status(Status::CommandFailed),
            },
            Opcode::LogSignal => {
                let period = args
                    .get(1..5)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                match (valid_pin, period) {
                    (_, Some(0)) => status(Status::CommandFailed),
                    (Some(p), Some(period_ms)) if self.log.is_none() => {
                        self.log = Some(LogJob {
                            pin: p,
                            period_ms,
                            sent: 0,
                            sequence,
                        });
                        Response::ack()
                    }
                    (Some(_), Some(_)) => status(Status::Busy),
                    _ => status(Status::InvalidCommand),
                }
            }
            Opcode::EndLogSignal => {
                let logging = self.log.as_ref().map(|job| job.pin);
                match valid_pin {
                    Some(p) if logging == Some(p) => {
                        self.log = None;
                        Response::ack()
                    }
                    _ => status(Status::CommandFailed),
                }
            }
        }
    }

    /// Emit the next log sample, if a job is running
    fn emit_sample(&mut self) {
        let Some(job) = self.log.as_mut() else {
            return;
        };
        let time_ms = job.sent.saturating_mul(job.period_ms);
        job.sent += 1;
        let done = self.log_limit.is_some_and(|limit| job.sent >= limit);
        let value = self.levels[job.pin as usize] as f32;
        let sequence = job.sequence;
        if done {
            self.log = None;
        }

        let response = ok(PayloadBuilder::new()
            .u32_le(time_ms)
            .f32_le(value)
            .bool(done)
            .build());
        self.queue(sequence, &response);
    }

    fn queue(&mut self, sequence: Option<u8>, response: &Response) {
        let mut payload = Vec::new();
        if let Some(seq) = sequence {
            payload.push(seq);
        }
        payload.extend(response.to_payload());

        let Ok(mut frame) = encode_frame(&payload, self.checksum) else {
            return;
        };

        let mut corrupt = false;
        if self.corrupt_next > 0 {
            self.corrupt_next -= 1;
            corrupt = true;
        } else if let Some((rng, probability)) = self.noise.as_mut() {
            corrupt = rng.gen_bool(*probability);
        }
        if corrupt {
            let last = frame.len() - 1;
            frame[last] = frame[last].wrapping_add(1);
            debug!("simulator: corrupting response {:02x?}", frame);
        }

        self.tx.extend(frame);
    }
}

fn ok(result: Vec<u8>) -> Response {
    Response {
        status: Status::Ok,
        result,
    }
}

fn status(status: Status) -> Response {
    Response {
        status,
        result: Vec::new(),
    }
}

impl Transport for SimulatedDevice {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.rx.extend_from_slice(bytes);
        self.process_rx();
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        if self.tx.is_empty() {
            self.emit_sample();
        }
        if self.tx.is_empty() {
            // Nothing to say: behave like a quiet line until the deadline
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            return Ok(0);
        }

        let n = self.tx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.tx.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, Command};
    use std::time::Duration;

    fn exchange(device: &mut SimulatedDevice, command: &Command) -> Response {
        let frame = encode(command, None, Checksum::Sum8).unwrap();
        device.write_all(&frame).unwrap();
        let mut buf = [0u8; 64];
        let n = device
            .read_available(&mut buf, Instant::now() + Duration::from_millis(5))
            .unwrap();
        match try_decode(&buf[..n], &DecodeOptions::default()) {
            Decoded::Frame { payload, .. } => Response::from_payload(&payload),
            other => panic!("unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn test_set_then_get_level() {
        let mut device = SimulatedDevice::default();
        assert!(exchange(&mut device, &Command::SetOutput { pin: 5, level: 900 }).is_ok());
        let response = exchange(&mut device, &Command::GetInput { pin: 5 });
        assert_eq!(response.u16_at(0), Some(900));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut device = SimulatedDevice::default();
        let response = exchange(&mut device, &Command::Raw { opcode: 0x7E, args: vec![] });
        assert_eq!(response.status, Status::InvalidCommand);
    }

    #[test]
    fn test_pin_out_of_range() {
        let mut device = SimulatedDevice::default();
        let response = exchange(&mut device, &Command::GetInput { pin: PIN_COUNT });
        assert_eq!(response.status, Status::CommandFailed);
    }

    #[test]
    fn test_save_load_modes() {
        let mut device = SimulatedDevice::default();
        exchange(&mut device, &Command::SetPinMode { pin: 3, mode: PinMode::Output });
        exchange(&mut device, &Command::SavePinModes);
        exchange(&mut device, &Command::ResetPinModes);
        assert_eq!(exchange(&mut device, &Command::GetPinMode { pin: 3 }).u8_at(0), Some(0));
        exchange(&mut device, &Command::LoadPinModes);
        assert_eq!(exchange(&mut device, &Command::GetPinMode { pin: 3 }).u8_at(0), Some(1));
    }

    #[test]
    fn test_log_limit_marks_done() {
        let mut device = SimulatedDevice::default().with_log_limit(2);
        device.set_input(1, 7);
        assert!(exchange(&mut device, &Command::LogSignal { pin: 1, period_ms: 100 }).is_ok());

        let mut buf = [0u8; 64];
        let deadline = Instant::now() + Duration::from_millis(5);
        let n = device.read_available(&mut buf, deadline).unwrap();
        let Decoded::Frame { payload, .. } = try_decode(&buf[..n], &DecodeOptions::default()) else {
            panic!("expected sample frame");
        };
        let first = Response::from_payload(&payload);
        assert_eq!(first.u32_at(0), Some(0));
        assert_eq!(first.f32_at(4), Some(7.0));
        assert_eq!(first.u8_at(8), Some(0));

        let n = device.read_available(&mut buf, deadline).unwrap();
        let Decoded::Frame { payload, .. } = try_decode(&buf[..n], &DecodeOptions::default()) else {
            panic!("expected sample frame");
        };
        let second = Response::from_payload(&payload);
        assert_eq!(second.u32_at(0), Some(100));
        assert_eq!(second.u8_at(8), Some(1));
        assert!(!device.is_logging());
    }

    #[test]
    fn test_ignore_next() {
        let mut device = SimulatedDevice::default();
        device.ignore_next(1);
        let frame = encode(&Command::Ready, None, Checksum::Sum8).unwrap();
        device.write_all(&frame).unwrap();
        let mut buf = [0u8; 8];
        let n = device
            .read_available(&mut buf, Instant::now() + Duration::from_millis(2))
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(device.commands_received(), 1);
    }
}
