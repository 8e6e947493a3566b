//! Shared test transport with scripted replies and fault injection

#![allow(dead_code)]

use controllino_core::protocol::{encode_frame, Checksum};
use controllino_core::transport::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::Sender;
use std::time::Instant;

/// Frame a payload with the default checksum
pub fn frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload, Checksum::Sum8).expect("test payload fits in a frame")
}

/// Transport that answers each write with scripted chunks
///
/// Each write pops the next reply; a reply is a list of chunks, one chunk
/// returned per read call. An empty reply is silence.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Vec<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub write_attempts: usize,
    pub reads: usize,
    pub discards: usize,
    pub fail_writes: bool,
    pub fail_reads: bool,
    /// Notified every time a read starts
    pub read_signal: Option<Sender<()>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply delivered in one read
    pub fn reply(mut self, bytes: Vec<u8>) -> Self {
        self.replies.push_back(vec![bytes]);
        self
    }

    /// Queue a reply delivered across several reads
    pub fn reply_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.replies.push_back(chunks);
        self
    }

    /// Put bytes on the line before any write
    pub fn push_unsolicited(&mut self, bytes: Vec<u8>) {
        self.pending.push_back(bytes);
    }

    /// Queue a write that gets no answer
    pub fn silence(mut self) -> Self {
        self.replies.push_back(Vec::new());
        self
    }
}

impl Transport for ScriptedTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_attempts += 1;
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.writes.push(bytes.to_vec());
        if let Some(chunks) = self.replies.pop_front() {
            self.pending.extend(chunks);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<usize> {
        self.reads += 1;
        if let Some(signal) = &self.read_signal {
            let _ = signal.send(());
        }
        if self.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "framing error on line"));
        }

        match self.pending.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.pending.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
                Ok(0)
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.discards += 1;
        self.pending.clear();
        Ok(())
    }
}
