// src/io/slcan/decoder.rs
//
// Stream framing for slcan: turns arbitrarily chunked serial input into
// CR-terminated command lines and classifies each one.

use serde::Serialize;

use super::codec::{SlcanCodec, CR};
use crate::io::CanFrame;

/// Bell character sent by slcan firmware to signal an error
const BELL: u8 = 0x07;

/// Longest unterminated tail kept between chunks. The longest valid line
/// (extended FD, 64 bytes) is 138 characters.
const MAX_PENDING: usize = 256;

/// One classified slcan line
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlcanEvent {
    /// A received bus frame
    Frame(CanFrame),
    /// `z` / `Z` acknowledgement
    Ack { raw: String },
    /// Bell - the adapter rejected a command
    Error { raw: String },
    /// Any other line, kept verbatim
    Unknown { raw: String },
}

/// Incremental slcan line decoder.
///
/// Keeps the bytes after the last `\r` until the next chunk completes them.
/// Malformed frame lines are counted and skipped; they never stop the stream.
#[derive(Debug, Default)]
pub struct SlcanDecoder {
    tail: Vec<u8>,
    dropped: u64,
}

impl SlcanDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events for every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SlcanEvent> {
        self.tail.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut dropped = 0;

        while let Some(offset) = self.tail[start..].iter().position(|&b| b == CR) {
            let end = start + offset;
            let line = &self.tail[start..end];
            if !line.is_empty() {
                match classify_line(line) {
                    Some(event) => events.push(event),
                    None => dropped += 1,
                }
            }
            start = end + 1;
        }
        self.tail.drain(..start);

        // A device streaming garbage without terminators must not grow the tail forever
        if self.tail.len() > MAX_PENDING {
            tlog!(
                "[slcan] Discarding {} unterminated bytes",
                self.tail.len()
            );
            self.tail.clear();
            dropped += 1;
        }

        self.dropped += dropped;
        events
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> &[u8] {
        &self.tail
    }

    /// Number of lines discarded as malformed since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget any partial line (e.g. after reopening the port)
    pub fn reset(&mut self) {
        self.tail.clear();
    }
}

/// Classify one complete line. `None` means a malformed frame line.
fn classify_line(line: &[u8]) -> Option<SlcanEvent> {
    let raw = || String::from_utf8_lossy(line).into_owned();
    match line[0] {
        b't' | b'T' | b'r' | b'R' | b'd' | b'D' | b'b' | b'B' => {
            match SlcanCodec::decode_bytes(line) {
                Ok(frame) => Some(SlcanEvent::Frame(frame)),
                Err(e) => {
                    tlog!("[slcan] Dropped line {:?}: {}", raw(), e);
                    None
                }
            }
        }
        b'z' | b'Z' => Some(SlcanEvent::Ack { raw: raw() }),
        BELL => Some(SlcanEvent::Error { raw: raw() }),
        _ => Some(SlcanEvent::Unknown { raw: raw() }),
    }
}
