// src/io/mod.rs
//
// Frame model shared by the slcan codec, the trace codecs and the frame log,
// plus the serial transport that feeds them.

// Core modules
pub mod codec; // Frame codec trait and implementations
mod error;
mod types;

// Trace files (detection, parsing, export) and replay
pub mod timeline;

// Real-time drivers
pub mod serial; // port enumeration and framing parameters
pub mod slcan;

pub use codec::{FrameCodec, SlcanCodec};
pub use error::IoError;
pub use slcan::{SlcanCommand, SlcanDecoder, SlcanEvent, SlcanMode};
pub use timeline::{detect_format, parse_trace, serialize_trace, TraceFormat};
pub use types::{FrameWriter, SourceMessage, TransmitHandle, TransmitRequest, TransmitSender};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Constants
// ============================================================================

/// Largest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit
pub const MAX_CLASSIC_LEN: usize = 8;
/// CAN FD payload limit
pub const MAX_FD_LEN: usize = 64;

/// Byte counts reachable through the CAN FD length code, indexed by code.
const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

// ============================================================================
// Frame Types
// ============================================================================

/// What a frame carries on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Classic data frame (0-8 bytes)
    Data,
    /// Remote transmission request, no payload
    RemoteRequest,
    /// CAN FD frame without bit rate switch
    FdData,
    /// CAN FD frame with bit rate switch
    FdDataBrs,
}

impl FrameKind {
    pub fn is_fd(self) -> bool {
        matches!(self, FrameKind::FdData | FrameKind::FdDataBrs)
    }
}

/// Direction tag. TX sub-tags are bookkeeping only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "RX")]
    Rx,
    #[serde(rename = "TX")]
    Tx,
    #[serde(rename = "TX_RTR")]
    TxRtr,
    #[serde(rename = "TX_FD")]
    TxFd,
}

impl Direction {
    /// Direction tag for a locally transmitted frame of the given kind
    pub fn for_transmit(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Data => Direction::Tx,
            FrameKind::RemoteRequest => Direction::TxRtr,
            FrameKind::FdData | FrameKind::FdDataBrs => Direction::TxFd,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
            Direction::TxRtr => "TX_RTR",
            Direction::TxFd => "TX_FD",
        };
        f.pad(s)
    }
}

/// When a frame was seen.
///
/// Live frames carry the host time; frames read from a trace file keep the
/// file's own timestamp text so an export writes it back unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameTimestamp {
    /// Host UNIX timestamp in microseconds
    Captured(u64),
    /// Timestamp token taken from a trace file
    Trace(String),
}

impl FrameTimestamp {
    pub fn now() -> Self {
        FrameTimestamp::Captured(now_us())
    }
}

impl fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameTimestamp::Captured(us) => write!(f, "{}", us),
            FrameTimestamp::Trace(s) => f.write_str(s),
        }
    }
}

/// Canonical CAN / CAN FD frame - the unit stored in the frame log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanFrame {
    /// 11-bit or 29-bit identifier
    pub id: u32,
    /// Extended (29-bit) identifier
    pub extended: bool,
    pub kind: FrameKind,
    /// Byte count for classic/remote frames, length code (0-F) for FD frames
    pub dlc: u8,
    pub data: Vec<u8>,
    pub direction: Direction,
    pub timestamp: FrameTimestamp,
    /// Seconds since the previous frame of the same sequence
    pub delta: f64,
}

impl CanFrame {
    fn build(id: u32, extended: bool, kind: FrameKind, dlc: u8, data: Vec<u8>) -> Self {
        Self {
            id,
            extended,
            kind,
            dlc,
            data,
            direction: Direction::Rx,
            timestamp: FrameTimestamp::now(),
            delta: 0.0,
        }
    }

    /// Classic data frame. Payload beyond 8 bytes is dropped.
    pub fn data(id: u32, extended: bool, bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_CLASSIC_LEN);
        Self::build(id, extended, FrameKind::Data, len as u8, bytes[..len].to_vec())
    }

    /// Remote request asking for `len` bytes (capped at 8)
    pub fn remote(id: u32, extended: bool, len: usize) -> Self {
        let len = len.min(MAX_CLASSIC_LEN);
        Self::build(id, extended, FrameKind::RemoteRequest, len as u8, Vec::new())
    }

    /// CAN FD frame. Payload beyond 64 bytes is dropped; a length between two
    /// representable sizes is padded with zeros up to the next one.
    pub fn fd(id: u32, extended: bool, bytes: &[u8], brs: bool) -> Self {
        let len = bytes.len().min(MAX_FD_LEN);
        let code = len_to_dlc_code(len);
        let mut data = bytes[..len].to_vec();
        data.resize(dlc_code_to_len(code), 0);
        let kind = if brs { FrameKind::FdDataBrs } else { FrameKind::FdData };
        Self::build(id, extended, kind, code, data)
    }

    /// Byte count implied by `dlc` and `kind`
    pub fn declared_len(&self) -> usize {
        match self.kind {
            FrameKind::Data => (self.dlc as usize).min(MAX_CLASSIC_LEN),
            FrameKind::RemoteRequest => 0,
            FrameKind::FdData | FrameKind::FdDataBrs => dlc_code_to_len(self.dlc),
        }
    }

    /// Whether `id` fits the width selected by `extended`
    pub fn id_in_range(&self) -> bool {
        id_fits(self.id, self.extended)
    }

    /// Same frame re-tagged as locally transmitted at `timestamp`
    pub fn as_transmitted(&self, timestamp: FrameTimestamp, delta: f64) -> Self {
        let mut frame = self.clone();
        frame.direction = Direction::for_transmit(frame.kind);
        frame.timestamp = timestamp;
        frame.delta = delta;
        frame
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Whether `id` fits in 11 or 29 bits
pub fn id_fits(id: u32, extended: bool) -> bool {
    if extended {
        id <= MAX_EXTENDED_ID
    } else {
        id <= MAX_STANDARD_ID
    }
}

/// CAN FD length code for a payload length, rounding up to the next
/// representable size. Lengths above 64 map to code 15.
pub fn len_to_dlc_code(len: usize) -> u8 {
    FD_LENGTHS
        .iter()
        .position(|&l| l >= len)
        .unwrap_or(FD_LENGTHS.len() - 1) as u8
}

/// Byte count for a CAN FD length code. Codes above 15 are treated as 15.
pub fn dlc_code_to_len(code: u8) -> usize {
    FD_LENGTHS[(code as usize).min(FD_LENGTHS.len() - 1)]
}

// ============================================================================
// Tests
// ============================================================================
