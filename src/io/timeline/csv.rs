// src/io/timeline/csv.rs
//
// Generic CSV trace grammar, the format traces are exported in.
// Format: timestamp,delta,type,id,dlc,payload
//
//   type     slcan command letter (t/T/r/R/d/D/b/B); uppercase = extended ID
//   id       hex, no fixed width
//   dlc      declared byte count (requested length for remote frames)
//   payload  hex pairs, no separators

use crate::io::slcan::codec::parse_hex_u32;
use crate::io::slcan::{command_char, frame_kind_for_char};
use crate::io::{
    id_fits, len_to_dlc_code, CanFrame, Direction, FrameKind, FrameTimestamp, MAX_CLASSIC_LEN,
    MAX_FD_LEN,
};

use super::is_comment_line;

/// Minimum fields in a CSV record
const MIN_FIELDS: usize = 6;

/// Delta used when the delta column is not a number
pub(super) const FALLBACK_DELTA: f64 = 0.001;

/// Parse every record in a CSV document, skipping lines that don't parse
pub fn parse_csv(text: &str) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment_line(trimmed) {
            continue;
        }
        match parse_csv_line(trimmed) {
            Some(frame) => frames.push(frame),
            None => tlog!("[trace] Skipping CSV line {}: {}", index + 1, trimmed),
        }
    }
    frames
}

/// Parse one CSV record
pub fn parse_csv_line(line: &str) -> Option<CanFrame> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < MIN_FIELDS {
        return None;
    }

    let timestamp = parts[0];
    let delta = parts[1]
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite())
        .unwrap_or(FALLBACK_DELTA);

    // Unknown letters fall back to a classic data frame
    let mut type_chars = parts[2].chars();
    let (extended, kind) = match (type_chars.next(), type_chars.next()) {
        (Some(c), None) => frame_kind_for_char(c).unwrap_or((false, FrameKind::Data)),
        _ => (false, FrameKind::Data),
    };

    let id = parse_hex_u32(parts[3].as_bytes())?;
    if !id_fits(id, extended) {
        return None;
    }

    let len: usize = parts[4].parse().ok()?;
    let payload = decode_payload(parts[5])?;

    let (dlc, data) = match kind {
        FrameKind::Data => {
            if len > MAX_CLASSIC_LEN {
                return None;
            }
            (len as u8, truncate(payload, len))
        }
        FrameKind::RemoteRequest => {
            if len > MAX_CLASSIC_LEN {
                return None;
            }
            (len as u8, Vec::new())
        }
        FrameKind::FdData | FrameKind::FdDataBrs => {
            if len > MAX_FD_LEN {
                return None;
            }
            (len_to_dlc_code(len), truncate(payload, len))
        }
    };

    Some(CanFrame {
        id,
        extended,
        kind,
        dlc,
        data,
        direction: Direction::Rx,
        timestamp: FrameTimestamp::Trace(timestamp.to_string()),
        delta,
    })
}

/// Format one record as a CSV line (no terminator)
pub fn format_csv_line(frame: &CanFrame) -> String {
    let len = match frame.kind {
        FrameKind::Data | FrameKind::RemoteRequest => frame.dlc as usize,
        FrameKind::FdData | FrameKind::FdDataBrs => frame.declared_len(),
    };
    format!(
        "{},{:.6},{},{:X},{},{}",
        frame.timestamp,
        frame.delta,
        command_char(frame.kind, frame.extended),
        frame.id,
        len,
        hex::encode_upper(&frame.data)
    )
}

/// Successive two-digit hex groups; an odd trailing digit is ignored
fn decode_payload(field: &str) -> Option<Vec<u8>> {
    let even = field.len() - field.len() % 2;
    hex::decode(field.get(..even)?).ok()
}

fn truncate(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.truncate(len);
    bytes
}
