// src/io/timeline/canhacker.rs
//
// Whitespace-separated trace tables.
//
// CanHacker: <time> <channel> <flags> <id> <dlc> <b0> <b1> ...
//   01,332276  1  00000004  440  8  40 00 00 00 00 00 00 00
//   The time may use a comma as decimal separator.
//
// PEAK (recognised per line): <n>) <time> Rx|Tx <id> <dlc> <b0> <b1> ...
//   1) 0.000 Rx 0123 2 AA BB
//
// Neither carries a reliable extended-ID flag; it is inferred from the ID.

use crate::io::{
    len_to_dlc_code, CanFrame, Direction, FrameKind, FrameTimestamp, MAX_CLASSIC_LEN,
    MAX_EXTENDED_ID, MAX_FD_LEN, MAX_STANDARD_ID,
};

use super::csv::FALLBACK_DELTA;
use super::is_comment_line;

/// Minimum whitespace-separated fields in a table line
const MIN_FIELDS: usize = 5;

/// Hex digits beyond which a PEAK ID is read as extended
const PEAK_STANDARD_ID_DIGITS: usize = 4;

/// Grammar of a single table line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineVariant {
    CanHacker,
    Peak,
}

impl LineVariant {
    /// PEAK lines start with `<n>)` and carry a direction in the third field
    pub fn of(fields: &[&str]) -> Self {
        let numbered = fields.first().is_some_and(|f| f.ends_with(')'));
        let directed = fields.get(2).is_some_and(|f| *f == "Rx" || *f == "Tx");
        if numbered && directed {
            LineVariant::Peak
        } else {
            LineVariant::CanHacker
        }
    }
}

/// Tracks the previous timestamp to compute per-record deltas
#[derive(Debug, Default)]
struct DeltaClock {
    started: bool,
    last: Option<f64>,
}

impl DeltaClock {
    /// Delta for the next record. 0 for the first, the fallback when either
    /// timestamp is not a number.
    fn next(&mut self, time: Option<f64>) -> f64 {
        let delta = if !self.started {
            0.0
        } else {
            match (time, self.last) {
                (Some(now), Some(prev)) => now - prev,
                _ => FALLBACK_DELTA,
            }
        };
        self.started = true;
        self.last = time;
        delta
    }
}

/// Parse every CanHacker / PEAK line in a document
pub fn parse_canhacker(text: &str) -> Vec<CanFrame> {
    let mut frames = Vec::new();
    let mut clock = DeltaClock::default();

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment_line(trimmed) {
            continue;
        }
        match parse_canhacker_line(trimmed) {
            Some((time, mut frame)) => {
                frame.delta = clock.next(time);
                frames.push(frame);
            }
            None => tlog!("[trace] Skipping table line {}: {}", index + 1, trimmed),
        }
    }
    frames
}

/// Parse one table line. Returns the numeric time (if it parsed) alongside
/// the record; the record's delta is left at 0 for the caller to fill in.
pub fn parse_canhacker_line(line: &str) -> Option<(Option<f64>, CanFrame)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let variant = LineVariant::of(&fields);
    let time_text = match variant {
        LineVariant::Peak => fields[1].to_string(),
        LineVariant::CanHacker => fields[0].replacen(',', ".", 1),
    };
    let id_text = fields[3];

    let id = u32::from_str_radix(id_text, 16).ok()?;
    let len: usize = fields[4].parse().ok()?;
    if id > MAX_EXTENDED_ID || len > MAX_FD_LEN {
        return None;
    }

    let extended = match variant {
        LineVariant::Peak => id_text.len() > PEAK_STANDARD_ID_DIGITS || id > MAX_STANDARD_ID,
        LineVariant::CanHacker => id > MAX_STANDARD_ID,
    };

    // Missing or non-hex byte tokens are skipped
    let data: Vec<u8> = fields[5..]
        .iter()
        .take(len)
        .filter_map(|b| u8::from_str_radix(b, 16).ok())
        .collect();

    let (kind, dlc) = if len > MAX_CLASSIC_LEN {
        (FrameKind::FdData, len_to_dlc_code(len))
    } else {
        (FrameKind::Data, len as u8)
    };

    let time = time_text.parse::<f64>().ok().filter(|t| t.is_finite());
    let frame = CanFrame {
        id,
        extended,
        kind,
        dlc,
        data,
        direction: Direction::Rx,
        timestamp: FrameTimestamp::Trace(time_text),
        delta: 0.0,
    };
    Some((time, frame))
}
