// src/io/timeline/mod.rs
//
// Trace files: format detection, parsing into CanFrame records, export to the
// generic CSV grammar, and timed replay of a parsed trace.

mod canhacker;
mod csv;
pub mod replay;

use std::fs;
use std::path::Path;

pub use canhacker::{parse_canhacker, parse_canhacker_line, LineVariant};
pub use csv::{format_csv_line, parse_csv, parse_csv_line};
pub use replay::{replay, ReplayControl, ReplayOptions, ReplayOutcome};

use crate::io::CanFrame;

/// Header markers that only appear in CanHacker exports
const CANHACKER_SIGNATURES: [&str; 3] = ["@ TEXT @", "LocalTime=", "Device GUID"];

/// Line prefixes treated as headers or comments by every grammar
const COMMENT_PREFIXES: [&str; 4] = ["@", "#", ";", "Version"];

/// Grammar that produced a trace document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    /// `timestamp,delta,type,id,dlc,payload` - the export format
    GenericCsv,
    /// Whitespace-separated CanHacker table (PEAK lines are recognised per line)
    CanHacker,
}

impl TraceFormat {
    pub fn name(self) -> &'static str {
        match self {
            TraceFormat::GenericCsv => "csv",
            TraceFormat::CanHacker => "canhacker",
        }
    }
}

/// Convert `\r\n` and lone `\r` line breaks to `\n`
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Whether a trimmed line is a header or comment
pub fn is_comment_line(trimmed: &str) -> bool {
    COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Pick the grammar for a document.
///
/// A CanHacker header signature anywhere in the text wins. Otherwise the first
/// data line decides: at most two commas plus some whitespace means CanHacker.
pub fn detect_format(text: &str) -> TraceFormat {
    if CANHACKER_SIGNATURES.iter().any(|sig| text.contains(sig)) {
        return TraceFormat::CanHacker;
    }

    let first_data_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_comment_line(l));

    match first_data_line {
        Some(line) => {
            let commas = line.matches(',').count();
            let whitespace_runs = line.split_whitespace().count().saturating_sub(1);
            if commas <= 2 && whitespace_runs > 0 {
                TraceFormat::CanHacker
            } else {
                TraceFormat::GenericCsv
            }
        }
        None => TraceFormat::GenericCsv,
    }
}

/// Parse a whole document with the given grammar. Bad lines are skipped.
pub fn parse_trace(text: &str, format: TraceFormat) -> Vec<CanFrame> {
    let text = normalize_line_endings(text);
    let frames = match format {
        TraceFormat::GenericCsv => parse_csv(&text),
        TraceFormat::CanHacker => parse_canhacker(&text),
    };
    tlog!("[trace] Parsed {} frames ({})", frames.len(), format.name());
    frames
}

/// Detect the grammar, then parse
pub fn parse_trace_auto(text: &str) -> (TraceFormat, Vec<CanFrame>) {
    let format = detect_format(&normalize_line_endings(text));
    (format, parse_trace(text, format))
}

/// Export records as generic CSV, one line per record joined by `\n`
pub fn serialize_trace(frames: &[CanFrame]) -> String {
    frames
        .iter()
        .map(format_csv_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read and parse a trace file
pub fn load_trace_file(path: &Path) -> Result<(TraceFormat, Vec<CanFrame>), String> {
    let bytes = fs::read(path)
        .map_err(|e| format!("Failed to open trace file '{}': {}", path.display(), e))?;
    let text = String::from_utf8_lossy(&bytes);
    tlog!(
        "[trace] Loaded {} ({} bytes)",
        path.display(),
        bytes.len()
    );
    Ok(parse_trace_auto(&text))
}

/// Write records to `path` as generic CSV
pub fn save_trace_file(path: &Path, frames: &[CanFrame]) -> Result<(), String> {
    fs::write(path, serialize_trace(frames))
        .map_err(|e| format!("Failed to write trace file '{}': {}", path.display(), e))?;
    tlog!("[trace] Saved {} frames to {}", frames.len(), path.display());
    Ok(())
}

/// File name for an export taken now: `can_trace_YYYY-mm-ddTHH-MM-SS.csv`
pub fn export_file_name() -> String {
    format!(
        "can_trace_{}.csv",
        chrono::Local::now().format("%Y-%m-%dT%H-%M-%S")
    )
}
