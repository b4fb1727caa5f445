// src/transmit.rs
//
// Single-frame transmission from operator input: parse the ID and payload
// text, build the frame, write it to the adapter and log it as TX.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::io::{id_fits, CanFrame, FrameCodec, FrameWriter, SlcanCodec};
use crate::session::CaptureSession;

// ============================================================================
// Types
// ============================================================================

/// Frame type chosen by the operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Classic data frame
    #[default]
    Std,
    /// Remote request; the payload's byte count is the requested length
    Rtr,
    /// CAN FD without bit rate switch
    Fd,
    /// CAN FD with bit rate switch
    FdBrs,
}

impl FromStr for TxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "std" => Ok(TxKind::Std),
            "rtr" => Ok(TxKind::Rtr),
            "fd" => Ok(TxKind::Fd),
            "fd_brs" => Ok(TxKind::FdBrs),
            other => Err(format!(
                "Unknown frame type '{}' (expected std, rtr, fd or fd_brs)",
                other
            )),
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxKind::Std => "std",
            TxKind::Rtr => "rtr",
            TxKind::Fd => "fd",
            TxKind::FdBrs => "fd_brs",
        })
    }
}

/// A frame as typed by the operator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransmitIntent {
    /// Hex ID, optional `0x` prefix
    pub id: String,
    #[serde(default)]
    pub extended: bool,
    /// Payload text; every group of one or two hex digits is a byte
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub kind: TxKind,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a hex CAN ID
pub fn parse_id(text: &str) -> Result<u32, String> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("Invalid CAN ID '{}'", text));
    }
    u32::from_str_radix(digits, 16).map_err(|e| format!("Invalid CAN ID '{}': {}", text, e))
}

/// Read bytes from free-form hex text.
///
/// Runs of hex digits are split into pairs from the left, so `"ABC"` is
/// `[0xAB, 0x0C]`. Anything else separates groups.
pub fn parse_payload(text: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut pending: Option<u8> = None;

    for c in text.chars() {
        match c.to_digit(16) {
            Some(nibble) => {
                let nibble = nibble as u8;
                match pending.take() {
                    Some(high) => bytes.push((high << 4) | nibble),
                    None => pending = Some(nibble),
                }
            }
            None => {
                if let Some(single) = pending.take() {
                    bytes.push(single);
                }
            }
        }
    }
    if let Some(single) = pending {
        bytes.push(single);
    }
    bytes
}

impl TransmitIntent {
    /// Build the frame. Payloads longer than the kind allows are truncated.
    pub fn to_frame(&self) -> Result<CanFrame, String> {
        let id = parse_id(&self.id)?;
        if !id_fits(id, self.extended) {
            return Err(format!(
                "CAN ID 0x{:X} does not fit in {} bits",
                id,
                if self.extended { 29 } else { 11 }
            ));
        }

        let payload = parse_payload(&self.data);
        Ok(match self.kind {
            TxKind::Std => CanFrame::data(id, self.extended, &payload),
            TxKind::Rtr => CanFrame::remote(id, self.extended, payload.len()),
            TxKind::Fd => CanFrame::fd(id, self.extended, &payload, false),
            TxKind::FdBrs => CanFrame::fd(id, self.extended, &payload, true),
        })
    }
}

// ============================================================================
// Transmission
// ============================================================================

/// Send one frame and log it as transmitted. Returns the logged frame.
///
/// The session is only locked to record the frame, never across the write,
/// so the receive path keeps ingesting while the adapter is busy.
pub async fn transmit_frame(
    frame: &CanFrame,
    writer: &dyn FrameWriter,
    session: &Mutex<CaptureSession>,
) -> Result<CanFrame, String> {
    let bytes = SlcanCodec::encode(frame)?;
    writer.write_command(bytes).await?;
    Ok(session.lock().await.record_tx(frame))
}

/// Parse the operator's intent, send it and log it
pub async fn transmit(
    intent: &TransmitIntent,
    writer: &dyn FrameWriter,
    session: &Mutex<CaptureSession>,
) -> Result<CanFrame, String> {
    let frame = intent.to_frame()?;
    let sent = transmit_frame(&frame, writer, session).await?;
    tlog!(
        "[transmit] Sent {} frame 0x{:X} ({} bytes)",
        intent.kind,
        sent.id,
        sent.data.len()
    );
    Ok(sent)
}
