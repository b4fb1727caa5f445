// src/io/slcan/codec.rs
//
// slcan (Serial Line CAN) ASCII protocol codec, including the CAN FD
// extensions used by CANable 2.0 / candleLight-FD style firmware.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf
//
// Frame formats:
//   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r
//   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*DLC>\r
//   RTR:      r<ID:3hex><DLC:1hex>\r / R<ID:8hex><DLC:1hex>\r
//   FD:       d<ID:3hex><CODE:1hex><DATA>\r / D<ID:8hex>...   (no bit rate switch)
//   FD+BRS:   b<ID:3hex><CODE:1hex><DATA>\r / B<ID:8hex>...
//
// FD frames carry a length code (0-F) instead of a byte count; see
// `crate::io::dlc_code_to_len`.

use serde::{Deserialize, Serialize};

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{
    dlc_code_to_len, len_to_dlc_code, CanFrame, FrameKind, FrameTimestamp, MAX_CLASSIC_LEN,
    MAX_EXTENDED_ID, MAX_FD_LEN, MAX_STANDARD_ID,
};

/// Command terminator
pub const CR: u8 = b'\r';

/// Highest `S` bitrate index accepted by slcan firmware (S0-SD)
pub const MAX_BITRATE_INDEX: u8 = 0xD;

/// Highest `Y` data-phase bitrate index
pub const MAX_FD_BITRATE_INDEX: u8 = 0xF;

/// slcan bitrate commands (S0-S8)
const SLCAN_BITRATES: [(u32, u8); 9] = [
    (10_000, 0),    // 10 Kbit/s
    (20_000, 1),    // 20 Kbit/s
    (50_000, 2),    // 50 Kbit/s
    (100_000, 3),   // 100 Kbit/s
    (125_000, 4),   // 125 Kbit/s
    (250_000, 5),   // 250 Kbit/s
    (500_000, 6),   // 500 Kbit/s
    (750_000, 7),   // 750 Kbit/s
    (1_000_000, 8), // 1 Mbit/s
];

// ============================================================================
// Frame letters
// ============================================================================

/// Command letter for a frame of the given kind
pub fn command_char(kind: FrameKind, extended: bool) -> char {
    let c = match kind {
        FrameKind::Data => 't',
        FrameKind::RemoteRequest => 'r',
        FrameKind::FdData => 'd',
        FrameKind::FdDataBrs => 'b',
    };
    if extended {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

/// Inverse of [`command_char`]: `(extended, kind)` for a frame letter
pub fn frame_kind_for_char(c: char) -> Option<(bool, FrameKind)> {
    let kind = match c.to_ascii_lowercase() {
        't' => FrameKind::Data,
        'r' => FrameKind::RemoteRequest,
        'd' => FrameKind::FdData,
        'b' => FrameKind::FdDataBrs,
        _ => return None,
    };
    Some((c.is_ascii_uppercase(), kind))
}

/// Parse ASCII hex digits strictly (no sign, no prefix)
pub(crate) fn parse_hex_u32(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > 8 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(digits).ok()?;
    u32::from_str_radix(s, 16).ok()
}

// ============================================================================
// Codec
// ============================================================================

/// slcan (Serial Line CAN) ASCII protocol codec.
pub struct SlcanCodec;

impl SlcanCodec {
    /// Decode one command line (without its trailing `\r`).
    ///
    /// When the line holds fewer payload pairs than the DLC declares, only the
    /// complete pairs present are taken. Pairs beyond the declared length are ignored.
    pub fn decode_bytes(bytes: &[u8]) -> Result<CanFrame, IoError> {
        if bytes.is_empty() {
            return Err(IoError::protocol("slcan", "empty frame"));
        }

        let (is_extended, kind) = frame_kind_for_char(bytes[0] as char).ok_or_else(|| {
            IoError::protocol(
                "slcan",
                format!("invalid frame prefix: '{}'", bytes[0].escape_ascii()),
            )
        })?;

        let id_len = if is_extended { 8 } else { 3 };
        let min_len = 1 + id_len + 1; // prefix + ID + DLC

        if bytes.len() < min_len {
            return Err(IoError::protocol(
                "slcan",
                format!(
                    "frame too short: {} bytes, need at least {}",
                    bytes.len(),
                    min_len
                ),
            ));
        }

        // Parse frame ID (hex ASCII)
        let id_field = &bytes[1..1 + id_len];
        let frame_id = parse_hex_u32(id_field).ok_or_else(|| {
            IoError::protocol(
                "slcan",
                format!("invalid hex ID: {}", String::from_utf8_lossy(id_field)),
            )
        })?;
        let max_id = if is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if frame_id > max_id {
            return Err(IoError::protocol(
                "slcan",
                format!("ID 0x{:X} out of range (max 0x{:X})", frame_id, max_id),
            ));
        }

        // Parse DLC (single hex digit)
        let dlc_char = bytes[1 + id_len] as char;
        let dlc = dlc_char.to_digit(16).ok_or_else(|| {
            IoError::protocol("slcan", format!("invalid DLC character: '{}'", dlc_char))
        })? as u8;

        // Classic frames carry a byte count, max 8
        if !kind.is_fd() && dlc as usize > MAX_CLASSIC_LEN {
            return Err(IoError::protocol(
                "slcan",
                format!("invalid DLC: {} (max 8)", dlc),
            ));
        }

        let declared = match kind {
            FrameKind::Data => dlc as usize,
            FrameKind::RemoteRequest => 0,
            FrameKind::FdData | FrameKind::FdDataBrs => dlc_code_to_len(dlc),
        };

        // Parse data bytes (pairs of hex characters)
        let payload = &bytes[min_len..];
        let pairs = (payload.len() / 2).min(declared);
        let data = hex::decode(&payload[..pairs * 2]).map_err(|e| {
            IoError::protocol("slcan", format!("invalid hex data: {}", e))
        })?;

        Ok(CanFrame {
            id: frame_id,
            extended: is_extended,
            kind,
            dlc,
            data,
            direction: crate::io::Direction::Rx,
            timestamp: FrameTimestamp::now(),
            delta: 0.0,
        })
    }
}

impl FrameCodec for SlcanCodec {
    /// Raw frame is an ASCII string (without trailing \r)
    type RawFrame = str;
    /// Encoded frame is a Vec<u8> (ASCII bytes with trailing \r)
    type EncodedFrame = Vec<u8>;

    /// Decode an slcan ASCII frame line.
    ///
    /// Examples:
    ///   `t1234AABBCCDD` -> Standard frame, ID=0x123, DLC=4, data=AA BB CC DD
    ///   `T123456788AABBCCDD112233445566` -> Extended frame, ID=0x12345678, DLC=8
    ///   `r1230` -> Standard RTR, ID=0x123, DLC=0
    ///   `b123A00112233445566778899AABBCCDDEEFF` -> FD+BRS, code A = 16 bytes
    fn decode(line: &str) -> Result<CanFrame, IoError> {
        Self::decode_bytes(line.as_bytes())
    }

    /// Encode a frame to slcan ASCII format.
    ///
    /// Returns ASCII bytes including trailing `\r`. Payloads are silently
    /// truncated to 8 (classic) or 64 (FD) bytes. An FD payload whose length
    /// has no exact length code is zero-padded up to the next one.
    fn encode(frame: &CanFrame) -> Result<Vec<u8>, IoError> {
        if !frame.id_in_range() {
            return Err(IoError::protocol(
                "slcan",
                format!(
                    "ID 0x{:X} does not fit in {} bits",
                    frame.id,
                    if frame.extended { 29 } else { 11 }
                ),
            ));
        }

        let mut cmd = String::with_capacity(16 + MAX_FD_LEN * 2);

        // Frame type prefix and ID
        cmd.push(command_char(frame.kind, frame.extended));
        if frame.extended {
            cmd.push_str(&format!("{:08X}", frame.id));
        } else {
            cmd.push_str(&format!("{:03X}", frame.id));
        }

        // DLC and data bytes
        match frame.kind {
            FrameKind::RemoteRequest => {
                cmd.push_str(&format!("{:X}", frame.dlc.min(MAX_CLASSIC_LEN as u8)));
            }
            FrameKind::Data => {
                let len = frame.data.len().min(MAX_CLASSIC_LEN);
                cmd.push_str(&format!("{:X}", len));
                cmd.push_str(&hex::encode_upper(&frame.data[..len]));
            }
            FrameKind::FdData | FrameKind::FdDataBrs => {
                let len = frame.data.len().min(MAX_FD_LEN);
                let code = len_to_dlc_code(len);
                cmd.push_str(&format!("{:X}", code));
                cmd.push_str(&hex::encode_upper(&frame.data[..len]));
                for _ in len..dlc_code_to_len(code) {
                    cmd.push_str("00");
                }
            }
        }

        cmd.push('\r');
        Ok(cmd.into_bytes())
    }
}

// ============================================================================
// Control commands
// ============================================================================

/// Operating mode selected with `M`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlcanMode {
    /// M0 - takes part in the bus (ACKs frames, can transmit)
    #[default]
    Normal,
    /// M1 - listen only
    Silent,
}

/// Adapter control command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlcanCommand {
    /// `O` - open the CAN channel
    Open,
    /// `C` - close the CAN channel
    Close,
    /// `S<n>` - classic (nominal) bitrate index 0-D
    Bitrate(u8),
    /// `Y<n>` - CAN FD data-phase bitrate index
    FdBitrate(u8),
    /// `M<n>` - operating mode
    Mode(SlcanMode),
}

impl SlcanCommand {
    /// Command text including the trailing `\r`
    pub fn encode(&self) -> Result<String, IoError> {
        let body = match *self {
            SlcanCommand::Open => "O".to_string(),
            SlcanCommand::Close => "C".to_string(),
            SlcanCommand::Bitrate(index) => {
                if index > MAX_BITRATE_INDEX {
                    return Err(IoError::configuration(format!(
                        "Invalid bitrate index {} (valid: 0-{})",
                        index, MAX_BITRATE_INDEX
                    )));
                }
                format!("S{:X}", index)
            }
            SlcanCommand::FdBitrate(index) => {
                if index > MAX_FD_BITRATE_INDEX {
                    return Err(IoError::configuration(format!(
                        "Invalid FD bitrate index {} (valid: 0-{})",
                        index, MAX_FD_BITRATE_INDEX
                    )));
                }
                format!("Y{:X}", index)
            }
            SlcanCommand::Mode(SlcanMode::Normal) => "M0".to_string(),
            SlcanCommand::Mode(SlcanMode::Silent) => "M1".to_string(),
        };
        Ok(format!("{}\r", body))
    }
}

/// Find the slcan bitrate command for a given bitrate in bit/s
pub fn find_bitrate_command(bitrate: u32) -> Result<SlcanCommand, IoError> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, index)| SlcanCommand::Bitrate(*index))
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| format!("{}", r)).collect();
            IoError::configuration(format!(
                "Invalid CAN bitrate {}. Valid bitrates: {}",
                bitrate,
                valid.join(", ")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_str(frame: &CanFrame) -> String {
        String::from_utf8(SlcanCodec::encode(frame).unwrap()).unwrap()
    }

    #[test]
    fn test_slcan_decode_standard_frame() {
        let frame = SlcanCodec::decode("t1234AABBCCDD").unwrap();
        assert_eq!(frame.id, 0x123);
        assert_eq!(frame.dlc, 4);
        assert_eq!(frame.data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(frame.kind, FrameKind::Data);
        assert!(!frame.extended);
    }

    #[test]
    fn test_slcan_decode_extended_frame() {
        let frame = SlcanCodec::decode("T123456782AABB").unwrap();
        assert_eq!(frame.id, 0x12345678);
        assert_eq!(frame.dlc, 2);
        assert_eq!(frame.data, vec![0xAA, 0xBB]);
        assert!(frame.extended);
    }

    #[test]
    fn test_slcan_decode_short_payload_takes_available_bytes() {
        let frame = SlcanCodec::decode("t0A28040102030405").unwrap();
        assert_eq!(frame.id, 0x0A2);
        assert!(!frame.extended);
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.dlc, 8);
        assert_eq!(frame.data, vec![0x04, 0x01, 0x02, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_slcan_decode_ignores_extra_pairs() {
        let frame = SlcanCodec::decode("t1232AABBCCDD").unwrap();
        assert_eq!(frame.data, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_slcan_decode_rtr() {
        let frame = SlcanCodec::decode("r1234").unwrap();
        assert_eq!(frame.id, 0x123);
        assert_eq!(frame.dlc, 4);
        assert_eq!(frame.kind, FrameKind::RemoteRequest);
        assert!(frame.data.is_empty());

        let frame = SlcanCodec::decode("R123456780").unwrap();
        assert!(frame.extended);
        assert_eq!(frame.dlc, 0);
    }

    #[test]
    fn test_slcan_decode_fd() {
        let line = format!("b123A{}", "11".repeat(16));
        let frame = SlcanCodec::decode(&line).unwrap();
        assert_eq!(frame.kind, FrameKind::FdDataBrs);
        assert_eq!(frame.dlc, 0xA);
        assert_eq!(frame.data.len(), 16);

        let line = format!("D1FFFFFFFF{}", "AB".repeat(64));
        let frame = SlcanCodec::decode(&line).unwrap();
        assert_eq!(frame.kind, FrameKind::FdData);
        assert_eq!(frame.id, 0x1FFF_FFFF);
        assert_eq!(frame.data, vec![0xAB; 64]);
    }

    #[test]
    fn test_slcan_decode_invalid() {
        assert!(SlcanCodec::decode("x1234AABB").is_err());
        assert!(SlcanCodec::decode("").is_err());
        assert!(SlcanCodec::decode("t12").is_err());
        assert!(SlcanCodec::decode("tG234AABB").is_err());
        assert!(SlcanCodec::decode("t+12").is_err());
        assert!(SlcanCodec::decode("t123F").is_err()); // classic DLC > 8
        assert!(SlcanCodec::decode("t1232ZZ00").is_err());
        assert!(SlcanCodec::decode("t8001").is_err()); // ID above 0x7FF
        assert!(SlcanCodec::decode("T200000000").is_err()); // ID above 29 bits
    }

    #[test]
    fn test_slcan_encode_standard_frame() {
        let frame = CanFrame::data(0x123, false, &[0x01, 0x02, 0x03]);
        assert_eq!(encode_str(&frame), "t1233010203\r");
    }

    #[test]
    fn test_slcan_encode_extended_frame() {
        let frame = CanFrame::data(0x12345678, true, &[0xAA, 0xBB]);
        assert_eq!(encode_str(&frame), "T123456782AABB\r");
    }

    #[test]
    fn test_slcan_encode_pads_id_and_uppercases() {
        let frame = CanFrame::data(0xA, false, &[0xde, 0xad]);
        assert_eq!(encode_str(&frame), "t00A2DEAD\r");
        let frame = CanFrame::remote(0x1, true, 3);
        assert_eq!(encode_str(&frame), "R000000013\r");
    }

    #[test]
    fn test_slcan_encode_truncates_classic_payload() {
        let mut frame = CanFrame::data(0x100, false, &[]);
        frame.data = (0u8..12).collect();
        assert_eq!(encode_str(&frame), "t10080001020304050607\r");
    }

    #[test]
    fn test_slcan_encode_fd_pads_to_length_code() {
        let mut frame = CanFrame::fd(0x321, false, &[], false);
        frame.data = vec![0xFF; 10];
        let line = encode_str(&frame);
        assert!(line.starts_with("d321A"));
        assert_eq!(line.len(), 5 + 32 + 1);
        assert!(line.ends_with(&format!("{}\r", "00".repeat(6))));

        frame.data = vec![0x01; 70];
        let line = encode_str(&frame);
        assert!(line.starts_with("d321F"));
        assert_eq!(line.len(), 5 + 128 + 1);
    }

    #[test]
    fn test_slcan_encode_rejects_oversized_id() {
        let frame = CanFrame::data(0x800, false, &[]);
        assert!(SlcanCodec::encode(&frame).is_err());
        let frame = CanFrame::data(0x800, true, &[]);
        assert!(SlcanCodec::encode(&frame).is_ok());
    }

    #[test]
    fn test_slcan_roundtrip_all_kinds() {
        let fd_lengths = [0usize, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];
        let ids = [(0u32, false), (0x7FF, false), (0x5A5, false), (0, true), (0x1FFF_FFFF, true)];

        for &(id, ext) in ids.iter() {
            for len in 0..=8usize {
                let payload: Vec<u8> = (0..len as u8).collect();
                for original in [CanFrame::data(id, ext, &payload), CanFrame::remote(id, ext, len)] {
                    let enc = SlcanCodec::encode(&original).unwrap();
                    let decoded = SlcanCodec::decode_bytes(&enc[..enc.len() - 1]).unwrap();
                    assert_eq!(decoded.id, original.id);
                    assert_eq!(decoded.extended, original.extended);
                    assert_eq!(decoded.kind, original.kind);
                    assert_eq!(decoded.dlc, original.dlc);
                    assert_eq!(decoded.data, original.data);
                }
            }
            for &len in fd_lengths.iter() {
                let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
                for brs in [false, true] {
                    let original = CanFrame::fd(id, ext, &payload, brs);
                    let enc = SlcanCodec::encode(&original).unwrap();
                    let decoded = SlcanCodec::decode_bytes(&enc[..enc.len() - 1]).unwrap();
                    assert_eq!(decoded.kind, original.kind);
                    assert_eq!(decoded.dlc, original.dlc);
                    assert_eq!(decoded.data, payload);
                }
            }
        }
    }

    #[test]
    fn test_command_letters() {
        assert_eq!(command_char(FrameKind::Data, false), 't');
        assert_eq!(command_char(FrameKind::FdDataBrs, true), 'B');
        assert_eq!(frame_kind_for_char('D'), Some((true, FrameKind::FdData)));
        assert_eq!(frame_kind_for_char('r'), Some((false, FrameKind::RemoteRequest)));
        assert_eq!(frame_kind_for_char('z'), None);
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(SlcanCommand::Open.encode().unwrap(), "O\r");
        assert_eq!(SlcanCommand::Close.encode().unwrap(), "C\r");
        assert_eq!(SlcanCommand::Bitrate(6).encode().unwrap(), "S6\r");
        assert_eq!(SlcanCommand::Bitrate(13).encode().unwrap(), "SD\r");
        assert!(SlcanCommand::Bitrate(14).encode().is_err());
        assert_eq!(SlcanCommand::FdBitrate(5).encode().unwrap(), "Y5\r");
        assert!(SlcanCommand::FdBitrate(16).encode().is_err());
        assert_eq!(SlcanCommand::Mode(SlcanMode::Normal).encode().unwrap(), "M0\r");
        assert_eq!(SlcanCommand::Mode(SlcanMode::Silent).encode().unwrap(), "M1\r");
    }

    #[test]
    fn test_bitrate_mapping() {
        assert_eq!(find_bitrate_command(500_000).unwrap(), SlcanCommand::Bitrate(6));
        assert_eq!(find_bitrate_command(125_000).unwrap(), SlcanCommand::Bitrate(4));
        assert_eq!(find_bitrate_command(1_000_000).unwrap(), SlcanCommand::Bitrate(8));
        assert_eq!(find_bitrate_command(10_000).unwrap(), SlcanCommand::Bitrate(0));
        assert!(find_bitrate_command(123_456).is_err());
    }
}
