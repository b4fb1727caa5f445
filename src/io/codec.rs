// src/io/codec.rs
//
// Frame codec trait and re-export of the slcan implementation.
//
// The FrameCodec trait covers single-frame operations. Stream framing (splitting
// arbitrarily chunked serial input into lines) lives in SlcanDecoder alongside
// the protocol-specific codec.

use crate::io::error::IoError;
use crate::io::CanFrame;

// ============================================================================
// Frame Codec Trait
// ============================================================================

/// Trait for CAN frame codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice, ASCII string)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode a raw frame into a CanFrame.
    ///
    /// Returns `Err(IoError)` if the frame is malformed or is not a bus frame.
    fn decode(raw: &Self::RawFrame) -> Result<CanFrame, IoError>;

    /// Encode a frame for transmission.
    ///
    /// Returns `Err(IoError)` if the frame cannot be expressed by the protocol.
    fn encode(frame: &CanFrame) -> Result<Self::EncodedFrame, IoError>;
}

// slcan codec
pub use super::slcan::codec::SlcanCodec;

// ============================================================================
// Tests
// ============================================================================
