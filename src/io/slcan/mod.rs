// src/io/slcan/mod.rs
//
// slcan (Serial Line CAN) protocol driver for CANable, CANable Pro, and other
// USB-CAN adapters using the Lawicel/slcan ASCII protocol.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf

pub mod codec;
pub mod decoder;
pub mod reader;

// Note: SlcanCodec is also available via io::codec::SlcanCodec
pub use codec::{command_char, find_bitrate_command, frame_kind_for_char, SlcanCommand, SlcanMode};
pub use decoder::{SlcanDecoder, SlcanEvent};
pub use reader::{run_source, SlcanConfig};
