// src/lib.rs
//
// slcanlog: drive a serial-line CAN / CAN FD adapter, log its traffic,
// import and export traces, and replay them.

// Logging must come first so `tlog!` is visible in every module below.
#[macro_use]
pub mod logging;

pub mod buffer_store;
pub mod io;
pub mod session;
pub mod settings;
pub mod transmit;

pub use buffer_store::{FrameLog, FramePage, DEFAULT_CAPACITY};
pub use io::{CanFrame, Direction, FrameKind, FrameTimestamp, IoError};
pub use session::{CaptureSession, IngestSummary};
pub use settings::AppSettings;
pub use transmit::{TransmitIntent, TxKind};
