// src/io/slcan/reader.rs
//
// slcan serial device for CANable, CANable Pro and other USB-CAN adapters
// using the Lawicel/slcan ASCII protocol.
//
// The read loop only moves bytes: raw chunks go to the consumer, which owns
// the SlcanDecoder. Writes are serialised through a transmit request channel
// so that a single thread owns the port.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc, Arc, Mutex,
};
use std::time::Duration;

use tokio::sync::mpsc;

use super::codec::{find_bitrate_command, SlcanCommand, SlcanMode};
use crate::io::error::IoError;
use crate::io::serial::LineSettings;
use crate::io::types::{SourceMessage, TransmitRequest};

/// Pause after opening the port so USB CDC devices are ready
const PORT_SETTLE_MS: u64 = 200;
/// Pause between setup commands
const COMMAND_SETTLE_MS: u64 = 50;
/// Serial read timeout; bounds how quickly stop and transmit requests are seen
const READ_TIMEOUT_MS: u64 = 50;
/// Pending transmit requests before senders block
const TRANSMIT_QUEUE_DEPTH: usize = 32;

// ============================================================================
// Types and Configuration
// ============================================================================

/// slcan reader configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlcanConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Serial baud rate (typically 115200 for CANable)
    pub baud_rate: u32,
    /// CAN bus bitrate in bits/second (e.g., 500000 for 500 Kbit/s)
    pub bitrate: u32,
    /// CAN FD data-phase bitrate index (`Y<n>`); None leaves the adapter default
    #[serde(default)]
    pub fd_bitrate_index: Option<u8>,
    /// Silent mode (M1) - does not ACK frames or participate in bus arbitration
    pub silent_mode: bool,
    #[serde(default)]
    pub line: LineSettings,
}

impl SlcanConfig {
    pub fn device_label(&self) -> String {
        format!("slcan({})", self.port)
    }

    pub fn mode(&self) -> SlcanMode {
        if self.silent_mode {
            SlcanMode::Silent
        } else {
            SlcanMode::Normal
        }
    }
}

impl Default for SlcanConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            bitrate: 500_000,
            fd_bitrate_index: None,
            silent_mode: false,
            line: LineSettings::default(),
        }
    }
}

// ============================================================================
// Command Sequences
// ============================================================================

/// Commands that bring a freshly opened adapter onto the bus:
/// close, bitrate, optional FD bitrate, mode, open.
pub fn init_sequence(config: &SlcanConfig) -> Result<Vec<SlcanCommand>, IoError> {
    let mut commands = vec![SlcanCommand::Close, find_bitrate_command(config.bitrate)?];
    if let Some(index) = config.fd_bitrate_index {
        commands.push(SlcanCommand::FdBitrate(index));
    }
    commands.push(SlcanCommand::Mode(config.mode()));
    commands.push(SlcanCommand::Open);
    Ok(commands)
}

/// Encode a command sequence into the bytes to write, one entry per command
pub fn encode_sequence(commands: &[SlcanCommand]) -> Result<Vec<Vec<u8>>, IoError> {
    commands
        .iter()
        .map(|c| c.encode().map(String::into_bytes))
        .collect()
}

// ============================================================================
// Port Handling
// ============================================================================

fn open_port(config: &SlcanConfig) -> Result<Box<dyn serialport::SerialPort>, IoError> {
    let builder = serialport::new(&config.port, config.baud_rate)
        .timeout(Duration::from_millis(READ_TIMEOUT_MS));
    config
        .line
        .apply(builder)
        .open()
        .map_err(|e| IoError::connection(config.device_label(), e.to_string()))
}

fn write_sequence(
    port: &mut Box<dyn serialport::SerialPort>,
    device: &str,
    commands: &[SlcanCommand],
) -> Result<(), IoError> {
    for (command, bytes) in commands.iter().zip(encode_sequence(commands)?) {
        port.write_all(&bytes)
            .map_err(|e| IoError::protocol(device, format!("{:?}: {}", command, e)))?;
        let _ = port.flush();
        std::thread::sleep(Duration::from_millis(COMMAND_SETTLE_MS));
    }
    Ok(())
}

// ============================================================================
// Streaming
// ============================================================================

/// Open the port, initialise the adapter and stream raw chunks to `tx` until
/// `stop_flag` is set or the port fails.
pub async fn run_source(config: SlcanConfig, stop_flag: Arc<AtomicBool>, tx: mpsc::Sender<SourceMessage>) {
    let device = config.device_label();

    let mut serial_port = match open_port(&config) {
        Ok(p) => p,
        Err(e) => {
            let _ = tx.send(SourceMessage::Error(e.to_string())).await;
            return;
        }
    };

    // Initialize slcan
    let init_result = init_sequence(&config).and_then(|commands| {
        std::thread::sleep(Duration::from_millis(PORT_SETTLE_MS));
        let _ = serial_port.clear(serialport::ClearBuffer::All);
        write_sequence(&mut serial_port, &device, &commands)
    });

    if let Err(e) = init_result {
        let _ = tx.send(SourceMessage::Error(e.to_string())).await;
        return;
    }

    // Wrap in Arc<Mutex> for shared access between read and transmit
    let serial_port = Arc::new(Mutex::new(serial_port));

    // Create transmit channel (only if not in silent mode)
    let (transmit_tx, transmit_rx) = std_mpsc::sync_channel::<TransmitRequest>(TRANSMIT_QUEUE_DEPTH);
    let _ = tx.send(SourceMessage::Connected(config.port.clone())).await;
    if !config.silent_mode {
        let _ = tx.send(SourceMessage::TransmitReady(transmit_tx)).await;
    }

    tlog!(
        "[slcan] Connected to {} (bitrate: {}, silent: {})",
        config.port, config.bitrate, config.silent_mode
    );

    let silent_mode = config.silent_mode;
    let blocking_handle = tokio::task::spawn_blocking(move || {
        let mut read_buf = [0u8; 256];

        while !stop_flag.load(Ordering::SeqCst) {
            // Check for transmit requests (non-blocking)
            if !silent_mode {
                while let Ok(req) = transmit_rx.try_recv() {
                    let result = match serial_port.lock() {
                        Ok(mut port) => port
                            .write_all(&req.data)
                            .and_then(|_| port.flush())
                            .map_err(|e| format!("Write error: {}", e)),
                        Err(_) => Err("serial port lock poisoned".to_string()),
                    };
                    let _ = req.result_tx.send(result);
                }
            }

            // Read data
            let read_result = match serial_port.lock() {
                Ok(mut port) => port.read(&mut read_buf),
                Err(_) => break,
            };

            match read_result {
                Ok(n) if n > 0 => {
                    if tx.blocking_send(SourceMessage::Chunk(read_buf[..n].to_vec())).is_err() {
                        // Consumer gone
                        break;
                    }
                }
                Ok(_) => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Timeout - continue
                }
                Err(e) => {
                    let _ = tx.blocking_send(SourceMessage::Error(
                        IoError::read(&device, e.to_string()).to_string(),
                    ));
                    let _ = tx.blocking_send(SourceMessage::Ended("disconnected".to_string()));
                    return;
                }
            }
        }

        // Close channel
        if let Ok(mut port) = serial_port.lock() {
            if let Ok(close) = SlcanCommand::Close.encode() {
                let _ = port.write_all(close.as_bytes());
                let _ = port.flush();
            }
        }

        let _ = tx.blocking_send(SourceMessage::Ended("stopped".to_string()));
    });

    let _ = blocking_handle.await;
}

// ============================================================================
// Tests
// ============================================================================
