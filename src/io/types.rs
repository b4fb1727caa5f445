// src/io/types.rs
//
// Messages between the serial read loop and its consumer, and the transmit
// path shared by single-frame sends and trace replay.

use async_trait::async_trait;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use super::IoError;

/// How long a caller waits for the read loop to perform a write
const TRANSMIT_RESULT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Source Messages
// ============================================================================

/// Message from the serial read loop to its consumer
#[derive(Debug)]
pub enum SourceMessage {
    /// Port opened and adapter initialised (port name)
    Connected(String),
    /// Transmit channel is ready
    TransmitReady(TransmitSender),
    /// Raw bytes in arrival order; may split or merge protocol lines
    Chunk(Vec<u8>),
    /// Source error (message)
    Error(String),
    /// Source ended (reason: "stopped", "disconnected", ...)
    Ended(String),
}

// ============================================================================
// Transmit Types
// ============================================================================

/// Transmit request sent through the channel
#[derive(Debug)]
pub struct TransmitRequest {
    /// Encoded command bytes ready to send (including terminator)
    pub data: Vec<u8>,
    /// Sync oneshot channel to send the result back
    pub result_tx: std_mpsc::SyncSender<Result<(), String>>,
}

/// Sender type for transmit requests (sync-safe)
pub type TransmitSender = std_mpsc::SyncSender<TransmitRequest>;

/// Anything that can put a complete command string on the wire.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Write `data` (a complete, terminated command) and wait for the result
    async fn write_command(&self, data: Vec<u8>) -> Result<(), IoError>;
}

/// Transmit handle backed by the serial read loop's request channel
#[derive(Clone, Debug)]
pub struct TransmitHandle {
    device: String,
    sender: TransmitSender,
}

impl TransmitHandle {
    pub fn new(device: impl Into<String>, sender: TransmitSender) -> Self {
        Self {
            device: device.into(),
            sender,
        }
    }
}

#[async_trait]
impl FrameWriter for TransmitHandle {
    async fn write_command(&self, data: Vec<u8>) -> Result<(), IoError> {
        let device = self.device.clone();
        let sender = self.sender.clone();

        tokio::task::spawn_blocking(move || {
            let (result_tx, result_rx) = std_mpsc::sync_channel(1);
            sender
                .send(TransmitRequest { data, result_tx })
                .map_err(|_| IoError::connection(&device, "transmit channel closed"))?;
            match result_rx.recv_timeout(TRANSMIT_RESULT_TIMEOUT) {
                Ok(result) => result.map_err(|e| IoError::connection(&device, e)),
                Err(std_mpsc::RecvTimeoutError::Timeout) => Err(IoError::timeout(&device)),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    Err(IoError::connection(&device, "transmit result dropped"))
                }
            }
        })
        .await
        .map_err(|e| IoError::connection(&self.device, format!("transmit task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transmit_handle_round_trip() {
        let (tx, rx) = std_mpsc::sync_channel::<TransmitRequest>(4);
        let handle = TransmitHandle::new("test", tx);

        let worker = std::thread::spawn(move || {
            let req = rx.recv().unwrap();
            let data = req.data.clone();
            req.result_tx.send(Ok(())).unwrap();
            let req = rx.recv().unwrap();
            req.result_tx.send(Err("Write error: broken pipe".into())).unwrap();
            data
        });

        handle.write_command(b"O\r".to_vec()).await.unwrap();
        let err = handle.write_command(b"C\r".to_vec()).await.unwrap_err();
        assert!(err.to_string().contains("broken pipe"));
        assert_eq!(worker.join().unwrap(), b"O\r".to_vec());
    }

    #[tokio::test]
    async fn test_transmit_handle_closed_channel() {
        let (tx, rx) = std_mpsc::sync_channel::<TransmitRequest>(1);
        drop(rx);
        let handle = TransmitHandle::new("test", tx);
        let err = handle.write_command(b"O\r".to_vec()).await.unwrap_err();
        assert!(matches!(err, IoError::Connection { .. }));
    }
}
