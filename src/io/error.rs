// src/io/error.rs
//
// Error type for transport, protocol and configuration failures.

/// IO-layer error.
///
/// `device` is a short label such as `slcan(/dev/ttyACM0)` or `slcan`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IoError {
    /// Could not open or keep the connection to a device
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    /// Malformed data, or a frame the protocol cannot express
    #[error("{device}: protocol error: {message}")]
    Protocol { device: String, message: String },

    /// Read from the device failed
    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    /// No answer within the allowed time
    #[error("{device}: timed out")]
    Timeout { device: String },

    /// Invalid user or settings value
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IoError {
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn read(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn timeout(device: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
