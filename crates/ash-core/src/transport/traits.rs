//! Serial transport abstraction.
//!
//! Defines the `SerialTransport` trait for byte-stream communication with
//! the adapter, allowing different implementations (serialport, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract serial transport interface.
///
/// Writes go through `&self`; implementations serialize them internally so
/// a frame is never interleaved with another.
pub trait SerialTransport: Send + Sync {
    /// Write raw bytes to the adapter.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available, up to `max_len` bytes.
    ///
    /// Returns `TransportError::Timeout` when nothing arrived in time.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Write all of `data` or fail.
    fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let written = self.write(data)?;
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Check if the adapter is still attached.
    fn is_connected(&self) -> bool;

    /// Human-readable port identifier.
    fn port_name(&self) -> String;
}
