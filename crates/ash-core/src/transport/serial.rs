//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use serialport::{FlowControl, SerialPort};
use tracing::{debug, info, instrument, trace};

use super::traits::{SerialTransport, TransportError};

/// Serial port transport.
///
/// The OS handle sits behind a mutex: every write holds it for the whole
/// frame, so ACKs and DATA frames never interleave on the wire.
pub struct SerialPortTransport {
    port: Mutex<Box<dyn SerialPort>>,
    name: String,
    read_timeout: Duration,
}

impl SerialPortTransport {
    /// Open `path` at `baud_rate`, 8N1.
    #[instrument(level = "info")]
    pub fn open(
        path: &str,
        baud_rate: u32,
        hardware_flow_control: bool,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let flow_control = if hardware_flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(path, baud_rate)
            .flow_control(flow_control)
            .timeout(read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
                _ => TransportError::OpenFailed {
                    port: path.to_string(),
                    message: e.to_string(),
                },
            })?;

        info!(port = %path, baud = baud_rate, "Serial port opened");

        Ok(Self {
            port: Mutex::new(port),
            name: path.to_string(),
            read_timeout,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn SerialPort>>, TransportError> {
        self.port
            .lock()
            .map_err(|_| TransportError::WriteFailed("serial port lock poisoned".into()))
    }
}

impl SerialTransport for SerialPortTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut port = self.lock()?;
        port.write_all(data)?;
        port.flush()?;
        trace!(bytes = ?data, "Serial TX");
        Ok(data.len())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut port = self.lock()?;
        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                buf.truncate(n);
                trace!(bytes = ?buf, "Serial RX");
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransportError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            }),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn is_connected(&self) -> bool {
        // A read error surfaces a vanished adapter; the handle itself does
        // not know.
        true
    }

    fn port_name(&self) -> String {
        self.name.clone()
    }
}

/// Names of the serial ports present on this host.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
    debug!(count = ports.len(), "Enumerated serial ports");
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
