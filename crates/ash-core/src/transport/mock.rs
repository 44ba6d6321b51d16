//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{SerialTransport, TransportError};

/// Mock transport for unit testing driver and orchestrator logic.
///
/// Clones share state, so a test can keep one handle while the dongle owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued chunks to return on read.
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the adapter is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue bytes to be returned on next read.
    pub fn queue_rx(&self, bytes: &[u8]) {
        self.rx_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes concatenated as they would appear on the wire.
    pub fn wire(&self) -> Vec<u8> {
        self.write_log.lock().unwrap().concat()
    }

    /// Most recent write, if any.
    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.write_log.lock().unwrap().last().cloned()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate adapter unplug.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate adapter re-plug.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut queue = self.rx_queue.lock().unwrap();
        let mut chunk = queue
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 0 })?;
        if chunk.len() > max_len {
            let rest = chunk.split_off(max_len);
            queue.push_front(rest);
        }
        Ok(chunk)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn port_name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_rx_queue() {
        let mock = MockTransport::new();
        mock.queue_rx(b"Gecko");
        mock.queue_rx(b"BL >");

        assert_eq!(mock.read(64).unwrap(), b"Gecko");
        assert_eq!(mock.read(64).unwrap(), b"BL >");
        assert!(matches!(
            mock.read(64),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_read_splits_chunks() {
        let mock = MockTransport::new();
        mock.queue_rx(&[1, 2, 3, 4, 5]);
        assert_eq!(mock.read(2).unwrap(), vec![1, 2]);
        assert_eq!(mock.read(8).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        let shared = mock.clone();
        mock.write(b"Hello").unwrap();
        mock.write_all(b"World").unwrap();

        let writes = shared.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(shared.wire(), b"HelloWorld");
        assert_eq!(shared.last_write().unwrap(), b"World");
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test").is_err());

        mock.reconnect();
        assert!(mock.write(b"test").is_ok());
    }
}
