//! Event system for decoupling the dongle from its users.
//!
//! Allows CLI and higher protocol layers to subscribe to adapter events
//! without tight coupling to the transport logic.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

/// Which protocol currently owns the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterMode {
    /// Nothing heard from the adapter yet.
    #[default]
    Unknown,
    /// ASH link established, EZSP commands accepted.
    EzspNormal,
    /// Bootloader selected for a firmware upload.
    BootloaderUpgrade,
    /// Bootloader being driven back to the application.
    BootloaderExitToNormal,
}

impl AdapterMode {
    pub fn is_bootloader(&self) -> bool {
        matches!(
            self,
            AdapterMode::BootloaderUpgrade | AdapterMode::BootloaderExitToNormal
        )
    }
}

impl fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterMode::Unknown => write!(f, "Unknown"),
            AdapterMode::EzspNormal => write!(f, "EZSP"),
            AdapterMode::BootloaderUpgrade => write!(f, "Bootloader (upgrade)"),
            AdapterMode::BootloaderExitToNormal => write!(f, "Bootloader (exit to EZSP)"),
        }
    }
}

/// Serial packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Adapter
    Rx, // Adapter -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DongleEvent {
    /// ASH handshake completed; EZSP commands can flow.
    AdapterReady,
    /// The adapter answered neither ASH nor the bootloader probe.
    AdapterNotResponding,
    /// EZSP frame received (response or asynchronous callback).
    FrameReceived {
        command_id: u8,
        sequence: u8,
        payload: Vec<u8>,
    },
    /// The bootloader menu prompt was seen.
    BootloaderPromptSeen { version: Option<String> },
    /// The bootloader waits for an X-modem image.
    FirmwareTransferReady,
    /// Adapter mode changed.
    ModeChanged { from: AdapterMode, to: AdapterMode },
    /// Serial bytes sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
}

/// Observer trait for receiving dongle events.
///
/// Implement this trait in your application layer to receive updates.
pub trait DongleObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DongleEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DongleObserver for NullObserver {
    fn on_event(&self, _event: &DongleEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DongleObserver for TracingObserver {
    fn on_event(&self, event: &DongleEvent) {
        match event {
            DongleEvent::AdapterReady => {
                tracing::info!("Adapter ready");
            }
            DongleEvent::AdapterNotResponding => {
                tracing::error!("Adapter not responding");
            }
            DongleEvent::FrameReceived {
                command_id,
                sequence,
                payload,
            } => {
                tracing::debug!(
                    command = %format!("0x{:02X}", command_id),
                    seq = sequence,
                    len = payload.len(),
                    "EZSP frame received"
                );
            }
            DongleEvent::BootloaderPromptSeen { version } => {
                tracing::info!(version = ?version, "Bootloader prompt seen");
            }
            DongleEvent::FirmwareTransferReady => {
                tracing::info!("Bootloader ready for firmware transfer");
            }
            DongleEvent::ModeChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Mode changed");
            }
            DongleEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "Serial packet");
            }
        }
    }
}

/// Observer forwarding events into a channel.
pub struct ChannelObserver {
    sender: Mutex<Sender<DongleEvent>>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<DongleEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl DongleObserver for ChannelObserver {
    fn on_event(&self, event: &DongleEvent) {
        if let Ok(sender) = self.sender.lock() {
            // Receiver gone means nobody is listening any more.
            let _ = sender.send(event.clone());
        }
    }
}

/// Observer recording every event, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DongleEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, packets excluded.
    pub fn events(&self) -> Vec<DongleEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| !matches!(e, DongleEvent::Packet { .. }))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recorded packet events only.
    pub fn packets(&self) -> Vec<DongleEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| matches!(e, DongleEvent::Packet { .. }))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, wanted: &DongleEvent) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl DongleObserver for RecordingObserver {
    fn on_event(&self, event: &DongleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_observer_forwards() {
        let (tx, rx) = mpsc::channel();
        let observer = ChannelObserver::new(tx);
        observer.on_event(&DongleEvent::AdapterReady);
        assert_eq!(rx.recv().unwrap(), DongleEvent::AdapterReady);
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelObserver::new(tx).on_event(&DongleEvent::AdapterReady);
    }

    #[test]
    fn test_recording_observer_skips_packets() {
        let observer = RecordingObserver::new();
        observer.on_event(&DongleEvent::Packet {
            direction: PacketDirection::Tx,
            length: 1,
            data: vec![0x7E],
        });
        observer.on_event(&DongleEvent::AdapterReady);
        assert_eq!(observer.events(), vec![DongleEvent::AdapterReady]);
        assert_eq!(observer.packets().len(), 1);
        assert_eq!(observer.count(&DongleEvent::AdapterReady), 1);
    }

    #[test]
    fn test_mode_helpers() {
        assert!(AdapterMode::BootloaderUpgrade.is_bootloader());
        assert!(!AdapterMode::Unknown.is_bootloader());
        assert_eq!(AdapterMode::EzspNormal.to_string(), "EZSP");
    }
}
