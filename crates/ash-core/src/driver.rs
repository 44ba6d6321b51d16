//! ASH transport driver.
//!
//! Wraps a [`FrameCodec`] with the acknowledgement timer and the serial
//! write path. The driver never writes ACKs on its own: the owner does it so
//! that all writes go through a single ordered path.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{CodecEvent, FrameCodec, LinkStats};
use crate::protocol::constants::{DATA_ACK_TIMEOUT, RESET_ACK_TIMEOUT};
use crate::protocol::reset_code::ResetCode;
use crate::timer::Timer;
use crate::transport::{SerialTransport, TransportError};

/// Acknowledgement timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AshTimeouts {
    pub data_ack: Duration,
    pub reset_ack: Duration,
}

impl Default for AshTimeouts {
    fn default() -> Self {
        Self {
            data_ack: DATA_ACK_TIMEOUT,
            reset_ack: RESET_ACK_TIMEOUT,
        }
    }
}

/// What to do when a DATA frame is not acknowledged in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Log and wait for the NCP.
    LogOnly,
    /// Resend the unacknowledged command.
    Retransmit,
}

/// Decides the reaction to an acknowledgement timeout on a connected link.
pub trait AckTimeoutPolicy: Send {
    fn on_ack_timeout(&mut self) -> TimeoutAction;

    /// A pending frame was acknowledged.
    fn on_acknowledged(&mut self) {}
}

/// Only logs the timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyPolicy;

impl AckTimeoutPolicy for LogOnlyPolicy {
    fn on_ack_timeout(&mut self) -> TimeoutAction {
        TimeoutAction::LogOnly
    }
}

/// Retransmits up to `max_retries` times per frame.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitPolicy {
    max_retries: u32,
    attempts: u32,
}

impl RetransmitPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: 0,
        }
    }
}

impl AckTimeoutPolicy for RetransmitPolicy {
    fn on_ack_timeout(&mut self) -> TimeoutAction {
        if self.attempts < self.max_retries {
            self.attempts += 1;
            TimeoutAction::Retransmit
        } else {
            TimeoutAction::LogOnly
        }
    }

    fn on_acknowledged(&mut self) {
        self.attempts = 0;
    }
}

/// Events reported to the driver's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Decoded DATA payload; must be acknowledged.
    Payload(Vec<u8>),
    Connected { reset_code: ResetCode },
    AckObserved { ack_number: u8 },
    NakObserved { ack_number: u8 },
    AckMismatch { expected: u8, received: u8 },
    ResetReceived,
    /// No RSTACK before the reset timeout.
    ResetFailed,
    /// No acknowledgement for a DATA frame on a connected link.
    AckTimeout { action: TimeoutAction },
}

/// ASH driver: codec + timer + writes.
pub struct TransportDriver<T: Timer> {
    codec: FrameCodec,
    timer: T,
    timeouts: AshTimeouts,
    policy: Box<dyn AckTimeoutPolicy>,
}

impl<T: Timer> TransportDriver<T> {
    pub fn new(timer: T, timeouts: AshTimeouts) -> Self {
        Self {
            codec: FrameCodec::new(),
            timer,
            timeouts,
            policy: Box::new(LogOnlyPolicy),
        }
    }

    /// Replace the acknowledgement timeout policy.
    pub fn with_policy(mut self, policy: Box<dyn AckTimeoutPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn is_connected(&self) -> bool {
        self.codec.is_connected()
    }

    pub fn stats(&self) -> LinkStats {
        self.codec.stats()
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Send RST and wait for RSTACK.
    pub fn send_reset<S: SerialTransport + ?Sized>(
        &mut self,
        port: &S,
    ) -> Result<(), TransportError> {
        self.timer.stop();
        let frame = self.codec.build_reset();
        port.write_all(&frame)?;
        self.timer.start(self.timeouts.reset_ack);
        info!(port = %port.port_name(), "Sent ASH reset");
        Ok(())
    }

    /// Acknowledge the last DATA frame received.
    pub fn send_ack<S: SerialTransport + ?Sized>(&mut self, port: &S) -> Result<(), TransportError> {
        let frame = self.codec.build_ack();
        port.write_all(&frame)
    }

    /// Send a DATA frame and wait for its acknowledgement.
    pub fn send_data<S: SerialTransport + ?Sized>(
        &mut self,
        port: &S,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.timer.stop();
        let frame = self.codec.build_data(payload);
        port.write_all(&frame)?;
        self.timer.start(self.timeouts.data_ack);
        Ok(())
    }

    /// Stop waiting for any acknowledgement.
    pub fn cancel_timer(&mut self) {
        self.timer.stop();
        self.policy.on_acknowledged();
    }

    /// Step back one frame so the next `send_data` resends it flagged reTx.
    ///
    /// Only call this right before resending the unacknowledged frame.
    pub fn prepare_retransmit(&mut self) {
        self.codec.rewind_outgoing();
    }

    /// Feed serial bytes into the codec.
    pub fn on_bytes_received(&mut self, bytes: &[u8]) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        for event in self.codec.consume_incoming(bytes) {
            match event {
                CodecEvent::CancelTimer => {
                    self.timer.stop();
                    self.policy.on_acknowledged();
                }
                CodecEvent::Payload(payload) => events.push(DriverEvent::Payload(payload)),
                CodecEvent::AckObserved { ack_number } => {
                    events.push(DriverEvent::AckObserved { ack_number })
                }
                CodecEvent::NakObserved { ack_number } => {
                    events.push(DriverEvent::NakObserved { ack_number })
                }
                CodecEvent::Connected { reset_code } => {
                    info!(reset_code = %reset_code, "NCP acknowledged reset");
                    events.push(DriverEvent::Connected { reset_code })
                }
                CodecEvent::AckMismatch { expected, received } => {
                    events.push(DriverEvent::AckMismatch { expected, received })
                }
                CodecEvent::ResetReceived => {
                    debug!("NCP sent RST");
                    events.push(DriverEvent::ResetReceived)
                }
            }
        }
        events
    }

    /// Check the acknowledgement timer.
    pub fn poll_timer(&mut self, now: Instant) -> Option<DriverEvent> {
        if !self.timer.take_expired(now) {
            return None;
        }
        if !self.codec.is_connected() {
            warn!(
                timeout_ms = self.timeouts.reset_ack.as_millis() as u64,
                "No RSTACK from NCP, reset failed"
            );
            return Some(DriverEvent::ResetFailed);
        }
        let action = self.policy.on_ack_timeout();
        warn!(
            timeout_ms = self.timeouts.data_ack.as_millis() as u64,
            action = ?action,
            "DATA frame not acknowledged"
        );
        Some(DriverEvent::AckTimeout { action })
    }
}
