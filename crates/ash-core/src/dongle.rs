//! Dongle orchestrator.
//!
//! Owns the serial port, both protocol drivers and the EZSP command queue.
//! Exactly one driver reads the port at a time: the ASH driver while the
//! adapter runs EZSP firmware, the bootloader console while the adapter sits
//! in the Gecko bootloader.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bootloader::{BootloaderConsole, BootloaderStage, ConsoleError, ConsoleEvent};
use crate::codec::LinkStats;
use crate::config::DongleConfig;
use crate::driver::{
    AckTimeoutPolicy, DriverEvent, LogOnlyPolicy, RetransmitPolicy, TimeoutAction,
    TransportDriver,
};
use crate::events::{AdapterMode, DongleEvent, DongleObserver};
use crate::protocol::constants::{
    EZSP_LAUNCH_STANDALONE_BOOTLOADER, STANDALONE_BOOTLOADER_NORMAL_MODE,
};
use crate::protocol::ezsp::EzspFrame;
use crate::timer::{Timer, TimerFactory, TimerKind};
use crate::transport::{SerialTransport, TransportError};

#[derive(Error, Debug)]
pub enum DongleError {
    #[error("Serial port not open")]
    NotOpen,

    #[error("Illegal mode switch from {from} to {to}")]
    IllegalModeSwitch { from: AdapterMode, to: AdapterMode },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// Driver currently reading the serial stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveDriver {
    Ash,
    Bootloader,
}

/// An EZSP command waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedCommand {
    command_id: u8,
    payload: Vec<u8>,
    /// EZSP sequence number, assigned on first transmission.
    sequence: Option<u8>,
}

/// The orchestrator.
pub struct Dongle<S: SerialTransport, T: Timer, O: DongleObserver> {
    serial: Option<S>,
    ash: TransportDriver<T>,
    console: BootloaderConsole<T>,
    observer: Arc<O>,
    mode: AdapterMode,
    active: ActiveDriver,
    queue: VecDeque<QueuedCommand>,
    waiting_response: bool,
    ezsp_sequence: u8,
    reset_attempts: u32,
    force_upgrade_on_init_timeout: bool,
    /// Target mode to apply once the bootloader prompt shows up.
    pending_switch: Option<AdapterMode>,
    /// `launchStandaloneBootloader` submitted; its response hands the port over.
    launch_pending: bool,
}

impl<S: SerialTransport, T: Timer, O: DongleObserver> Dongle<S, T, O> {
    pub fn new<F: TimerFactory<Timer = T>>(timers: &F, observer: Arc<O>) -> Self {
        Self::with_config(timers, observer, &DongleConfig::default())
    }

    pub fn with_config<F: TimerFactory<Timer = T>>(
        timers: &F,
        observer: Arc<O>,
        config: &DongleConfig,
    ) -> Self {
        let policy: Box<dyn AckTimeoutPolicy> = if config.retransmit_on_ack_timeout {
            Box::new(RetransmitPolicy::new(config.max_retransmits))
        } else {
            Box::new(LogOnlyPolicy)
        };

        Self {
            serial: None,
            ash: TransportDriver::new(timers.create_timer(TimerKind::AshAck), config.ash_timeouts())
                .with_policy(policy),
            console: BootloaderConsole::new(
                timers.create_timer(TimerKind::BootloaderQuiet),
                config.bootloader_quiet_period(),
            ),
            observer,
            mode: AdapterMode::Unknown,
            active: ActiveDriver::Ash,
            queue: VecDeque::new(),
            waiting_response: false,
            ezsp_sequence: 0,
            reset_attempts: 0,
            force_upgrade_on_init_timeout: config.force_firmware_upgrade_on_init_timeout,
            pending_switch: None,
            launch_pending: false,
        }
    }

    /// Go to firmware upgrade instead of back to EZSP if the first reset fails.
    pub fn force_firmware_upgrade_on_init_timeout(&mut self) {
        self.force_upgrade_on_init_timeout = true;
    }

    pub fn mode(&self) -> AdapterMode {
        self.mode
    }

    pub fn stage(&self) -> BootloaderStage {
        self.console.stage()
    }

    pub fn stats(&self) -> LinkStats {
        self.ash.stats()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_response
    }

    pub fn is_connected(&self) -> bool {
        self.ash.is_connected()
    }

    pub fn is_bootloader_active(&self) -> bool {
        self.active == ActiveDriver::Bootloader
    }

    pub fn serial(&self) -> Option<&S> {
        self.serial.as_ref()
    }

    /// Take the port and start the ASH reset handshake.
    pub fn open(&mut self, serial: S) -> Result<(), DongleError> {
        info!(port = %serial.port_name(), "Opening dongle");
        self.serial = Some(serial);
        self.active = ActiveDriver::Ash;
        self.send_reset()
    }

    /// Stop all timers and hand the port back.
    pub fn close(&mut self) -> Option<S> {
        self.ash.cancel_timer();
        self.console.detach();
        self.active = ActiveDriver::Ash;
        self.waiting_response = false;
        self.serial.take()
    }

    /// Queue an EZSP command. It goes out once every earlier command got its
    /// response and the ASH link is up.
    pub fn submit(&mut self, command_id: u8, payload: &[u8]) -> Result<(), DongleError> {
        if self.serial.is_none() {
            return Err(DongleError::NotOpen);
        }
        self.queue.push_back(QueuedCommand {
            command_id,
            payload: payload.to_vec(),
            sequence: None,
        });
        debug!(
            command = %format!("0x{:02X}", command_id),
            queued = self.queue.len(),
            "EZSP command queued"
        );
        self.send_next()
    }

    /// Hand serial bytes to the active driver.
    pub fn on_bytes_received(&mut self, bytes: &[u8]) {
        match self.active {
            ActiveDriver::Ash => {
                for event in self.ash.on_bytes_received(bytes) {
                    self.handle_driver_event(event);
                }
            }
            ActiveDriver::Bootloader => {
                for event in self.console.on_bytes_received(bytes) {
                    self.handle_console_event(event);
                }
            }
        }
    }

    /// Check both timers.
    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(event) = self.ash.poll_timer(now) {
            self.handle_driver_event(event);
        }
        if self.active == ActiveDriver::Bootloader {
            if let Some(port) = self.serial.as_ref() {
                if let Err(e) = self.console.poll_timer(port, now) {
                    warn!(error = %e, "Failed to probe bootloader");
                }
            }
        }
    }

    /// Request a bootloader transition.
    ///
    /// Only bootloader → `BootloaderExitToNormal` and unknown/EZSP →
    /// `BootloaderUpgrade` are legal.
    pub fn switch_mode(&mut self, requested: AdapterMode) -> Result<(), DongleError> {
        let legal = match requested {
            AdapterMode::BootloaderExitToNormal => {
                self.mode.is_bootloader() || self.active == ActiveDriver::Bootloader
            }
            AdapterMode::BootloaderUpgrade => {
                matches!(self.mode, AdapterMode::Unknown | AdapterMode::EzspNormal)
            }
            AdapterMode::Unknown | AdapterMode::EzspNormal => false,
        };
        if !legal {
            warn!(from = %self.mode, to = %requested, "Rejected mode switch");
            return Err(DongleError::IllegalModeSwitch {
                from: self.mode,
                to: requested,
            });
        }
        if self.serial.is_none() {
            return Err(DongleError::NotOpen);
        }

        if requested == AdapterMode::BootloaderUpgrade
            && self.active == ActiveDriver::Ash
            && self.ash.is_connected()
        {
            info!("Asking EZSP firmware to launch the bootloader");
            self.launch_pending = true;
            return self.submit(
                EZSP_LAUNCH_STANDALONE_BOOTLOADER,
                &[STANDALONE_BOOTLOADER_NORMAL_MODE],
            );
        }

        self.enter_bootloader(requested);
        Ok(())
    }

    fn send_reset(&mut self) -> Result<(), DongleError> {
        let port = self.serial.as_ref().ok_or(DongleError::NotOpen)?;
        self.reset_attempts += 1;
        self.waiting_response = false;
        self.ash.send_reset(port)?;
        Ok(())
    }

    fn send_next(&mut self) -> Result<(), DongleError> {
        if self.waiting_response || self.active != ActiveDriver::Ash || !self.ash.is_connected() {
            return Ok(());
        }
        let Some(port) = self.serial.as_ref() else {
            return Err(DongleError::NotOpen);
        };
        let Some(front) = self.queue.front_mut() else {
            return Ok(());
        };

        let sequence = match front.sequence {
            Some(sequence) => sequence,
            None => {
                let sequence = self.ezsp_sequence;
                self.ezsp_sequence = sequence.wrapping_add(1);
                front.sequence = Some(sequence);
                sequence
            }
        };
        let frame = EzspFrame::encode_command(sequence, front.command_id, &front.payload);
        debug!(
            command = %format!("0x{:02X}", front.command_id),
            seq = sequence,
            len = front.payload.len(),
            "Sending EZSP command"
        );

        self.ash.send_data(port, &frame)?;
        self.waiting_response = true;
        Ok(())
    }

    fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Payload(payload) => self.handle_payload(&payload),
            DriverEvent::Connected { reset_code } => {
                info!(reset_code = %reset_code, "ASH link up");
                self.set_mode(AdapterMode::EzspNormal);
                self.observer.on_event(&DongleEvent::AdapterReady);
                if self.waiting_response {
                    info!("Resending command interrupted by reset");
                    self.waiting_response = false;
                }
                log_failure("flush queue", self.send_next());
            }
            DriverEvent::NakObserved { ack_number } => {
                info!(ack = ack_number, "NAK received, resending command");
                self.waiting_response = false;
                log_failure("resend after NAK", self.send_next());
            }
            DriverEvent::AckTimeout { action } => {
                if action == TimeoutAction::Retransmit && self.waiting_response {
                    info!("Retransmitting unacknowledged command");
                    self.ash.prepare_retransmit();
                    self.waiting_response = false;
                    log_failure("retransmit", self.send_next());
                }
            }
            DriverEvent::ResetFailed => self.handle_reset_failed(),
            DriverEvent::AckObserved { .. }
            | DriverEvent::AckMismatch { .. }
            | DriverEvent::ResetReceived => {}
        }
    }

    fn handle_payload(&mut self, payload: &[u8]) {
        // The ACK goes out before anything else is written.
        if let Some(port) = self.serial.as_ref() {
            if let Err(e) = self.ash.send_ack(port) {
                warn!(error = %e, "Failed to acknowledge DATA frame");
            }
        }

        let frame = match EzspFrame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed EZSP frame");
                return;
            }
        };

        self.observer.on_event(&DongleEvent::FrameReceived {
            command_id: frame.command_id,
            sequence: frame.sequence,
            payload: frame.parameters,
        });

        let matches_head = self.waiting_response
            && self
                .queue
                .front()
                .is_some_and(|head| head.command_id == frame.command_id);
        if !matches_head {
            info!(
                command = %format!("0x{:02X}", frame.command_id),
                seq = frame.sequence,
                "Unexpected asynchronous message"
            );
            return;
        }

        // A response implies the command arrived, whatever its ack number said.
        self.ash.cancel_timer();
        self.queue.pop_front();
        self.waiting_response = false;

        if frame.command_id == EZSP_LAUNCH_STANDALONE_BOOTLOADER && self.launch_pending {
            self.launch_pending = false;
            self.enter_bootloader(AdapterMode::BootloaderUpgrade);
            return;
        }
        log_failure("send next command", self.send_next());
    }

    fn handle_reset_failed(&mut self) {
        if self.reset_attempts <= 1 {
            let target = if self.force_upgrade_on_init_timeout {
                AdapterMode::BootloaderUpgrade
            } else {
                AdapterMode::BootloaderExitToNormal
            };
            info!(target = %target, "ASH reset failed, probing for bootloader");
            self.enter_bootloader(target);
        } else {
            error!(attempts = self.reset_attempts, "Adapter not responding");
            self.observer.on_event(&DongleEvent::AdapterNotResponding);
        }
    }

    fn handle_console_event(&mut self, event: ConsoleEvent) {
        match event {
            ConsoleEvent::PromptDetected => {
                self.observer.on_event(&DongleEvent::BootloaderPromptSeen {
                    version: self.console.version().map(str::to_string),
                });
                match self.pending_switch.take() {
                    Some(AdapterMode::BootloaderExitToNormal) => self.exit_to_normal(),
                    Some(AdapterMode::BootloaderUpgrade) => self.start_upgrade(),
                    _ => debug!("Bootloader prompt with no pending request"),
                }
            }
            ConsoleEvent::FirmwareTransferReady => {
                self.observer.on_event(&DongleEvent::FirmwareTransferReady);
            }
        }
    }

    fn enter_bootloader(&mut self, target: AdapterMode) {
        self.ash.cancel_timer();
        self.active = ActiveDriver::Bootloader;
        self.waiting_response = false;
        self.pending_switch = Some(target);
        if target == AdapterMode::BootloaderExitToNormal {
            self.set_mode(target);
        }
        self.console.reset();
        debug!(target = %target, "Bootloader console active");
    }

    fn exit_to_normal(&mut self) {
        let result = match self.serial.as_ref() {
            Some(port) => self.console.select_mode_run(port),
            None => return,
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to leave bootloader");
            return;
        }

        self.console.detach();
        self.active = ActiveDriver::Ash;
        self.set_mode(AdapterMode::EzspNormal);
        log_failure("reset after leaving bootloader", self.send_reset());
    }

    fn start_upgrade(&mut self) {
        let result = match self.serial.as_ref() {
            Some(port) => self.console.select_mode_upgrade_fw(port),
            None => return,
        };
        match result {
            Ok(()) => self.set_mode(AdapterMode::BootloaderUpgrade),
            Err(e) => error!(error = %e, "Failed to select firmware upload"),
        }
    }

    fn set_mode(&mut self, to: AdapterMode) {
        let from = self.mode;
        if from == to {
            return;
        }
        self.mode = to;
        self.observer.on_event(&DongleEvent::ModeChanged { from, to });
    }
}

fn log_failure(context: &str, result: Result<(), DongleError>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to {}", context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecEvent, FrameCodec};
    use crate::events::RecordingObserver;
    use crate::protocol::constants::*;
    use crate::protocol::encode_frame;
    use crate::timer::{MockTimer, MockTimerFactory, MockTimerHandle};
    use crate::transport::MockTransport;

    const MENU: &[u8] =
        b"\r\nGecko Bootloader v1.9.1\r\n1. upload gbl\r\n2. run\r\n3. ebl info\r\nBL > \0";

    type TestDongle = Dongle<MockTransport, MockTimer, RecordingObserver>;

    /// Unstuffed frame without its trailing flag.
    fn raw_frame(wire: &[u8]) -> Vec<u8> {
        crate::protocol::stuffing::unstuff(&wire[..wire.len() - 1]).unwrap()
    }

    /// Dongle plus an NCP-side codec playing the adapter.
    struct Harness {
        dongle: TestDongle,
        port: MockTransport,
        ash_timer: MockTimerHandle,
        quiet_timer: MockTimerHandle,
        observer: Arc<RecordingObserver>,
        ncp: FrameCodec,
    }

    impl Harness {
        fn new(config: DongleConfig) -> Self {
            let timers = MockTimerFactory::new();
            let observer = Arc::new(RecordingObserver::new());
            let mut dongle = Dongle::with_config(&timers, observer.clone(), &config);
            let port = MockTransport::new();
            dongle.open(port.clone()).unwrap();
            Self {
                dongle,
                port,
                ash_timer: timers.handle(TimerKind::AshAck).unwrap(),
                quiet_timer: timers.handle(TimerKind::BootloaderQuiet).unwrap(),
                observer,
                ncp: FrameCodec::new(),
            }
        }

        fn connected() -> Self {
            let mut h = Self::new(DongleConfig::default());
            h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x02]));
            h.port.clear_writes();
            h.observer.clear();
            h
        }

        fn feed(&mut self, bytes: &[u8]) {
            self.dongle.on_bytes_received(bytes);
        }

        /// Let the NCP read what the host wrote; returns the EZSP frames.
        fn ncp_receive(&mut self) -> Vec<Vec<u8>> {
            let wire = self.port.wire();
            self.port.clear_writes();
            self.ncp
                .consume_incoming(&wire)
                .into_iter()
                .filter_map(|event| match event {
                    CodecEvent::Payload(payload) => Some(payload),
                    _ => None,
                })
                .collect()
        }

        /// NCP answers with an extended-header EZSP response.
        fn respond(&mut self, sequence: u8, command_id: u8, parameters: &[u8]) {
            let mut ezsp = vec![sequence, 0x80, 0xFF, 0x00, command_id];
            ezsp.extend_from_slice(parameters);
            let frame = self.ncp.build_data(&ezsp);
            self.feed(&frame);
        }

        fn fire_ash_timer(&mut self) {
            assert!(self.ash_timer.fire());
            self.dongle.poll_timers(Instant::now());
        }

        fn fire_quiet_timer(&mut self) {
            assert!(self.quiet_timer.fire());
            self.dongle.poll_timers(Instant::now());
        }
    }

    #[test]
    fn test_open_sends_reset() {
        let h = Harness::new(DongleConfig::default());
        assert_eq!(h.port.get_writes(), vec![vec![0x1A, 0xC0, 0x38, 0xBC, 0x7E]]);
        assert!(h.ash_timer.is_running());
        assert_eq!(h.dongle.mode(), AdapterMode::Unknown);
    }

    #[test]
    fn test_rstack_reports_ready() {
        let mut h = Harness::new(DongleConfig::default());
        h.feed(&[0x1A, 0xC1, 0x02, 0x02, 0x9B, 0x7B, 0x7E]);

        assert_eq!(
            h.observer.events(),
            vec![
                DongleEvent::ModeChanged {
                    from: AdapterMode::Unknown,
                    to: AdapterMode::EzspNormal
                },
                DongleEvent::AdapterReady,
            ]
        );
        assert!(h.dongle.is_connected());
        assert!(!h.ash_timer.is_running());
    }

    #[test]
    fn test_submit_requires_open_port() {
        let timers = MockTimerFactory::new();
        let mut dongle: TestDongle = Dongle::new(&timers, Arc::new(RecordingObserver::new()));
        assert!(matches!(
            dongle.submit(EZSP_VERSION_COMMAND, &[8]),
            Err(DongleError::NotOpen)
        ));
    }

    #[test]
    fn test_commands_wait_for_connection() {
        let mut h = Harness::new(DongleConfig::default());
        h.port.clear_writes();

        h.dongle.submit(EZSP_VERSION_COMMAND, &[8]).unwrap();
        assert!(h.port.get_writes().is_empty());
        assert_eq!(h.dongle.queue_len(), 1);

        h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x0B]));
        assert_eq!(h.ncp_receive(), vec![vec![0x00, 0x00, 0x00, 0x08]]);
        assert!(h.dongle.is_waiting());
    }

    #[test]
    fn test_commands_sent_one_at_a_time() {
        let mut h = Harness::connected();
        h.dongle.submit(0x52, &[0x01]).unwrap();
        h.dongle.submit(0x53, &[0x02]).unwrap();

        assert_eq!(h.ncp_receive(), vec![vec![0x00, 0x00, 0xFF, 0x00, 0x52, 0x01]]);
        assert_eq!(h.dongle.queue_len(), 2);

        h.respond(0x00, 0x52, &[0x00]);
        let writes = h.port.get_writes();
        assert_eq!(writes.len(), 2);
        // ACK for the response first, then the next command.
        assert_eq!(writes[0], encode_frame(&[0x81]));
        assert_eq!(h.ncp_receive(), vec![vec![0x01, 0x00, 0xFF, 0x00, 0x53, 0x02]]);
        assert_eq!(h.dongle.queue_len(), 1);

        assert_eq!(
            h.observer.events(),
            vec![DongleEvent::FrameReceived {
                command_id: 0x52,
                sequence: 0x00,
                payload: vec![0x00],
            }]
        );
    }

    #[test]
    fn test_legacy_version_response() {
        let mut h = Harness::connected();
        h.dongle.submit(EZSP_VERSION_COMMAND, &[8]).unwrap();
        h.ncp_receive();

        let frame = h.ncp.build_data(&[0x00, 0x80, 0x00, 0x08, 0x02, 0x30, 0x74]);
        h.feed(&frame);

        assert_eq!(h.dongle.queue_len(), 0);
        assert!(!h.dongle.is_waiting());
        assert_eq!(
            h.observer.events(),
            vec![DongleEvent::FrameReceived {
                command_id: EZSP_VERSION_COMMAND,
                sequence: 0x00,
                payload: vec![0x08, 0x02, 0x30, 0x74],
            }]
        );
    }

    #[test]
    fn test_async_message_leaves_queue() {
        let mut h = Harness::connected();
        h.dongle.submit(0x52, &[]).unwrap();
        h.ncp_receive();

        h.respond(0x07, 0x19, &[0xAA]);
        assert_eq!(h.dongle.queue_len(), 1);
        assert!(h.dongle.is_waiting());
        // Only the ACK was written.
        assert_eq!(h.port.get_writes(), vec![encode_frame(&[0x81])]);
        assert_eq!(
            h.observer.count(&DongleEvent::FrameReceived {
                command_id: 0x19,
                sequence: 0x07,
                payload: vec![0xAA],
            }),
            1
        );
    }

    #[test]
    fn test_nak_resends_head() {
        let mut h = Harness::connected();
        h.dongle.submit(0x52, &[0x01]).unwrap();
        let original = h.port.last_write().unwrap();
        h.port.clear_writes();

        h.feed(&encode_frame(&[0xA0]));

        assert_eq!(h.port.get_writes(), vec![original]);
        assert_eq!(h.dongle.queue_len(), 1);
        assert!(h.dongle.is_waiting());
        assert_eq!(h.dongle.stats().naks_received, 1);
    }

    #[test]
    fn test_ack_timeout_logs_only_by_default() {
        let mut h = Harness::connected();
        h.dongle.submit(0x52, &[]).unwrap();
        h.port.clear_writes();

        h.fire_ash_timer();
        assert!(h.port.get_writes().is_empty());
        assert!(h.dongle.is_waiting());
        assert!(h.observer.events().is_empty());
    }

    #[test]
    fn test_ack_timeout_retransmits_when_configured() {
        let config = DongleConfig {
            retransmit_on_ack_timeout: true,
            max_retransmits: 1,
            ..Default::default()
        };
        let mut h = Harness::new(config);
        h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x02]));
        h.dongle.submit(0x52, &[0x01]).unwrap();
        let original = raw_frame(&h.port.last_write().unwrap());
        h.port.clear_writes();

        h.fire_ash_timer();
        let writes = h.port.get_writes();
        assert_eq!(writes.len(), 1);
        let resent = raw_frame(&writes[0]);
        // Same frame number and payload, reTx flag set.
        assert_eq!(resent[0], original[0] | CONTROL_RETRANSMIT_BIT);
        assert_eq!(resent[1..resent.len() - 2], original[1..original.len() - 2]);

        h.port.clear_writes();
        h.fire_ash_timer();
        assert!(h.port.get_writes().is_empty());
    }

    #[test]
    fn test_response_with_stale_ack_keeps_frame_numbers() {
        let config = DongleConfig {
            retransmit_on_ack_timeout: true,
            ..Default::default()
        };
        let mut h = Harness::new(config);
        h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x02]));
        h.dongle.submit(0x52, &[]).unwrap();
        h.port.clear_writes();

        // Response acknowledging 0 while the host expects 1.
        let mut raw = vec![0x00, 0x00, 0x80, 0xFF, 0x00, 0x52];
        crate::protocol::whitening::whiten_in_place(&mut raw[1..]);
        h.feed(&encode_frame(&raw));
        assert_eq!(h.dongle.queue_len(), 0);
        assert!(!h.ash_timer.is_running());

        h.dongle.poll_timers(Instant::now());
        h.port.clear_writes();

        h.dongle.submit(0x53, &[]).unwrap();
        let control = raw_frame(&h.port.last_write().unwrap())[0];
        assert_eq!(control >> 4, 1);
        assert_eq!(control & CONTROL_RETRANSMIT_BIT, 0);
    }

    #[test]
    fn test_reset_failure_falls_back_to_bootloader() {
        let mut h = Harness::new(DongleConfig::default());
        h.port.clear_writes();

        h.fire_ash_timer();
        assert!(h.dongle.is_bootloader_active());
        assert_eq!(h.dongle.mode(), AdapterMode::BootloaderExitToNormal);
        assert_eq!(h.dongle.stage(), BootloaderStage::Flushing);

        h.fire_quiet_timer();
        assert_eq!(h.port.get_writes(), vec![b"\n".to_vec()]);
        h.port.clear_writes();

        h.feed(MENU);
        assert_eq!(
            h.port.get_writes(),
            vec![b"2".to_vec(), vec![0x1A, 0xC0, 0x38, 0xBC, 0x7E]]
        );
        assert!(!h.dongle.is_bootloader_active());
        assert_eq!(h.dongle.mode(), AdapterMode::EzspNormal);
        assert_eq!(
            h.observer.count(&DongleEvent::BootloaderPromptSeen {
                version: Some("v1.9.1".into())
            }),
            1
        );

        h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x09]));
        assert_eq!(h.observer.count(&DongleEvent::AdapterReady), 1);
    }

    #[test]
    fn test_second_reset_failure_reports_not_responding() {
        let mut h = Harness::new(DongleConfig::default());
        h.fire_ash_timer();
        h.fire_quiet_timer();
        h.feed(MENU);

        h.fire_ash_timer();
        assert_eq!(h.observer.count(&DongleEvent::AdapterNotResponding), 1);
        assert!(!h.dongle.is_bootloader_active());
    }

    #[test]
    fn test_forced_upgrade_on_init_timeout() {
        let timers = MockTimerFactory::new();
        let observer = Arc::new(RecordingObserver::new());
        let mut dongle: TestDongle = Dongle::new(&timers, observer.clone());
        dongle.force_firmware_upgrade_on_init_timeout();
        let port = MockTransport::new();
        dongle.open(port.clone()).unwrap();

        timers.handle(TimerKind::AshAck).unwrap().fire();
        dongle.poll_timers(Instant::now());
        timers.handle(TimerKind::BootloaderQuiet).unwrap().fire();
        dongle.poll_timers(Instant::now());
        port.clear_writes();

        dongle.on_bytes_received(MENU);
        assert_eq!(port.get_writes(), vec![b"1".to_vec()]);
        assert_eq!(dongle.mode(), AdapterMode::BootloaderUpgrade);
        assert_eq!(dongle.stage(), BootloaderStage::XmodemWaitingReady);

        dongle.on_bytes_received(b"C");
        assert_eq!(observer.count(&DongleEvent::FirmwareTransferReady), 1);
    }

    #[test]
    fn test_upgrade_from_ezsp_launches_bootloader() {
        let mut h = Harness::connected();
        h.dongle.switch_mode(AdapterMode::BootloaderUpgrade).unwrap();
        assert_eq!(
            h.ncp_receive(),
            vec![vec![0x00, 0x00, 0xFF, 0x00, EZSP_LAUNCH_STANDALONE_BOOTLOADER, 0x01]]
        );
        assert!(!h.dongle.is_bootloader_active());

        h.respond(0x00, EZSP_LAUNCH_STANDALONE_BOOTLOADER, &[0x00]);
        assert!(h.dongle.is_bootloader_active());
        assert!(!h.ash_timer.is_running());
        assert!(h.quiet_timer.is_running());

        h.fire_quiet_timer();
        h.port.clear_writes();
        h.feed(MENU);
        assert_eq!(h.port.get_writes(), vec![b"1".to_vec()]);
        assert_eq!(h.dongle.mode(), AdapterMode::BootloaderUpgrade);

        h.feed(b"C");
        assert_eq!(h.observer.count(&DongleEvent::FirmwareTransferReady), 1);
    }

    #[test]
    fn test_upgrade_before_link_goes_straight_to_console() {
        let mut h = Harness::new(DongleConfig::default());
        h.dongle.switch_mode(AdapterMode::BootloaderUpgrade).unwrap();
        assert!(h.dongle.is_bootloader_active());
        assert!(!h.ash_timer.is_running());

        // Bytes now belong to the console, not the ASH codec.
        h.feed(&encode_frame(&[CONTROL_RSTACK, ASH_VERSION, 0x02]));
        assert!(!h.dongle.is_connected());
    }

    #[test]
    fn test_illegal_mode_switches() {
        let mut h = Harness::connected();
        for requested in [
            AdapterMode::BootloaderExitToNormal,
            AdapterMode::EzspNormal,
            AdapterMode::Unknown,
        ] {
            assert!(matches!(
                h.dongle.switch_mode(requested),
                Err(DongleError::IllegalModeSwitch {
                    from: AdapterMode::EzspNormal,
                    ..
                })
            ));
        }
        assert!(h.port.get_writes().is_empty());
    }

    #[test]
    fn test_ack_mismatch_counted_and_delivered() {
        let mut h = Harness::connected();
        h.dongle.submit(0x52, &[]).unwrap();
        h.port.clear_writes();

        // DATA frame 0 acknowledging 3 instead of 1.
        let mut raw = vec![0x03, 0x00, 0x80, 0xFF, 0x00, 0x52];
        crate::protocol::whitening::whiten_in_place(&mut raw[1..]);
        h.feed(&encode_frame(&raw));

        assert_eq!(h.dongle.stats().ack_mismatches, 1);
        assert_eq!(h.dongle.queue_len(), 0);
    }

    #[test]
    fn test_close_returns_port() {
        let mut h = Harness::connected();
        assert!(h.dongle.close().is_some());
        assert!(matches!(
            h.dongle.switch_mode(AdapterMode::BootloaderUpgrade),
            Err(DongleError::NotOpen)
        ));
    }
}
