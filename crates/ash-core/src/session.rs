//! Dongle session: blocking host loop around the reactive [`Dongle`].
//!
//! The core never blocks or spawns threads. This module supplies the loop a
//! command-line tool needs: read the serial port, feed the orchestrator,
//! poll its timers, and wait until a wanted event shows up.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::config::DongleConfig;
use crate::dongle::Dongle;
use crate::events::{AdapterMode, DongleEvent, DongleObserver, PacketDirection, TracingObserver};
use crate::protocol::constants::{EZSP_PROTOCOL_VERSION, EZSP_VERSION_COMMAND};
use crate::protocol::ezsp::VersionInfo;
use crate::timer::{DeadlineTimer, DeadlineTimerFactory, Timer};
use crate::transport::{SerialPortTransport, SerialTransport, TransportError};

/// Largest chunk requested from the port per read.
const READ_CHUNK: usize = 256;

/// Packet events carry at most this many bytes.
const PACKET_PREVIEW: usize = 32;

/// Observer used by sessions: forwards to the user's observer and keeps the
/// events the session loop is waiting on.
pub struct SessionObserver<O: DongleObserver> {
    inner: Arc<O>,
    pending: Mutex<VecDeque<DongleEvent>>,
}

impl<O: DongleObserver> SessionObserver<O> {
    fn new(inner: Arc<O>) -> Self {
        Self {
            inner,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn next_event(&self) -> Option<DongleEvent> {
        self.pending.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl<O: DongleObserver> DongleObserver for SessionObserver<O> {
    fn on_event(&self, event: &DongleEvent) {
        self.inner.on_event(event);
        if matches!(event, DongleEvent::Packet { .. }) {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(event.clone());
        }
    }
}

/// Transport wrapper that emits packet events.
pub struct ObservableTransport<S: SerialTransport, O: DongleObserver> {
    inner: S,
    observer: Arc<O>,
}

impl<S: SerialTransport, O: DongleObserver> ObservableTransport<S, O> {
    pub fn new(inner: S, observer: Arc<O>) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn emit(&self, direction: PacketDirection, data: &[u8]) {
        self.observer.on_event(&DongleEvent::Packet {
            direction,
            length: data.len(),
            data: data.iter().take(PACKET_PREVIEW).cloned().collect(),
        });
    }
}

impl<S: SerialTransport, O: DongleObserver> SerialTransport for ObservableTransport<S, O> {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.write(data);
        if let Ok(written) = &res {
            self.emit(PacketDirection::Tx, &data[..*written]);
        }
        res
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.emit(PacketDirection::Rx, data);
        }
        res
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn port_name(&self) -> String {
        self.inner.port_name()
    }
}

/// Dongle session factory.
pub struct DongleSession<O: DongleObserver> {
    config: DongleConfig,
    observer: Arc<O>,
}

impl DongleSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: DongleConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DongleObserver + 'static> DongleSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: DongleConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &DongleConfig {
        &self.config
    }

    /// Open the configured serial port and start the ASH handshake.
    #[instrument(skip(self), fields(port = %self.config.port))]
    pub fn connect(&self) -> Result<Connection<SerialPortTransport, DeadlineTimer, O>> {
        if self.config.port.is_empty() {
            bail!("No serial port configured");
        }
        let serial = SerialPortTransport::open(
            &self.config.port,
            self.config.baud_rate,
            self.config.hardware_flow_control,
            self.config.poll_interval(),
        )?;
        self.attach(serial)
    }

    /// Start the ASH handshake on an already open transport.
    pub fn attach<S: SerialTransport>(&self, serial: S) -> Result<Connection<S, DeadlineTimer, O>> {
        let events = Arc::new(SessionObserver::new(self.observer.clone()));
        let mut dongle = Dongle::with_config(&DeadlineTimerFactory, events.clone(), &self.config);
        dongle.open(ObservableTransport::new(serial, self.observer.clone()))?;
        info!("Dongle session started");
        Ok(Connection {
            dongle,
            events,
            poll_interval: self.config.poll_interval(),
        })
    }
}

/// A dongle driven by the blocking loop.
pub struct Connection<S: SerialTransport, T: Timer, O: DongleObserver> {
    dongle: Dongle<ObservableTransport<S, O>, T, SessionObserver<O>>,
    events: Arc<SessionObserver<O>>,
    poll_interval: Duration,
}

impl<S: SerialTransport, T: Timer, O: DongleObserver> Connection<S, T, O> {
    pub fn dongle(&mut self) -> &mut Dongle<ObservableTransport<S, O>, T, SessionObserver<O>> {
        &mut self.dongle
    }

    /// One read and one timer poll.
    pub fn pump_once(&mut self) -> Result<()> {
        let read = match self.dongle.serial() {
            Some(port) => port.read(READ_CHUNK),
            None => bail!("Serial port closed"),
        };
        match read {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    self.dongle.on_bytes_received(&bytes);
                }
            }
            Err(TransportError::Timeout { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.dongle.poll_timers(Instant::now());
        Ok(())
    }

    /// Run the loop until `pick` accepts an event.
    ///
    /// `AdapterNotResponding` ends the wait with an error unless `pick`
    /// takes it.
    pub fn wait_for<R>(
        &mut self,
        timeout: Duration,
        mut pick: impl FnMut(&DongleEvent) -> Option<R>,
    ) -> Result<R> {
        let start = Instant::now();
        loop {
            while let Some(event) = self.events.next_event() {
                if let Some(result) = pick(&event) {
                    return Ok(result);
                }
                if event == DongleEvent::AdapterNotResponding {
                    bail!("Adapter not responding");
                }
            }
            if start.elapsed() > timeout {
                return Err(anyhow!(
                    "Timeout after {}ms (mode {}, stage {})",
                    timeout.as_millis(),
                    self.dongle.mode(),
                    self.dongle.stage()
                ));
            }
            self.pump_once()?;
        }
    }

    /// Wait for the ASH link.
    ///
    /// Returns the bootloader version when the adapter had to be pulled out
    /// of the bootloader first.
    #[instrument(skip(self))]
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<Option<String>> {
        let mut bootloader = None;
        self.wait_for(timeout, |event| match event {
            DongleEvent::BootloaderPromptSeen { version } => {
                bootloader = Some(version.clone().unwrap_or_default());
                None
            }
            DongleEvent::AdapterReady => Some(()),
            _ => None,
        })?;
        Ok(bootloader)
    }

    /// Send `version` and parse the response.
    #[instrument(skip(self))]
    pub fn query_version(&mut self, timeout: Duration) -> Result<VersionInfo> {
        self.dongle
            .submit(EZSP_VERSION_COMMAND, &[EZSP_PROTOCOL_VERSION])?;
        let parameters = self.wait_for(timeout, |event| match event {
            DongleEvent::FrameReceived {
                command_id,
                payload,
                ..
            } if *command_id == EZSP_VERSION_COMMAND => Some(payload.clone()),
            _ => None,
        })?;
        let version = VersionInfo::from_parameters(&parameters)?;
        debug!(?version, "EZSP version response");
        if version.protocol_version != EZSP_PROTOCOL_VERSION {
            warn!(
                requested = EZSP_PROTOCOL_VERSION,
                reported = version.protocol_version,
                "NCP speaks a different EZSP protocol version"
            );
        }
        Ok(version)
    }

    /// Put the adapter into the bootloader and wait for the X-modem receiver.
    #[instrument(skip(self))]
    pub fn enter_firmware_upgrade(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.dongle.switch_mode(AdapterMode::BootloaderUpgrade)?;
        let mut bootloader = None;
        self.wait_for(timeout, |event| match event {
            DongleEvent::BootloaderPromptSeen { version } => {
                bootloader = version.clone();
                None
            }
            DongleEvent::FirmwareTransferReady => Some(()),
            _ => None,
        })?;
        Ok(bootloader)
    }

    /// Release the port.
    pub fn close(mut self) -> Option<S> {
        self.dongle.close().map(|port| port.inner)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
