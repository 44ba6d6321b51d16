//! ASH-Core: host side of the Silicon Labs ASH/EZSP serial link in Rust.
//!
//! This crate talks to a Zigbee NCP dongle over a serial port: it frames EZSP
//! commands with the ASH protocol, keeps the link in sync, and drives the
//! Gecko bootloader console when the adapter has to be moved in or out of
//! firmware upgrade mode.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC, byte stuffing, whitening, control bytes, EZSP frames
//! - **Codec**: Pure ASH encoder/decoder with sequence numbers
//! - **Driver**: Codec + acknowledgement timer + serial writes
//! - **Bootloader**: Gecko bootloader console driver
//! - **Dongle**: Orchestrator owning the port, both drivers and the command queue
//! - **Transport**: Serial port abstraction (serialport, mock)
//! - **Timer**: Polled single-shot timers (deadline, mock)
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Blocking host loop
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ash_core::config::DongleConfig;
//! use ash_core::session::DongleSession;
//!
//! let config = DongleConfig {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..Default::default()
//! };
//!
//! let session = DongleSession::new(config);
//! let mut conn = session.connect().expect("open failed");
//! conn.wait_ready(Duration::from_secs(15)).expect("no adapter");
//! let version = conn.query_version(Duration::from_secs(2)).expect("no version");
//! println!("EZSP v{}", version.protocol_version);
//! ```

pub mod bootloader;
pub mod codec;
pub mod config;
pub mod dongle;
pub mod driver;
pub mod events;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod transport;

// Re-exports for convenience
pub use bootloader::{BootloaderConsole, BootloaderStage, ConsoleError, ConsoleEvent};
pub use codec::{CodecEvent, FrameCodec, FrameError, LinkStats, SequenceState};
pub use config::DongleConfig;
pub use dongle::{Dongle, DongleError};
pub use driver::{
    AckTimeoutPolicy, AshTimeouts, DriverEvent, LogOnlyPolicy, RetransmitPolicy, TimeoutAction,
    TransportDriver,
};
pub use events::{
    AdapterMode, ChannelObserver, DongleEvent, DongleObserver, NullObserver, PacketDirection,
    RecordingObserver, TracingObserver,
};
pub use protocol::{EzspFrame, FrameKind, ResetCode, VersionInfo};
pub use session::{Connection, DongleSession};
pub use timer::{DeadlineTimerFactory, MockTimerFactory, Timer, TimerFactory, TimerKind};
pub use transport::{MockTransport, SerialPortTransport, SerialTransport, TransportError};
