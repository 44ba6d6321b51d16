//! Gecko bootloader console driver.
//!
//! The bootloader speaks free-form ASCII with no framing: a menu headed by
//! `Gecko Bootloader <version>`, a list of options, and a `BL >` prompt,
//! each block followed by a NUL byte. This driver flushes start-up noise,
//! probes for the menu, tracks where in the menu output we are, and selects
//! menu entries once a prompt has been seen.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::protocol::constants::*;
use crate::timer::Timer;
use crate::transport::{SerialTransport, TransportError};

/// Upper bound on unmatched console text kept while scanning.
const MAX_CONSOLE_BUFFER: usize = 4096;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("No valid bootloader prompt (stage: {stage})")]
    NoValidPrompt { stage: BootloaderStage },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Position in the bootloader console dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootloaderStage {
    /// Discarding output until the line goes quiet.
    #[default]
    Flushing,
    /// Probe sent, waiting for the menu header.
    Probing,
    MenuHeaderSeen,
    MenuContentSeen,
    /// Menu selection possible.
    PromptSeen,
    /// Upload selected, waiting for the X-modem receiver.
    XmodemWaitingReady,
    /// Receiver ready; image transfer belongs to the caller.
    XmodemTransferring,
}

impl fmt::Display for BootloaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootloaderStage::Flushing => write!(f, "FLUSHING"),
            BootloaderStage::Probing => write!(f, "PROBING"),
            BootloaderStage::MenuHeaderSeen => write!(f, "MENU_HEADER_SEEN"),
            BootloaderStage::MenuContentSeen => write!(f, "MENU_CONTENT_SEEN"),
            BootloaderStage::PromptSeen => write!(f, "PROMPT_SEEN"),
            BootloaderStage::XmodemWaitingReady => write!(f, "XMODEM_WAITING_READY"),
            BootloaderStage::XmodemTransferring => write!(f, "XMODEM_TRANSFERRING"),
        }
    }
}

/// Things the console driver has detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// A `BL >` prompt was seen.
    PromptDetected,
    /// The X-modem receiver asked for the image.
    FirmwareTransferReady,
}

/// Bootloader console driver.
pub struct BootloaderConsole<T: Timer> {
    stage: BootloaderStage,
    buffer: Vec<u8>,
    timer: T,
    quiet_period: Duration,
    version: Option<String>,
}

impl<T: Timer> BootloaderConsole<T> {
    pub fn new(timer: T, quiet_period: Duration) -> Self {
        Self {
            stage: BootloaderStage::Flushing,
            buffer: Vec::new(),
            timer,
            quiet_period,
            version: None,
        }
    }

    pub fn stage(&self) -> BootloaderStage {
        self.stage
    }

    /// Version string printed after the menu header, if one was seen.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Start over: flush the line, then probe once it is quiet.
    pub fn reset(&mut self) {
        self.goto_stage(BootloaderStage::Flushing);
        self.buffer.clear();
        self.timer.start(self.quiet_period);
    }

    /// Stop using the port; the quiet timer is disarmed.
    pub fn detach(&mut self) {
        self.timer.stop();
        self.buffer.clear();
        self.stage = BootloaderStage::Flushing;
    }

    /// Check the quiet timer; sends the probe when the flush is over.
    ///
    /// Returns whether a probe was written.
    pub fn poll_timer<S: SerialTransport + ?Sized>(
        &mut self,
        port: &S,
        now: Instant,
    ) -> Result<bool, TransportError> {
        if !self.timer.take_expired(now) || self.stage != BootloaderStage::Flushing {
            return Ok(false);
        }
        self.goto_stage(BootloaderStage::Probing);
        port.write_all(BOOTLOADER_PROBE)?;
        debug!("Probing bootloader console");
        Ok(true)
    }

    /// Feed console bytes.
    pub fn on_bytes_received(&mut self, bytes: &[u8]) -> Vec<ConsoleEvent> {
        let mut events = Vec::new();

        match self.stage {
            BootloaderStage::Flushing => {
                trace!(len = bytes.len(), "Flushing bootloader output");
                self.timer.start(self.quiet_period);
            }
            BootloaderStage::XmodemWaitingReady => {
                if bytes.last() == Some(&XMODEM_READY) {
                    self.goto_stage(BootloaderStage::XmodemTransferring);
                    events.push(ConsoleEvent::FirmwareTransferReady);
                }
            }
            BootloaderStage::XmodemTransferring => {}
            _ => {
                for &byte in bytes {
                    if byte == BOOTLOADER_BLOCK_END {
                        self.scan(&mut events);
                        self.buffer.clear();
                    } else {
                        self.buffer.push(byte);
                    }
                }
                self.scan(&mut events);
                self.trim_buffer();
            }
        }

        events
    }

    /// Choose "run application". The adapter leaves the bootloader.
    pub fn select_mode_run<S: SerialTransport + ?Sized>(
        &mut self,
        port: &S,
    ) -> Result<(), ConsoleError> {
        self.require_prompt()?;
        port.write_all(BOOTLOADER_MENU_RUN)?;
        info!("Bootloader: run application selected");
        self.timer.stop();
        self.buffer.clear();
        self.goto_stage(BootloaderStage::Flushing);
        Ok(())
    }

    /// Choose "upload image" and wait for the X-modem receiver.
    pub fn select_mode_upgrade_fw<S: SerialTransport + ?Sized>(
        &mut self,
        port: &S,
    ) -> Result<(), ConsoleError> {
        self.require_prompt()?;
        port.write_all(BOOTLOADER_MENU_UPLOAD)?;
        info!("Bootloader: firmware upload selected");
        self.buffer.clear();
        self.goto_stage(BootloaderStage::XmodemWaitingReady);
        Ok(())
    }

    fn require_prompt(&self) -> Result<(), ConsoleError> {
        if self.stage != BootloaderStage::PromptSeen {
            return Err(ConsoleError::NoValidPrompt { stage: self.stage });
        }
        Ok(())
    }

    fn goto_stage(&mut self, stage: BootloaderStage) {
        if self.stage != stage {
            debug!(from = %self.stage, to = %stage, "Bootloader stage transition");
        }
        self.stage = stage;
    }

    fn scan(&mut self, events: &mut Vec<ConsoleEvent>) {
        loop {
            match self.stage {
                BootloaderStage::Probing => {
                    let Some(end) = find_after(&self.buffer, BOOTLOADER_HEADER.as_bytes()) else {
                        break;
                    };
                    self.buffer.drain(..end);
                    self.goto_stage(BootloaderStage::MenuHeaderSeen);
                }
                BootloaderStage::MenuHeaderSeen => {
                    let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                        break;
                    };
                    let version = String::from_utf8_lossy(&self.buffer[..newline])
                        .trim()
                        .to_string();
                    self.buffer.drain(..=newline);
                    if !version.is_empty() {
                        info!(version = %version, "Gecko bootloader detected");
                        self.version = Some(version);
                    } else {
                        info!("Gecko bootloader detected");
                    }
                    self.goto_stage(BootloaderStage::MenuContentSeen);
                }
                BootloaderStage::MenuContentSeen | BootloaderStage::PromptSeen => {
                    let Some(end) = find_after(&self.buffer, BOOTLOADER_PROMPT.as_bytes()) else {
                        break;
                    };
                    self.buffer.drain(..end);
                    self.goto_stage(BootloaderStage::PromptSeen);
                    debug!("Bootloader prompt detected");
                    events.push(ConsoleEvent::PromptDetected);
                }
                _ => break,
            }
        }
    }

    fn trim_buffer(&mut self) {
        if self.buffer.len() > MAX_CONSOLE_BUFFER {
            let keep = BOOTLOADER_HEADER.len();
            let cut = self.buffer.len() - keep;
            self.buffer.drain(..cut);
        }
    }
}

/// Index just past the first occurrence of `needle`.
fn find_after(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + needle.len())
}
