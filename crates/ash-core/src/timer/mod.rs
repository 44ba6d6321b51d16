//! Timer abstraction.
//!
//! Timers are single-shot and polled: the owner arms them with
//! [`Timer::start`] and the host loop asks [`Timer::take_expired`] whether
//! the deadline has passed. This keeps the core free of threads and lets
//! tests fire timers by hand.

pub mod deadline;
pub mod mock;

use std::fmt;
use std::time::{Duration, Instant};

pub use deadline::{DeadlineTimer, DeadlineTimerFactory};
pub use mock::{MockTimer, MockTimerFactory, MockTimerHandle};

/// Which component a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// RSTACK / DATA acknowledgement timer of the ASH driver.
    AshAck,
    /// Quiet-period timer of the bootloader console.
    BootloaderQuiet,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::AshAck => write!(f, "ash-ack"),
            TimerKind::BootloaderQuiet => write!(f, "bootloader-quiet"),
        }
    }
}

/// Single-shot timer.
pub trait Timer: Send {
    /// Arm (or re-arm) the timer.
    fn start(&mut self, duration: Duration);

    /// Disarm the timer. No-op when not running.
    fn stop(&mut self);

    /// Whether the timer is armed.
    fn is_running(&self) -> bool;

    /// Returns `true` exactly once after the armed duration has elapsed,
    /// disarming the timer.
    fn take_expired(&mut self, now: Instant) -> bool;
}

/// Creates the timers a dongle needs.
pub trait TimerFactory {
    type Timer: Timer;

    fn create_timer(&self, kind: TimerKind) -> Self::Timer;
}
