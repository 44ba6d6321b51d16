//! Deadline timers driven by the host loop's clock.

use std::time::{Duration, Instant};

use super::{Timer, TimerFactory, TimerKind};

/// Timer backed by an [`Instant`] deadline.
#[derive(Debug)]
pub struct DeadlineTimer {
    kind: TimerKind,
    deadline: Option<Instant>,
}

impl DeadlineTimer {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            deadline: None,
        }
    }

    /// Time left before expiry, if armed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

impl Timer for DeadlineTimer {
    fn start(&mut self, duration: Duration) {
        tracing::trace!(timer = %self.kind, ms = duration.as_millis() as u64, "Timer armed");
        self.deadline = Some(Instant::now() + duration);
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                tracing::trace!(timer = %self.kind, "Timer expired");
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Factory producing [`DeadlineTimer`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadlineTimerFactory;

impl TimerFactory for DeadlineTimerFactory {
    type Timer = DeadlineTimer;

    fn create_timer(&self, kind: TimerKind) -> DeadlineTimer {
        DeadlineTimer::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expires_once() {
        let mut timer = DeadlineTimer::new(TimerKind::AshAck);
        timer.start(Duration::from_millis(10));
        assert!(timer.is_running());

        let now = Instant::now();
        assert!(!timer.take_expired(now));

        let later = now + Duration::from_millis(50);
        assert!(timer.take_expired(later));
        assert!(!timer.is_running());
        assert!(!timer.take_expired(later));
    }

    #[test]
    fn test_stop_disarms() {
        let mut timer = DeadlineTimer::new(TimerKind::BootloaderQuiet);
        timer.start(Duration::from_millis(1));
        timer.stop();
        assert!(!timer.take_expired(Instant::now() + Duration::from_secs(1)));
        assert_eq!(timer.remaining(Instant::now()), None);
    }

    #[test]
    fn test_restart_moves_deadline() {
        let mut timer = DeadlineTimer::new(TimerKind::BootloaderQuiet);
        timer.start(Duration::from_millis(1));
        timer.start(Duration::from_secs(60));
        assert!(!timer.take_expired(Instant::now() + Duration::from_millis(100)));
    }
}
