//! Manually fired timers for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{Timer, TimerFactory, TimerKind};

#[derive(Debug, Default)]
struct MockTimerState {
    running: bool,
    fire_requested: bool,
    last_duration: Option<Duration>,
    start_count: usize,
}

/// Timer that only expires when its [`MockTimerHandle`] fires it.
#[derive(Debug)]
pub struct MockTimer {
    state: Arc<Mutex<MockTimerState>>,
}

impl Timer for MockTimer {
    fn start(&mut self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.running = true;
        state.fire_requested = false;
        state.last_duration = Some(duration);
        state.start_count += 1;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.fire_requested = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    fn take_expired(&mut self, _now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.running && state.fire_requested {
            state.running = false;
            state.fire_requested = false;
            true
        } else {
            false
        }
    }
}

/// Test-side view of a [`MockTimer`].
#[derive(Debug, Clone)]
pub struct MockTimerHandle {
    state: Arc<Mutex<MockTimerState>>,
}

impl MockTimerHandle {
    /// Make the timer expire on the next poll. Returns `false` if it is not armed.
    pub fn fire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.running {
            state.fire_requested = true;
        }
        state.running
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Duration passed to the most recent `start`.
    pub fn last_duration(&self) -> Option<Duration> {
        self.state.lock().unwrap().last_duration
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap().start_count
    }
}

/// Factory that keeps a handle to every timer it creates.
#[derive(Debug, Default)]
pub struct MockTimerFactory {
    handles: Mutex<HashMap<TimerKind, MockTimerHandle>>,
}

impl MockTimerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the most recently created timer of `kind`.
    pub fn handle(&self, kind: TimerKind) -> Option<MockTimerHandle> {
        self.handles.lock().unwrap().get(&kind).cloned()
    }
}

impl TimerFactory for MockTimerFactory {
    type Timer = MockTimer;

    fn create_timer(&self, kind: TimerKind) -> MockTimer {
        let state = Arc::new(Mutex::new(MockTimerState::default()));
        self.handles.lock().unwrap().insert(
            kind,
            MockTimerHandle {
                state: Arc::clone(&state),
            },
        );
        MockTimer { state }
    }
}
