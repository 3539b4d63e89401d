//! Open-direction debounce state machine.
//!
//! Reed switches bounce while the door swings open but seat cleanly when it
//! closes, so only the OPEN direction is debounced. A CLOSED reading is always
//! authoritative and supersedes any pending confirmation.
//!
//! The machine is pure: it decides what to do with a reading and leaves the
//! actual timer to the caller (see [`SensorMonitor`](super::SensorMonitor)).

use super::door_state::{DoorState, RawLevel};
use std::time::Duration;

/// Whether a delayed-open confirmation is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    AwaitingConfirmation,
}

/// What the caller should do after feeding an edge reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    /// Emit this state immediately and drop any pending timer.
    Emit(DoorState),
    /// Replace any pending timer with a new one of this duration.
    StartTimer(Duration),
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    open_level: RawLevel,
    open_delay: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(open_level: RawLevel, open_delay: Duration) -> Self {
        Self {
            open_level,
            open_delay,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Feed a validated edge reading.
    pub fn on_edge(&mut self, level: RawLevel) -> EdgeAction {
        match DoorState::from_level(level, self.open_level) {
            DoorState::Closed => {
                self.state = DebounceState::Idle;
                EdgeAction::Emit(DoorState::Closed)
            }
            DoorState::Open if self.open_delay.is_zero() => {
                self.state = DebounceState::Idle;
                EdgeAction::Emit(DoorState::Open)
            }
            DoorState::Open => {
                self.state = DebounceState::AwaitingConfirmation;
                EdgeAction::StartTimer(self.open_delay)
            }
        }
    }

    /// Resolve a fired confirmation timer against the level re-read at expiry.
    ///
    /// `None` means the re-read failed. Returns `Some(Open)` only when a
    /// confirmation was pending and the line still reads open.
    pub fn on_timer(&mut self, level: Option<RawLevel>) -> Option<DoorState> {
        let pending = self.state == DebounceState::AwaitingConfirmation;
        self.state = DebounceState::Idle;

        match level {
            Some(level) if pending && level == self.open_level => Some(DoorState::Open),
            _ => None,
        }
    }

    /// Drop any pending confirmation without emitting.
    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }
}
