//! In-memory GPIO line.

use crate::error::LineError;
use crate::input::{Edge, GpioLine, LineEvents, validate_level};
use crate::sensors::RawLevel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

struct LineState {
    level: RawLevel,
    edge: Edge,
    events: Option<mpsc::UnboundedSender<Result<RawLevel, LineError>>>,
    watched: bool,
    released: bool,
    read_fault: Option<String>,
}

/// Simulated digital input.
///
/// Level changes made with [`set_level`](Self::set_level) produce edge
/// notifications filtered by the watched [`Edge`] mode, the same way the
/// kernel filters interrupts for a real pin.
pub struct SimulatedLine {
    pin: u32,
    state: Mutex<LineState>,
    releases: AtomicU32,
}

impl SimulatedLine {
    /// Create a line on `pin` resting at `initial` level.
    pub fn new(pin: u32, initial: RawLevel) -> Self {
        Self {
            pin,
            state: Mutex::new(LineState {
                level: initial,
                edge: Edge::Both,
                events: None,
                watched: false,
                released: false,
                read_fault: None,
            }),
            releases: AtomicU32::new(0),
        }
    }

    /// Current level without going through the fault path.
    pub fn level(&self) -> RawLevel {
        self.state.lock().level
    }

    /// Drive the line to `level`. Returns true if an edge notification fired.
    pub fn set_level(&self, level: RawLevel) -> bool {
        let mut state = self.state.lock();
        if state.released {
            return false;
        }
        let previous = state.level;
        state.level = level;

        if !state.edge.fires(previous, level) {
            return false;
        }
        match &state.events {
            Some(tx) => tx.send(Ok(level)).is_ok(),
            None => false,
        }
    }

    /// Change the level silently, as if the edge interrupt was missed.
    pub fn set_level_quiet(&self, level: RawLevel) {
        self.state.lock().level = level;
    }

    /// Deliver a raw notification, bypassing edge filtering and validation.
    pub fn inject_raw(&self, level: RawLevel) {
        if let Some(tx) = &self.state.lock().events {
            let _ = tx.send(Ok(level));
        }
    }

    /// Deliver a failed notification.
    pub fn inject_error(&self, reason: impl Into<String>) {
        if let Some(tx) = &self.state.lock().events {
            let _ = tx.send(Err(LineError::Simulated {
                pin: self.pin,
                reason: reason.into(),
            }));
        }
    }

    /// Make subsequent `read_level` calls fail (`Some`) or succeed again (`None`).
    pub fn fail_reads(&self, reason: Option<String>) {
        self.state.lock().read_fault = reason;
    }

    /// How many times `release` has been called.
    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

impl GpioLine for SimulatedLine {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn watch(&self, edge: Edge) -> Result<LineEvents, LineError> {
        let mut state = self.state.lock();
        if state.released {
            return Err(LineError::Released { pin: self.pin });
        }
        if state.watched {
            return Err(LineError::AlreadyWatching { pin: self.pin });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.edge = edge;
        state.events = Some(tx);
        state.watched = true;
        Ok(rx)
    }

    fn read_level(&self) -> Result<RawLevel, LineError> {
        let state = self.state.lock();
        if state.released {
            return Err(LineError::Released { pin: self.pin });
        }
        if let Some(reason) = &state.read_fault {
            return Err(LineError::Simulated {
                pin: self.pin,
                reason: reason.clone(),
            });
        }
        validate_level(self.pin, state.level)
    }

    fn release(&self) -> Result<(), LineError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.released = true;
        // Dropping the sender closes the watcher's stream
        state.events = None;
        Ok(())
    }
}
