//! Input lines for the door sensor.
//!
//! A [`GpioLine`] is the only hardware capability the monitor needs:
//! subscribe to edge events on one digital input, read its instantaneous
//! level, and release it.
//!
//! Current line implementations:
//! - `sysfs`: Linux `/sys/class/gpio` with `poll(2)` edge interrupts
//! - `simulation`: in-process line for development and tests

pub mod simulation;
pub mod sysfs;

pub use simulation::SimulatedLine;
pub use sysfs::SysfsLine;

use crate::error::LineError;
use crate::sensors::RawLevel;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;

/// Stream of edge notifications: the level read after each edge, or the read error.
pub type LineEvents = mpsc::UnboundedReceiver<Result<RawLevel, LineError>>;

/// Which transitions trigger an edge notification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    Both,
    Rising,
    Falling,
}

impl Edge {
    /// Whether a transition from `from` to `to` fires a notification.
    pub fn fires(self, from: RawLevel, to: RawLevel) -> bool {
        if from == to {
            return false;
        }
        match self {
            Edge::Both => true,
            Edge::Rising => to > from,
            Edge::Falling => to < from,
        }
    }
}

/// One digital input pin.
///
/// `watch` may be called once; notifications are delivered serially on the
/// returned channel, which closes when the line is released.
pub trait GpioLine: Send + Sync {
    /// Pin number, used in log messages.
    fn pin(&self) -> u32;

    /// Start edge notifications.
    fn watch(&self, edge: Edge) -> Result<LineEvents, LineError>;

    /// Read the instantaneous level.
    fn read_level(&self) -> Result<RawLevel, LineError>;

    /// Release the line. Safe to call more than once.
    fn release(&self) -> Result<(), LineError>;
}

/// Reject anything that is not a digital level.
pub(crate) fn validate_level(pin: u32, level: RawLevel) -> Result<RawLevel, LineError> {
    if level <= 1 {
        Ok(level)
    } else {
        Err(LineError::InvalidLevel { pin, level })
    }
}
