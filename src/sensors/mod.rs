//! Door sensor state management.
//!
//! This module turns raw edge notifications from a [`GpioLine`](crate::input::GpioLine)
//! into confirmed open/closed events. The debounce rules live in the pure
//! [`Debouncer`]; [`SensorMonitor`] drives it from a tokio task and owns the
//! single confirmation timer.

pub mod debounce;
pub mod door_state;
pub mod monitor;

pub use debounce::{DebounceState, Debouncer, EdgeAction};
pub use door_state::{DoorState, RawLevel};
pub use monitor::{SensorConfig, SensorEvent, SensorEvents, SensorMonitor};
