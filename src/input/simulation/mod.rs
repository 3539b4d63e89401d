//! Simulated input for development without GPIO hardware.

mod door;
mod line;

pub use door::run_door_simulation;
pub use line::SimulatedLine;
