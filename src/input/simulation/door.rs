//! Door simulation for testing.
//!
//! Periodically swings a simulated door open and shut so the monitor and
//! webhook path can be exercised on a machine without a reed switch.

use super::line::SimulatedLine;
use crate::input::GpioLine;
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval, sleep};

/// Contact chatter produced while the door swings open.
const BOUNCE_STEP: Duration = Duration::from_millis(15);

/// Spawn a task that alternately opens and closes the door every `period`.
///
/// Openings include a short bounce (`open, closed, open`) so the debounce
/// window is exercised. `open_level` is the raw level that means open.
///
/// # Returns
///
/// A `JoinHandle` that can be used to abort the simulation task.
pub fn run_door_simulation(
    line: Arc<SimulatedLine>,
    open_level: u8,
    period: Duration,
) -> JoinHandle<()> {
    let closed_level = if open_level == 0 { 1 } else { 0 };

    tokio::spawn(async move {
        let mut interval = interval(period);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if line.is_released() {
                break;
            }

            if line.level() == open_level {
                line.set_level(closed_level);
                info!("[Sim] Door closed on GPIO{}", line.pin());
            } else {
                line.set_level(open_level);
                sleep(BOUNCE_STEP).await;
                line.set_level(closed_level);
                sleep(BOUNCE_STEP).await;
                line.set_level(open_level);
                info!("[Sim] Door opened on GPIO{} (with bounce)", line.pin());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Edge;

    #[tokio::test(start_paused = true)]
    async fn test_simulation_toggles_door() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let mut events = line.watch(Edge::Both).unwrap();

        let handle = run_door_simulation(line.clone(), 1, Duration::from_secs(10));

        // Open with bounce: 1, 0, 1
        assert_eq!(events.recv().await.unwrap().unwrap(), 1);
        assert_eq!(events.recv().await.unwrap().unwrap(), 0);
        assert_eq!(events.recv().await.unwrap().unwrap(), 1);

        // Then closed on the next period
        assert_eq!(events.recv().await.unwrap().unwrap(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_stops_after_release() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        line.release().unwrap();

        let handle = run_door_simulation(line, 1, Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("simulation should stop")
            .unwrap();
    }
}
