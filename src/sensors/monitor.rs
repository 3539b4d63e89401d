//! Debounced door sensor monitor.
//!
//! Owns one [`GpioLine`], runs the [`Debouncer`] over its edge notifications
//! on a dedicated task, and fans confirmed [`SensorEvent`]s out to every
//! subscriber. Each subscriber has its own unbounded queue, so no change is
//! ever dropped for a slow consumer.
//!
//! The pending open confirmation is a single timer slot owned by the monitor
//! task. Replacing the slot drops the previous timer, so at most one
//! confirmation is ever live.

use super::debounce::{Debouncer, EdgeAction};
use super::door_state::{DoorState, RawLevel};
use crate::error::{LineError, SentinelError};
use crate::input::{Edge, GpioLine, LineEvents, validate_level};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;

/// Receiving end of a monitor subscription. Yields `None` once the monitor
/// has stopped and every earlier event has been received.
pub type SensorEvents = mpsc::UnboundedReceiver<SensorEvent>;

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<SensorEvent>>>>;

/// Fixed configuration of one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub pin: u32,
    pub edge: Edge,
    /// How long an open reading must hold before it is confirmed. Zero = immediate.
    #[serde(with = "duration_ms")]
    pub open_delay: Duration,
    /// Raw level that means the door is open.
    pub open_level: RawLevel,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pin: 4,
            edge: Edge::Both,
            open_delay: Duration::ZERO,
            open_level: 1,
        }
    }
}

/// Event emitted by the monitor.
///
/// Each confirmed transition produces the convenience event (`Open` or
/// `Close`) followed by `Change` carrying the new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEvent {
    Open,
    Close,
    Change(DoorState),
}

impl SensorEvent {
    /// The new state if this is a `Change` event.
    pub fn change(self) -> Option<DoorState> {
        match self {
            SensorEvent::Change(state) => Some(state),
            _ => None,
        }
    }
}

/// Door sensor on one GPIO line.
///
/// # Example
/// ```ignore
/// let monitor = SensorMonitor::new(line, SensorConfig::default());
/// let mut events = monitor.subscribe();
/// monitor.start()?;
///
/// while let Some(event) = events.recv().await {
///     if let Some(state) = event.change() {
///         println!("door is {state}");
///     }
/// }
/// ```
pub struct SensorMonitor {
    line: Arc<dyn GpioLine>,
    config: SensorConfig,
    subscribers: Subscribers,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SensorMonitor {
    pub fn new(line: Arc<dyn GpioLine>, config: SensorConfig) -> Self {
        info!(
            "[System] Initializing door sensor on GPIO{} (edge={}, openDelay={}ms, openValue={})",
            config.pin,
            config.edge,
            config.open_delay.as_millis(),
            config.open_level
        );
        Self {
            line,
            config,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to sensor events. Subscribe before [`start`](Self::start)
    /// to observe every event.
    pub fn subscribe(&self) -> SensorEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.is_shut_down() {
            // Dropping `tx` leaves the receiver already closed
            return rx;
        }
        self.subscribers.lock().push(tx);
        rx
    }

    /// Begin watching the line. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SentinelError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LineError::Released {
                pin: self.config.pin,
            }
            .into());
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(SentinelError::AlreadyStarted);
        }

        let edges = self.line.watch(self.config.edge)?;
        *task = Some(tokio::spawn(run(
            self.line.clone(),
            self.config.clone(),
            self.subscribers.clone(),
            self.cancel.clone(),
            edges,
        )));

        info!(
            "[System] Door sensor monitoring started on GPIO{}",
            self.config.pin
        );
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop monitoring: cancel any pending confirmation and release the line.
    ///
    /// Idempotent. Release failures are logged, not returned.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!(
                "[System] Door sensor on GPIO{} already shut down",
                self.config.pin
            );
            return;
        }
        info!(
            "[System] Shutting down door sensor on GPIO{}",
            self.config.pin
        );

        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("[System] Door sensor task failed: {}", e);
        }

        // Releasing a sysfs line joins its watcher thread
        let line = self.line.clone();
        match tokio::task::spawn_blocking(move || line.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[System] Error during door sensor cleanup: {}", e),
            Err(e) => error!("[System] Door sensor cleanup task failed: {}", e),
        }

        // Never started: close subscriptions here instead of in the task
        self.subscribers.lock().clear();
    }
}

impl Drop for SensorMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    line: Arc<dyn GpioLine>,
    config: SensorConfig,
    subscribers: Subscribers,
    cancel: CancellationToken,
    mut edges: LineEvents,
) {
    let pin = config.pin;
    let mut debouncer = Debouncer::new(config.open_level, config.open_delay);
    let mut confirmation: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                if confirmation.take().is_some() {
                    debouncer.cancel();
                    debug!("[Sensor] GPIO{} pending open confirmation cancelled", pin);
                }
                break;
            }

            edge = edges.recv() => {
                let level = match edge {
                    None => {
                        error!("[Sensor] GPIO{} edge stream closed, monitoring stopped", pin);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("[Sensor] GPIO{} read error: {}", pin, e);
                        continue;
                    }
                    Some(Ok(level)) => match validate_level(pin, level) {
                        Ok(level) => level,
                        Err(e) => {
                            warn!("[Sensor] Unexpected GPIO{} value: {}", pin, e);
                            continue;
                        }
                    },
                };

                let observed = DoorState::from_level(level, config.open_level);
                info!("[Sensor] GPIO{} state detected: {}", pin, observed);

                match debouncer.on_edge(level) {
                    EdgeAction::Emit(state) => {
                        if confirmation.take().is_some() {
                            debug!("[Sensor] GPIO{} pending open confirmation superseded", pin);
                        }
                        match state {
                            DoorState::Open => info!("[Sensor] GPIO{} OPEN (no delay)", pin),
                            DoorState::Closed => info!("[Sensor] GPIO{} CLOSED", pin),
                        }
                        emit(&subscribers, state);
                    }
                    EdgeAction::StartTimer(delay) => {
                        // Replacing the slot drops (cancels) any earlier timer
                        confirmation = Some(Box::pin(sleep(delay)));
                        debug!(
                            "[Sensor] GPIO{} awaiting {}ms open confirmation",
                            pin,
                            delay.as_millis()
                        );
                    }
                }
            }

            _ = fired(&mut confirmation) => {
                confirmation = None;
                let level = match line.read_level() {
                    Ok(level) => Some(level),
                    Err(e) => {
                        error!("[Sensor] GPIO{} confirmation read failed: {}", pin, e);
                        None
                    }
                };

                match debouncer.on_timer(level) {
                    Some(state) => {
                        info!(
                            "[Sensor] GPIO{} confirmed OPEN after {}ms",
                            pin,
                            config.open_delay.as_millis()
                        );
                        emit(&subscribers, state);
                    }
                    None => debug!("[Sensor] GPIO{} open not sustained, discarded", pin),
                }
            }
        }
    }

    // Closing the queues tells subscribers monitoring has ended
    subscribers.lock().clear();
    debug!("[Sensor] GPIO{} monitor task stopped", pin);
}

/// Resolves when the pending confirmation timer fires; never if none is set.
async fn fired(confirmation: &mut Option<Pin<Box<Sleep>>>) {
    match confirmation {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

fn emit(subscribers: &Subscribers, state: DoorState) {
    let convenience = match state {
        DoorState::Open => SensorEvent::Open,
        DoorState::Closed => SensorEvent::Close,
    };
    // Subscribers that hung up are pruned
    subscribers.lock().retain(|tx| {
        tx.send(convenience).is_ok() && tx.send(SensorEvent::Change(state)).is_ok()
    });
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SimulatedLine;
    use tokio::time::{Instant, timeout};

    fn start_monitor(
        line: &Arc<SimulatedLine>,
        open_delay_ms: u64,
    ) -> (SensorMonitor, SensorEvents) {
        let config = SensorConfig {
            pin: 4,
            edge: Edge::Both,
            open_delay: Duration::from_millis(open_delay_ms),
            open_level: 1,
        };
        let monitor = SensorMonitor::new(line.clone(), config);
        let events = monitor.subscribe();
        monitor.start().unwrap();
        (monitor, events)
    }

    async fn assert_quiet(events: &mut SensorEvents) {
        let next = timeout(Duration::from_secs(2), events.recv()).await;
        assert!(next.is_err(), "unexpected event: {:?}", next);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_emitted_immediately() {
        let line = Arc::new(SimulatedLine::new(4, 1));
        let (_monitor, mut events) = start_monitor(&line, 200);

        let start = Instant::now();
        line.set_level(0);

        assert_eq!(events.recv().await.unwrap(), SensorEvent::Close);
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Closed)
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_without_delay_is_immediate() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 0);

        let start = Instant::now();
        line.set_level(1);

        assert_eq!(events.recv().await.unwrap(), SensorEvent::Open);
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Open)
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_close_within_delay_only_closes() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 200);

        line.set_level(1);
        sleep(Duration::from_millis(50)).await;
        line.set_level(0);

        assert_eq!(events.recv().await.unwrap(), SensorEvent::Close);
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Closed)
        );
        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_open_is_confirmed_once() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 200);

        let start = Instant::now();
        line.set_level(1);

        assert_eq!(events.recv().await.unwrap(), SensorEvent::Open);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Open)
        );
        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_open_edge_restarts_window() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 200);

        let start = Instant::now();
        line.set_level(1);
        sleep(Duration::from_millis(150)).await;
        line.inject_raw(1);

        assert_eq!(events.recv().await.unwrap(), SensorEvent::Open);
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Open)
        );
        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounce_back_to_closed_is_discarded() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 200);

        line.set_level(1);
        // Contact drops without an interrupt reaching us
        line.set_level_quiet(0);

        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_confirmation_read_is_discarded() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (_monitor, mut events) = start_monitor(&line, 200);

        line.set_level(1);
        line.fail_reads(Some("bus glitch".into()));

        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_and_invalid_values_are_ignored() {
        let line = Arc::new(SimulatedLine::new(4, 1));
        let (_monitor, mut events) = start_monitor(&line, 0);

        line.inject_error("EIO");
        line.inject_raw(7);
        line.set_level(0);

        // Only the valid close gets through
        assert_eq!(events.recv().await.unwrap(), SensorEvent::Close);
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Closed)
        );
        assert_quiet(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_low_sensor() {
        let line = Arc::new(SimulatedLine::new(4, 1));
        let config = SensorConfig {
            open_level: 0,
            ..SensorConfig::default()
        };
        let monitor = SensorMonitor::new(line.clone(), config);
        let mut events = monitor.subscribe();
        monitor.start().unwrap();

        line.set_level(0);
        assert_eq!(events.recv().await.unwrap(), SensorEvent::Open);
        assert_eq!(
            events.recv().await.unwrap(),
            SensorEvent::Change(DoorState::Open)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_timer_and_releases_once() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (monitor, mut events) = start_monitor(&line, 200);

        line.set_level(1);
        sleep(Duration::from_millis(50)).await;

        monitor.shutdown().await;
        monitor.shutdown().await;

        assert!(monitor.is_shut_down());
        assert_eq!(line.release_count(), 1);
        assert!(line.is_released());

        // The pending open never fires; the subscription just ends
        sleep(Duration::from_secs(1)).await;
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_change_reaches_subscriber_during_burst() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (monitor, mut events) = start_monitor(&line, 0);

        for i in 0..200u32 {
            assert!(line.set_level(if i % 2 == 0 { 1 } else { 0 }));
        }

        let mut changes = Vec::new();
        while changes.len() < 200 {
            let event = events.recv().await.unwrap();
            if let Some(state) = event.change() {
                changes.push(state);
            }
        }
        assert_eq!(changes[0], DoorState::Open);
        assert_eq!(changes[199], DoorState::Closed);

        monitor.shutdown().await;
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_edge_stream_ends_subscriptions() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (monitor, mut events) = start_monitor(&line, 0);

        line.set_level(1);
        // Watcher goes away underneath the monitor
        line.release().unwrap();

        assert_eq!(events.recv().await, Some(SensorEvent::Open));
        assert_eq!(events.recv().await, Some(SensorEvent::Change(DoorState::Open)));
        assert_eq!(events.recv().await, None);
        assert!(!monitor.is_shut_down());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_is_closed() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let monitor = SensorMonitor::new(line.clone(), SensorConfig::default());
        monitor.shutdown().await;

        let mut events = monitor.subscribe();
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let line = Arc::new(SimulatedLine::new(4, 0));
        let (monitor, _events) = start_monitor(&line, 0);

        assert!(matches!(monitor.start(), Err(SentinelError::AlreadyStarted)));

        monitor.shutdown().await;
        assert!(matches!(monitor.start(), Err(SentinelError::Line(_))));
    }

    #[test]
    fn test_sensor_event_change() {
        assert_eq!(
            SensorEvent::Change(DoorState::Open).change(),
            Some(DoorState::Open)
        );
        assert_eq!(SensorEvent::Open.change(), None);
    }
}
