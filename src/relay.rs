//! Sensor-to-webhook relay.
//!
//! Listens to a monitor's events and hands every state change to the
//! [`NotificationDispatcher`] on its own task, so a slow or failing endpoint
//! never holds up the sensor. Deliveries are tracked so shutdown can wait for
//! them within a grace period.

use crate::notify::NotificationDispatcher;
use crate::sensors::{DoorState, SensorEvent, SensorEvents};
use log::{error, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct DeliveryRelay {
    dispatcher: NotificationDispatcher,
    deliveries: TaskTracker,
}

impl DeliveryRelay {
    pub fn new(dispatcher: NotificationDispatcher) -> Self {
        Self {
            dispatcher,
            deliveries: TaskTracker::new(),
        }
    }

    /// Spawn the relay loop.
    ///
    /// Runs until `cancel` fires or the monitor stops. Returns a
    /// `JoinHandle` for the loop itself; deliveries outlive it and are
    /// awaited with [`drain`](Self::drain).
    pub fn start(
        &self,
        mut events: SensorEvents,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let deliveries = self.deliveries.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Some(SensorEvent::Change(state)) => {
                        info!("[Sensor] Door state changed: {}", state);
                        spawn_delivery(&deliveries, &dispatcher, state);
                    }
                    Some(_) => {}
                    None => {
                        info!("[System] Sensor event stream closed");
                        break;
                    }
                }
            }
        })
    }

    /// Deliveries still running.
    pub fn in_flight(&self) -> usize {
        self.deliveries.len()
    }

    /// Stop accepting deliveries and wait up to `grace` for running ones.
    ///
    /// Returns `true` if everything finished in time. Deliveries still running
    /// afterwards are abandoned when the runtime shuts down.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.deliveries.close();
        if self.deliveries.is_empty() {
            return true;
        }

        info!(
            "[Webhook] Waiting up to {}ms for {} in-flight deliveries",
            grace.as_millis(),
            self.deliveries.len()
        );
        match tokio::time::timeout(grace, self.deliveries.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "[Webhook] Abandoning {} deliveries still in flight",
                    self.deliveries.len()
                );
                false
            }
        }
    }
}

fn spawn_delivery(deliveries: &TaskTracker, dispatcher: &NotificationDispatcher, state: DoorState) {
    let dispatcher = dispatcher.clone();
    deliveries.spawn(async move {
        if let Err(e) = dispatcher.notify(state).await {
            error!("[Webhook] Failed to notify webhook: {}", e);
        }
    });
}
