//! Per-device status polling.
//!
//! When the device layer binds a device, its descriptor is announced on
//! `B/<id>` and a timer starts refreshing its status every poll interval.
//! Timers run until the scheduler is dropped; device removal is not modelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::device::{DeviceDescriptor, DeviceId};
use crate::error::Result;
use crate::publisher::StatusPublisher;
use crate::topics::Topics;

/// Owns one polling task per bound device.
pub struct PollScheduler {
    bus: Arc<dyn MessageBus>,
    publisher: StatusPublisher,
    topics: Topics,
    interval: Option<Duration>,
    registrations: HashMap<String, JoinHandle<()>>,
}

impl PollScheduler {
    /// Create a scheduler. `interval` of `None` (or zero) disables polling.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        publisher: StatusPublisher,
        topics: Topics,
        interval: Option<Duration>,
    ) -> Self {
        Self {
            bus,
            publisher,
            topics,
            interval: interval.filter(|period| !period.is_zero()),
            registrations: HashMap::new(),
        }
    }

    /// Handle a device-bound event.
    ///
    /// The descriptor is published every time, from its own task so the caller
    /// never waits on the bus. A poll timer is registered only for identifiers
    /// without one, so a device that re-announces itself does not get polled
    /// twice.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be serialized. The timer is
    /// registered regardless. Publish failures are logged by the spawned task.
    pub fn on_device_bound(
        &mut self,
        device_id: &DeviceId,
        descriptor: &DeviceDescriptor,
    ) -> Result<()> {
        info!("Device {} bound", device_id);
        self.register(device_id);

        let payload = serde_json::to_vec(descriptor)?;
        let topic = self.topics.device(device_id);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            if let Err(e) = bus.publish(&topic, payload).await {
                error!("Failed to announce device on {}: {}", topic, e);
            }
        });
        Ok(())
    }

    /// Number of devices with an active poll timer.
    #[must_use]
    pub fn active_polls(&self) -> usize {
        self.registrations.len()
    }

    /// Whether `device_id` has an active poll timer.
    #[must_use]
    pub fn is_polling(&self, device_id: &DeviceId) -> bool {
        self.registrations
            .contains_key(&device_id.as_str().to_ascii_lowercase())
    }

    fn register(&mut self, device_id: &DeviceId) {
        let Some(period) = self.interval else {
            debug!("Polling disabled, not scheduling {}", device_id);
            return;
        };

        let key = device_id.as_str().to_ascii_lowercase();
        if self.registrations.contains_key(&key) {
            debug!("Device {} is already being polled", device_id);
            return;
        }

        let handle = tokio::spawn(poll_device(
            self.publisher.clone(),
            device_id.clone(),
            period,
        ));
        self.registrations.insert(key, handle);
        info!(
            "Polling {} every {} ms",
            device_id,
            period.as_millis()
        );
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for handle in self.registrations.values() {
            handle.abort();
        }
    }
}

async fn poll_device(publisher: StatusPublisher, device_id: DeviceId, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match publisher.publish_status(&device_id).await {
            Ok(()) => {}
            // Retried on the next tick.
            Err(e) if e.is_recoverable() => warn!(
                error_code = e.error_code(),
                "Poll of {} failed: {}", device_id, e
            ),
            Err(e) => error!(
                error_code = e.error_code(),
                "Poll of {} failed: {}", device_id, e
            ),
        }
    }
}
