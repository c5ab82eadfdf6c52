//! Publishes a device's status in raw and Home Assistant form.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::device::{DeviceId, DeviceLayer, RawStatus};
use crate::error::{BridgeError, Result};
use crate::topics::Topics;
use crate::translator::{format_fixed, HvacMode, FIELD_SENSOR_TEMPERATURE, FIELD_SET_TEMPERATURE};

/// Fetches a device's status and fans it out to the status topics.
#[derive(Clone)]
pub struct StatusPublisher {
    bus: Arc<dyn MessageBus>,
    devices: Arc<dyn DeviceLayer>,
    topics: Topics,
}

impl StatusPublisher {
    /// Create a publisher.
    pub fn new(bus: Arc<dyn MessageBus>, devices: Arc<dyn DeviceLayer>, topics: Topics) -> Self {
        Self {
            bus,
            devices,
            topics,
        }
    }

    /// Fetch the current status of `device_id` and publish it.
    ///
    /// Nothing is published if the fetch fails. Otherwise all four topics are
    /// attempted even if some publishes fail; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the device-layer error if the status fetch fails, or the first
    /// bus error encountered while publishing.
    pub async fn publish_status(&self, device_id: &DeviceId) -> Result<()> {
        let status = self.devices.device_status(device_id).await?;
        self.publish_snapshot(device_id, &status).await
    }

    /// Publish an already fetched status snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first serialization or bus error encountered.
    pub async fn publish_snapshot(&self, device_id: &DeviceId, status: &RawStatus) -> Result<()> {
        let mut messages = vec![(self.topics.status(device_id), serde_json::to_vec(status)?)];

        match HvacMode::from_status(status) {
            Some(mode) => messages.push((
                self.topics.mode_status(device_id),
                mode.as_str().as_bytes().to_vec(),
            )),
            None => debug!("No mode to report for {}", device_id),
        }

        for (field, topic) in [
            (FIELD_SET_TEMPERATURE, self.topics.temperature_status(device_id)),
            (FIELD_SENSOR_TEMPERATURE, self.topics.temperature_sensor(device_id)),
        ] {
            match status.get(field).and_then(format_fixed) {
                Some(text) => messages.push((topic, text.into_bytes())),
                None => debug!("No numeric {} to report for {}", field, device_id),
            }
        }

        let mut first_error: Option<BridgeError> = None;
        for (topic, payload) in messages {
            if let Err(e) = self.bus.publish(&topic, payload).await {
                warn!("Failed to publish {}: {}", topic, e);
                first_error.get_or_insert(e.into());
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(all(test, feature = "in-memory"))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::bus::MemoryBus;
    use crate::simulated::SimulatedFleet;

    const BASE: &str = "ewpe-smart";

    fn id(value: &str) -> DeviceId {
        DeviceId::parse(value).unwrap()
    }

    fn setup(status: serde_json::Value) -> (Arc<MemoryBus>, Arc<SimulatedFleet>, StatusPublisher) {
        let bus = Arc::new(MemoryBus::new());
        let (fleet, _events) = SimulatedFleet::new();
        let fleet = Arc::new(fleet);
        fleet.insert_with_status(id("a1b2c3d4e5f6"), "Living", status.as_object().cloned().unwrap());
        let publisher = StatusPublisher::new(bus.clone(), fleet.clone(), Topics::new(BASE));
        (bus, fleet, publisher)
    }

    #[tokio::test]
    async fn test_cooling_status_fans_out() {
        let (bus, _fleet, publisher) =
            setup(json!({"Pow": 1, "Mod": 1, "SetTem": 22, "TemSen": 24}));

        publisher.publish_status(&id("a1b2c3d4e5f6")).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(
            &bus.last_payload("ewpe-smart/a1b2c3d4e5f6/status").unwrap(),
        )
        .unwrap();
        assert_eq!(raw, json!({"Pow": 1, "Mod": 1, "SetTem": 22, "TemSen": 24}));
        assert_eq!(
            bus.last_payload("ewpe-smart/a1b2c3d4e5f6/hoass/mode/status").as_deref(),
            Some("cool")
        );
        assert_eq!(
            bus.last_payload("ewpe-smart/a1b2c3d4e5f6/hoass/temp/status").as_deref(),
            Some("22.0")
        );
        assert_eq!(
            bus.last_payload("ewpe-smart/a1b2c3d4e5f6/hoass/temp/sensor").as_deref(),
            Some("24.0")
        );
        assert_eq!(bus.published().len(), 4);
    }

    #[tokio::test]
    async fn test_powered_off_reports_off_regardless_of_mode() {
        let (bus, _fleet, publisher) = setup(json!({"Pow": 0, "Mod": 4}));

        publisher.publish_status(&id("a1b2c3d4e5f6")).await.unwrap();

        assert_eq!(
            bus.last_payload("ewpe-smart/a1b2c3d4e5f6/hoass/mode/status").as_deref(),
            Some("off")
        );
        // No temperature fields, so only the raw status and the mode go out.
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_device_publishes_nothing() {
        let (bus, fleet, publisher) = setup(json!({"Pow": 1}));
        fleet.set_reachable(&id("a1b2c3d4e5f6"), false);

        let err = publisher.publish_status(&id("a1b2c3d4e5f6")).await.unwrap_err();

        assert!(matches!(err, BridgeError::DeviceUnreachable { .. }));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_mode_is_skipped() {
        let (bus, _fleet, publisher) = setup(json!({"Pow": 1, "Mod": 3, "SetTem": 20}));

        publisher.publish_status(&id("a1b2c3d4e5f6")).await.unwrap();

        assert!(bus
            .published_on("ewpe-smart/a1b2c3d4e5f6/hoass/mode/status")
            .is_empty());
        assert_eq!(
            bus.last_payload("ewpe-smart/a1b2c3d4e5f6/hoass/temp/status").as_deref(),
            Some("20.0")
        );
    }

    #[tokio::test]
    async fn test_bus_failure_is_reported_after_attempting_all() {
        let (bus, _fleet, publisher) = setup(json!({"Pow": 1, "Mod": 0}));
        bus.set_failing(true);

        let err = publisher.publish_status(&id("a1b2c3d4e5f6")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Bus(_)));
    }
}
