//! In-memory device fleet.
//!
//! Stands in for the network device layer in tests and in the bridge's
//! simulated mode. State changes are merged into the stored status the way a
//! real unit would report them back. Like a real unit, only integer field
//! values are accepted.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::device::{
    DeviceDescriptor, DeviceError, DeviceEvent, DeviceId, DeviceLayer, DeviceResult, RawStatus,
};

#[derive(Debug, Clone)]
struct SimulatedUnit {
    descriptor: DeviceDescriptor,
    status: RawStatus,
    reachable: bool,
}

/// A fleet of simulated climate units.
#[derive(Debug)]
pub struct SimulatedFleet {
    units: Mutex<BTreeMap<String, SimulatedUnit>>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl SimulatedFleet {
    /// Create an empty fleet and the receiver for its bind events.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let fleet = Self {
            units: Mutex::new(BTreeMap::new()),
            events,
        };
        (fleet, receiver)
    }

    /// Default status of a freshly powered unit: off, auto, 24 set, 25 sensed.
    #[must_use]
    pub fn default_status() -> RawStatus {
        json!({ "Pow": 0, "Mod": 0, "SetTem": 24, "TemSen": 25, "WdSpd": 0 })
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    /// Add a unit with [`SimulatedFleet::default_status`] and announce it.
    pub fn insert(&self, device_id: DeviceId, name: impl Into<String>) {
        self.insert_with_status(device_id, name, Self::default_status());
    }

    /// Add a unit with the given status and announce it as bound.
    ///
    /// Inserting an existing identifier replaces the unit and announces it again.
    pub fn insert_with_status(&self, device_id: DeviceId, name: impl Into<String>, status: RawStatus) {
        let mut descriptor = DeviceDescriptor::new(device_id.clone(), name);
        descriptor.bound = true;
        descriptor.props = status.clone();

        self.lock().insert(
            key(&device_id),
            SimulatedUnit {
                descriptor: descriptor.clone(),
                status,
                reachable: true,
            },
        );

        debug!("Simulated device {} bound", device_id);
        // The receiver may already be gone when the bridge has stopped.
        let _ = self.events.send(DeviceEvent::Bound {
            device_id,
            descriptor,
        });
    }

    /// Make a unit stop (or resume) answering requests.
    pub fn set_reachable(&self, device_id: &DeviceId, reachable: bool) {
        if let Some(unit) = self.lock().get_mut(&key(device_id)) {
            unit.reachable = reachable;
        }
    }

    /// Current status of a unit, bypassing reachability.
    #[must_use]
    pub fn status_of(&self, device_id: &DeviceId) -> Option<RawStatus> {
        self.lock()
            .get(&key(device_id))
            .map(|unit| unit.status.clone())
    }

    fn reachable_unit<T>(
        &self,
        device_id: &DeviceId,
        f: impl FnOnce(&mut SimulatedUnit) -> T,
    ) -> DeviceResult<T> {
        let mut units = self.lock();
        let unit = units
            .get_mut(&key(device_id))
            .ok_or_else(|| DeviceError::NotFound {
                device_id: device_id.clone(),
            })?;
        if !unit.reachable {
            return Err(DeviceError::Unreachable {
                device_id: device_id.clone(),
                message: "simulated unit is not answering".to_string(),
            });
        }
        Ok(f(unit))
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SimulatedUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeviceLayer for SimulatedFleet {
    async fn device_status(&self, device_id: &DeviceId) -> DeviceResult<RawStatus> {
        self.reachable_unit(device_id, |unit| unit.status.clone())
    }

    async fn set_device_state(
        &self,
        device_id: &DeviceId,
        fragment: RawStatus,
    ) -> DeviceResult<RawStatus> {
        if let Some((field, value)) = fragment.iter().find(|(_, value)| !value.is_i64()) {
            return Err(DeviceError::Rejected {
                device_id: device_id.clone(),
                message: format!("{field} must be an integer, got {value}"),
            });
        }

        self.reachable_unit(device_id, |unit| {
            unit.status.extend(fragment);
            unit.descriptor.props = unit.status.clone();
            unit.status.clone()
        })
    }

    async fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock()
            .values()
            .map(|unit| {
                let mut descriptor = unit.descriptor.clone();
                descriptor.props = unit.status.clone();
                descriptor
            })
            .collect()
    }
}

fn key(device_id: &DeviceId) -> String {
    device_id.as_str().to_ascii_lowercase()
}
