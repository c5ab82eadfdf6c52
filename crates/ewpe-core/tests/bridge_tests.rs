//! End-to-end tests of the bridge controller over the in-memory bus and fleet.

use std::sync::Arc;
use std::time::Duration;

use ewpe_core::{
    Bridge, BusEvent, DeviceDescriptor, DeviceId, MemoryBus, PublishedMessage, SimulatedFleet,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BASE: &str = "ewpe-smart";

struct Harness {
    bus: Arc<MemoryBus>,
    fleet: Arc<SimulatedFleet>,
    events: mpsc::Sender<BusEvent>,
    handle: JoinHandle<ewpe_core::Result<()>>,
}

impl Harness {
    fn start(poll_interval: Option<Duration>) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let (fleet, device_events) = SimulatedFleet::new();
        let fleet = Arc::new(fleet);
        let bridge = Bridge::new(BASE, poll_interval, bus.clone(), fleet.clone()).unwrap();
        let (events, bus_events) = mpsc::channel(16);
        let handle = tokio::spawn(bridge.run(bus_events, device_events));
        Self {
            bus,
            fleet,
            events,
            handle,
        }
    }

    async fn connected(poll_interval: Option<Duration>) -> Self {
        let harness = Self::start(poll_interval);
        harness.send(BusEvent::Connected).await;
        harness.wait("ewpe-smart/bridge/state", 1).await;
        harness
    }

    async fn send(&self, event: BusEvent) {
        self.events.send(event).await.unwrap();
    }

    async fn message(&self, topic: &str, payload: &str) {
        self.send(BusEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        })
        .await;
    }

    async fn wait(&self, topic: &str, count: usize) -> Vec<PublishedMessage> {
        tokio::time::timeout(Duration::from_secs(5), self.bus.wait_for(topic, count))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {count} message(s) on {topic}"))
    }
}

fn id(value: &str) -> DeviceId {
    DeviceId::parse(value).unwrap()
}

fn raw(value: Value) -> ewpe_core::RawStatus {
    value.as_object().cloned().unwrap()
}

fn json_payload(message: &PublishedMessage) -> Value {
    serde_json::from_slice(&message.payload).unwrap()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_connect_announces_online_and_subscribes() {
    let harness = Harness::start(None);
    harness.send(BusEvent::Connected).await;

    let state = harness.wait("ewpe-smart/bridge/state", 1).await;
    assert_eq!(state[0].payload_str(), "online");
    settle().await;
    assert_eq!(harness.bus.subscriptions(), vec!["ewpe-smart/#".to_string()]);
}

#[tokio::test]
async fn test_reconnect_republishes_online_and_resubscribes() {
    let harness = Harness::connected(None).await;

    harness.send(BusEvent::Error("connection reset".into())).await;
    harness.send(BusEvent::Connected).await;

    harness.wait("ewpe-smart/bridge/state", 2).await;
    settle().await;
    assert_eq!(harness.bus.subscriptions().len(), 2);
}

#[tokio::test]
async fn test_device_events_wait_for_first_connection() {
    let harness = Harness::start(None);
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    settle().await;
    assert!(harness.bus.published().is_empty());

    harness.send(BusEvent::Connected).await;
    let announced = harness.wait("ewpe-smart/a1b2c3d4e5f6", 1).await;

    let descriptor: DeviceDescriptor = serde_json::from_slice(&announced[0].payload).unwrap();
    assert_eq!(descriptor.id, id("a1b2c3d4e5f6"));
    assert_eq!(descriptor.name, "Living room");
    assert!(descriptor.bound);
}

#[tokio::test]
async fn test_list_publishes_all_descriptors() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    harness.fleet.insert(id("0011223344ff"), "Bedroom");

    harness.message("ewpe-smart/devices/list", "").await;

    let listing = harness.wait("ewpe-smart/devices", 1).await;
    let devices = json_payload(&listing[0]);
    assert_eq!(devices.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_get_publishes_raw_and_normalized_status() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert_with_status(
        id("a1b2c3d4e5f6"),
        "Living room",
        raw(json!({"Pow": 1, "Mod": 1, "SetTem": 22, "TemSen": 24})),
    );

    harness.message("ewpe-smart/a1b2c3d4e5f6/get", "").await;

    harness.wait("ewpe-smart/a1b2c3d4e5f6/hoass/temp/sensor", 1).await;
    let bus = &harness.bus;
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
    assert_eq!(bus.published_on("ewpe-smart/a1b2c3d4e5f6/status").len(), 1);
}

#[tokio::test]
async fn test_uppercase_identifier_is_routed() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");

    harness.message("ewpe-smart/A1B2C3D4E5F6/get", "").await;

    let status = harness.wait("ewpe-smart/A1B2C3D4E5F6/status", 1).await;
    assert_eq!(json_payload(&status[0])["SetTem"], json!(24));
}

#[tokio::test]
async fn test_raw_set_applies_fragment_and_publishes_snapshot() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/set", r#"{"Pow": 1, "WdSpd": 3}"#)
        .await;

    let status = harness.wait("ewpe-smart/a1b2c3d4e5f6/status", 1).await;
    let snapshot = json_payload(&status[0]);
    assert_eq!(snapshot["Pow"], json!(1));
    assert_eq!(snapshot["WdSpd"], json!(3));
    // Only the raw status is published after a set.
    assert!(harness
        .bus
        .published_on("ewpe-smart/a1b2c3d4e5f6/hoass/mode/status")
        .is_empty());
}

#[tokio::test]
async fn test_rejected_set_publishes_nothing() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    let before = harness.fleet.status_of(&id("a1b2c3d4e5f6")).unwrap();

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/set", r#"{"Pow": "on"}"#)
        .await;
    harness.message("ewpe-smart/a1b2c3d4e5f6/get", "").await;

    harness.wait("ewpe-smart/a1b2c3d4e5f6/status", 1).await;
    settle().await;
    assert_eq!(
        harness
            .bus
            .published_on("ewpe-smart/a1b2c3d4e5f6/status")
            .len(),
        1
    );
    assert_eq!(harness.fleet.status_of(&id("a1b2c3d4e5f6")).unwrap(), before);
}

#[tokio::test]
async fn test_mode_set_uses_encode_table() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/hoass/mode/set", "heat")
        .await;

    let status = harness.wait("ewpe-smart/a1b2c3d4e5f6/status", 1).await;
    let snapshot = json_payload(&status[0]);
    assert_eq!(snapshot["Pow"], json!(1));
    assert_eq!(snapshot["Mod"], json!(4));
}

#[tokio::test]
async fn test_temperature_set_wraps_integer() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/hoass/temp/set", "19.5")
        .await;

    let status = harness.wait("ewpe-smart/a1b2c3d4e5f6/status", 1).await;
    assert_eq!(json_payload(&status[0])["SetTem"], json!(19));
    assert_eq!(
        harness.fleet.status_of(&id("a1b2c3d4e5f6")).unwrap()["SetTem"],
        json!(19)
    );
}

#[tokio::test]
async fn test_bogus_mode_is_dropped() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    let before = harness.fleet.status_of(&id("a1b2c3d4e5f6")).unwrap();

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/hoass/mode/set", "bogus")
        .await;
    harness.message("ewpe-smart/a1b2c3d4e5f6/get", "").await;

    harness.wait("ewpe-smart/a1b2c3d4e5f6/status", 1).await;
    settle().await;
    assert_eq!(
        harness
            .bus
            .published_on("ewpe-smart/a1b2c3d4e5f6/status")
            .len(),
        1
    );
    assert_eq!(harness.fleet.status_of(&id("a1b2c3d4e5f6")).unwrap(), before);
}

#[tokio::test]
async fn test_unreachable_device_does_not_block_others() {
    let harness = Harness::connected(None).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    harness.fleet.insert(id("0011223344ff"), "Bedroom");
    harness.fleet.set_reachable(&id("a1b2c3d4e5f6"), false);

    harness.message("ewpe-smart/a1b2c3d4e5f6/get", "").await;
    harness.message("ewpe-smart/0011223344ff/get", "").await;
    harness
        .message("ewpe-smart/a1b2c3d4e5f6/hoass/mode/set", "cool")
        .await;

    harness.wait("ewpe-smart/0011223344ff/hoass/mode/status", 1).await;
    settle().await;
    let unreachable: Vec<_> = harness
        .bus
        .published()
        .into_iter()
        .filter(|m| m.topic.starts_with("ewpe-smart/a1b2c3d4e5f6/"))
        .collect();
    assert!(unreachable.is_empty(), "unexpected: {unreachable:?}");
}

#[tokio::test]
async fn test_own_publications_are_not_handled_as_commands() {
    let harness = Harness::connected(None).await;
    harness.bus.clear();

    harness
        .message("ewpe-smart/a1b2c3d4e5f6/status", r#"{"Pow": 1}"#)
        .await;
    harness.message("ewpe-smart/bridge/state", "online").await;
    harness.message("ewpe-smart/devices", "[]").await;
    settle().await;

    assert!(harness.bus.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bound_devices_are_polled() {
    let harness = Harness::connected(Some(Duration::from_millis(5000))).await;
    harness.fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    harness.wait("ewpe-smart/a1b2c3d4e5f6", 1).await;

    tokio::time::sleep(Duration::from_millis(10_001)).await;

    assert_eq!(
        harness
            .bus
            .published_on("ewpe-smart/a1b2c3d4e5f6/status")
            .len(),
        2
    );
}

#[tokio::test]
async fn test_run_returns_when_transport_stops() {
    let harness = Harness::connected(None).await;
    let Harness { events, handle, .. } = harness;

    drop(events);

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
