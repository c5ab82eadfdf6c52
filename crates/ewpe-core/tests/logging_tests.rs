//! Log output of failed commands, captured through a scoped subscriber.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ewpe_core::{Bridge, BusEvent, DeviceId, MemoryBus, SimulatedFleet};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

const BASE: &str = "ewpe-smart";

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.trim_start().starts_with("ERROR"))
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn id(value: &str) -> DeviceId {
    DeviceId::parse(value).unwrap()
}

async fn message(events: &mpsc::Sender<BusEvent>, topic: &str, payload: &str) {
    events
        .send(BusEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_get_logs_exactly_one_error() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let bus = Arc::new(MemoryBus::new());
    let (fleet, device_events) = SimulatedFleet::new();
    let fleet = Arc::new(fleet);
    let bridge = Bridge::new(BASE, None, bus.clone(), fleet.clone()).unwrap();
    let (events, bus_events) = mpsc::channel(16);
    let _bridge = tokio::spawn(bridge.run(bus_events, device_events));

    events.send(BusEvent::Connected).await.unwrap();
    fleet.insert(id("a1b2c3d4e5f6"), "Living room");
    fleet.insert(id("0011223344ff"), "Bedroom");
    bus.wait_for("ewpe-smart/0011223344ff", 1).await;
    fleet.set_reachable(&id("a1b2c3d4e5f6"), false);

    message(&events, "ewpe-smart/a1b2c3d4e5f6/get", "").await;
    // A healthy device served afterwards marks the end of the failing command.
    message(&events, "ewpe-smart/0011223344ff/get", "").await;

    tokio::time::timeout(Duration::from_secs(5), async {
        bus.wait_for("ewpe-smart/0011223344ff/hoass/temp/sensor", 1)
            .await;
        while logs.errors().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for the failed command to be logged");
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let errors = logs.errors();
    assert_eq!(errors.len(), 1, "error lines: {errors:#?}");
    assert!(errors[0].contains("DEVICE_UNREACHABLE"), "{}", errors[0]);
    assert!(errors[0].contains("a1b2c3d4e5f6"), "{}", errors[0]);

    let published_for_unreachable = bus
        .published()
        .into_iter()
        .filter(|m| m.topic.starts_with("ewpe-smart/a1b2c3d4e5f6/"))
        .count();
    assert_eq!(published_for_unreachable, 0);
}
