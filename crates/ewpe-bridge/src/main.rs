//! # ewpe-bridge
//!
//! Exposes EWPE climate devices on an MQTT broker.
//!
//! This binary provides:
//! - Raw device status and commands under `<base>/<id>/...`
//! - Home Assistant compatible mode and temperature topics
//! - Periodic status polling of every bound device
//!
//! ## Running
//!
//! ```bash
//! # Against a local broker, with two simulated units
//! MQTT_SERVER=mqtt://127.0.0.1 SIMULATED_DEVICES=a1b2c3d4e5f6,0011223344ff \
//!     cargo run --package ewpe-bridge
//! ```
//!
//! All settings are read from the environment and, optionally, from the TOML
//! file named by `EWPE_CONFIG` (default `ewpe-bridge.toml`).

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::time::Duration;

use ewpe_bridge::{logging, mqtt};
use ewpe_core::{Bridge, BridgeConfig, MessageBus, SimulatedFleet, STATE_OFFLINE};
use tracing::{info, warn};

/// How long to wait for the DISCONNECT to be flushed on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::load()?;
    logging::init(&config)?;

    info!("Starting ewpe-bridge");
    info!("Device network {}", config.network);

    let (fleet, device_events) = SimulatedFleet::new();
    let fleet = Arc::new(fleet);
    let simulated = config.simulated_device_ids();
    if simulated.is_empty() {
        warn!("SIMULATED_DEVICES is empty and no device transport is built in, serving no devices");
    }
    for device_id in simulated {
        let name = format!("Simulated {device_id}");
        fleet.insert(device_id, name);
    }

    let connection = mqtt::connect(&config)?;
    let bus = connection.bus.clone();
    let bridge = Bridge::new(
        &config.mqtt_base_topic,
        config.poll_interval(),
        bus.clone(),
        fleet,
    )?;
    let state_topic = bridge.topics().bridge_state();

    tokio::select! {
        result = bridge.run(connection.events, device_events) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
            if let Err(e) = bus.publish(&state_topic, STATE_OFFLINE.as_bytes().to_vec()).await {
                warn!("Failed to publish bridge state: {}", e);
            }
            if let Err(e) = bus.disconnect().await {
                warn!("Failed to disconnect cleanly: {}", e);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, connection.pump).await.is_err() {
                warn!("MQTT event loop did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }
    }

    Ok(())
}
