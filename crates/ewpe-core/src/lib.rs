//! # ewpe-core
//!
//! Message routing and protocol translation for exposing EWPE climate devices
//! on an MQTT bus.
//!
//! This crate provides:
//! - Translation between Home Assistant climate commands and native device fields
//! - Routing of inbound topics to device actions
//! - Fan-out of device status to raw and Home Assistant topics
//! - Per-device status polling
//! - The bridge controller tying bus events and device events together
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`translator`] - Mode table and temperature formatting
//! - [`topics`] - Topic layout and inbound topic routing
//! - [`publisher`] - Status fan-out for a single device
//! - [`scheduler`] - Poll timers started by device-bound events
//! - [`bridge`] - Connection lifecycle and dispatch
//! - [`device`] - Device-layer interface and identifiers
//! - [`bus`] - Message bus interface
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate
//!
//! The device transport and the MQTT client are external collaborators
//! reached through [`DeviceLayer`] and [`MessageBus`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bridge;
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod publisher;
pub mod scheduler;
#[cfg(feature = "in-memory")]
pub mod simulated;
pub mod topics;
pub mod translator;

// Re-export primary types for convenience
pub use bridge::{Bridge, ConnectionState, STATE_OFFLINE, STATE_ONLINE};
#[cfg(feature = "in-memory")]
pub use bus::{MemoryBus, PublishedMessage};
pub use bus::{BusError, BusEvent, BusResult, MessageBus};
pub use config::{validate_base_topic, BridgeConfig, ConfigError, ConfigResult};
pub use device::{
    is_valid_device_id, DeviceDescriptor, DeviceError, DeviceEvent, DeviceId, DeviceLayer,
    DeviceResult, RawStatus,
};
pub use error::{BridgeError, Result};
pub use publisher::StatusPublisher;
pub use scheduler::PollScheduler;
#[cfg(feature = "in-memory")]
pub use simulated::SimulatedFleet;
pub use topics::{Action, TopicRouter, Topics};
pub use translator::{format_fixed, parse_leading_int, temperature_fragment, HvacMode, UnknownMode};
