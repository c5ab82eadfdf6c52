//! # ewpe-bridge
//!
//! Process wiring for the EWPE MQTT bridge: logging setup and the `rumqttc`
//! transport behind [`ewpe_core::MessageBus`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod logging;
pub mod mqtt;
