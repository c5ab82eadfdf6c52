//! Device-layer interface consumed by the bridge.
//!
//! Discovery, encryption and the device wire protocol live outside this crate.
//! The bridge only needs the capabilities described by [`DeviceLayer`] plus a
//! stream of [`DeviceEvent`]s announcing newly bound devices.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Native field mapping reported by a device, e.g. `{"Pow": 1, "Mod": 1, "SetTem": 22}`.
///
/// Also used for partial state-change requests sent to a device.
pub type RawStatus = serde_json::Map<String, serde_json::Value>;

static DEVICE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{12}$").expect("device id pattern is a valid regex")
});

/// Returns `true` if `value` is a 12 character hexadecimal device identifier.
#[must_use]
pub fn is_valid_device_id(value: &str) -> bool {
    DEVICE_ID_REGEX.is_match(value)
}

/// Identifier of a single device: 12 hexadecimal characters, case-insensitive.
///
/// Casing is kept as received so outbound topics mirror the inbound ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse a device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::InvalidId`] if `value` is not 12 hex characters.
    pub fn parse(value: impl Into<String>) -> Result<Self, DeviceError> {
        let value = value.into();
        if is_valid_device_id(&value) {
            Ok(Self(value))
        } else {
            Err(DeviceError::InvalidId { value })
        }
    }

    /// The identifier as it was received.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Identity and last known properties of a discovered device.
///
/// Published verbatim on `<base>/<id>` when the device is bound and as part of
/// the `<base>/devices` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device identifier (MAC derived).
    pub id: DeviceId,

    /// Human readable name reported by the device.
    #[serde(default)]
    pub name: String,

    /// Network address the device answered from.
    #[serde(default)]
    pub address: String,

    /// UDP port the device answered from.
    #[serde(default)]
    pub port: u16,

    /// Whether the device layer completed the bind handshake.
    #[serde(default)]
    pub bound: bool,

    /// Last known raw status.
    #[serde(default)]
    pub props: RawStatus,
}

impl DeviceDescriptor {
    /// Create a descriptor with no address information.
    #[must_use]
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: String::new(),
            port: 0,
            bound: false,
            props: RawStatus::new(),
        }
    }
}

/// Events emitted by the device layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A device was discovered and bound.
    Bound {
        /// Identifier of the bound device.
        device_id: DeviceId,
        /// Descriptor to announce on the bus.
        descriptor: DeviceDescriptor,
    },
}

/// Errors reported by the device layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device did not answer or the round trip failed.
    #[error("Device {device_id} is unreachable: {message}")]
    Unreachable {
        /// Device that failed to answer.
        device_id: DeviceId,
        /// Transport specific detail.
        message: String,
    },

    /// The device layer has never seen this identifier.
    #[error("Device {device_id} is not known to the device layer")]
    NotFound {
        /// Requested identifier.
        device_id: DeviceId,
    },

    /// The device answered but refused the state change.
    #[error("Device {device_id} rejected the state change: {message}")]
    Rejected {
        /// Device that refused the change.
        device_id: DeviceId,
        /// Reason reported by the device layer.
        message: String,
    },

    /// A string was not a valid 12 character hexadecimal identifier.
    #[error("Invalid device id '{value}'. Expected 12 hexadecimal characters.")]
    InvalidId {
        /// The rejected value.
        value: String,
    },
}

/// Result alias for device-layer calls.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Capabilities the bridge consumes from the device transport.
///
/// Every call may suspend on network I/O. Timeouts are the implementation's
/// responsibility; the bridge treats any error as terminal for the current
/// operation only.
#[async_trait]
pub trait DeviceLayer: Send + Sync {
    /// Fetch the current raw status of a device.
    async fn device_status(&self, device_id: &DeviceId) -> DeviceResult<RawStatus>;

    /// Apply a partial raw state change and return the post-change snapshot.
    async fn set_device_state(
        &self,
        device_id: &DeviceId,
        fragment: RawStatus,
    ) -> DeviceResult<RawStatus>;

    /// Descriptors of every device known to the layer.
    async fn devices(&self) -> Vec<DeviceDescriptor>;
}
