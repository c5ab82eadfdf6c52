//! Topic layout and inbound topic routing.
//!
//! All topics live under a configurable base prefix `B`:
//!
//! ```text
//! B/bridge/state                 <- "online" once connected
//! B/devices/list                 -> request the device listing
//! B/devices                      <- JSON array of device descriptors
//! B/<id>                         <- descriptor, once per bind
//! B/<id>/get                     -> request a status refresh
//! B/<id>/set                     -> raw JSON field mapping
//! B/<id>/status                  <- raw JSON status
//! B/<id>/hoass/mode/set          -> off|auto|cool|dry|fan_only|heat
//! B/<id>/hoass/mode/status       <- normalized mode
//! B/<id>/hoass/temp/set          -> integer setpoint
//! B/<id>/hoass/temp/status       <- setpoint, one decimal
//! B/<id>/hoass/temp/sensor       <- room temperature, one decimal
//! ```

use regex::Regex;
use tracing::trace;

use crate::device::{DeviceId, RawStatus};
use crate::error::{BridgeError, Result};
use crate::translator::{parse_leading_int, temperature_fragment, HvacMode};

const SUFFIX_GET: &str = "get";
const SUFFIX_SET: &str = "set";
const SUFFIX_STATUS: &str = "status";
const SUFFIX_MODE_SET: &str = "hoass/mode/set";
const SUFFIX_MODE_STATUS: &str = "hoass/mode/status";
const SUFFIX_TEMP_SET: &str = "hoass/temp/set";
const SUFFIX_TEMP_STATUS: &str = "hoass/temp/status";
const SUFFIX_TEMP_SENSOR: &str = "hoass/temp/sensor";

/// Builds outbound topic names under the base prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    /// Create a topic builder for `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The base prefix.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `B/bridge/state`
    #[must_use]
    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/state", self.base)
    }

    /// `B/#`
    #[must_use]
    pub fn subscription(&self) -> String {
        format!("{}/#", self.base)
    }

    /// `B/devices/list`
    #[must_use]
    pub fn devices_list(&self) -> String {
        format!("{}/devices/list", self.base)
    }

    /// `B/devices`
    #[must_use]
    pub fn devices(&self) -> String {
        format!("{}/devices", self.base)
    }

    /// `B/<id>`
    #[must_use]
    pub fn device(&self, device_id: &DeviceId) -> String {
        format!("{}/{}", self.base, device_id)
    }

    /// `B/<id>/status`
    #[must_use]
    pub fn status(&self, device_id: &DeviceId) -> String {
        self.device_topic(device_id, SUFFIX_STATUS)
    }

    /// `B/<id>/hoass/mode/status`
    #[must_use]
    pub fn mode_status(&self, device_id: &DeviceId) -> String {
        self.device_topic(device_id, SUFFIX_MODE_STATUS)
    }

    /// `B/<id>/hoass/temp/status`
    #[must_use]
    pub fn temperature_status(&self, device_id: &DeviceId) -> String {
        self.device_topic(device_id, SUFFIX_TEMP_STATUS)
    }

    /// `B/<id>/hoass/temp/sensor`
    #[must_use]
    pub fn temperature_sensor(&self, device_id: &DeviceId) -> String {
        self.device_topic(device_id, SUFFIX_TEMP_SENSOR)
    }

    fn device_topic(&self, device_id: &DeviceId, suffix: &str) -> String {
        format!("{}/{}/{}", self.base, device_id, suffix)
    }
}

/// What an inbound message asks the bridge to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Publish the device listing.
    List,

    /// Refresh and publish the status of a device.
    Get(DeviceId),

    /// Apply a raw field mapping to a device.
    Set {
        /// Target device.
        device_id: DeviceId,
        /// Fields to apply.
        fragment: RawStatus,
    },

    /// Change the target temperature.
    SetTemperature {
        /// Target device.
        device_id: DeviceId,
        /// New setpoint.
        value: i64,
    },

    /// Change the operating mode.
    SetMode {
        /// Target device.
        device_id: DeviceId,
        /// Requested mode.
        mode: HvacMode,
    },
}

impl Action {
    /// Device the action targets, if any.
    #[must_use]
    pub const fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::List => None,
            Self::Get(device_id)
            | Self::Set { device_id, .. }
            | Self::SetTemperature { device_id, .. }
            | Self::SetMode { device_id, .. } => Some(device_id),
        }
    }

    /// Raw fragment to send to the device for the state-changing actions.
    #[must_use]
    pub fn fragment(&self) -> Option<RawStatus> {
        match self {
            Self::List | Self::Get(_) => None,
            Self::Set { fragment, .. } => Some(fragment.clone()),
            Self::SetTemperature { value, .. } => Some(temperature_fragment(*value)),
            Self::SetMode { mode, .. } => Some(mode.to_fragment()),
        }
    }
}

/// Matches inbound topics against the bridge grammar.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    list_topic: String,
    device_pattern: Regex,
}

impl TopicRouter {
    /// Build a router for topics under `base`.
    ///
    /// Only the device identifier matches case-insensitively; the base prefix
    /// and the suffix must match exactly.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] if the device pattern cannot be compiled.
    pub fn new(base: &str) -> Result<Self> {
        let pattern = format!(r"^{}/((?i:[0-9a-f]{{12}}))/(.*)$", regex::escape(base));
        let device_pattern = Regex::new(&pattern)
            .map_err(|e| BridgeError::Internal(format!("invalid topic pattern: {e}")))?;

        Ok(Self {
            list_topic: Topics::new(base).devices_list(),
            device_pattern,
        })
    }

    /// Resolve an inbound message into an [`Action`].
    ///
    /// Returns `Ok(None)` for topics outside the grammar, including the
    /// bridge's own outbound topics.
    ///
    /// # Errors
    ///
    /// Returns a payload error ([`BridgeError::is_payload_error`]) when a
    /// command topic carries a payload that cannot be interpreted.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<Option<Action>> {
        if topic == self.list_topic {
            return Ok(Some(Action::List));
        }

        let Some(captures) = self.device_pattern.captures(topic) else {
            trace!("Ignoring topic {}", topic);
            return Ok(None);
        };
        let device_id = DeviceId::parse(&captures[1])?;

        let action = match &captures[2] {
            SUFFIX_GET => Action::Get(device_id),
            SUFFIX_SET => Action::Set {
                device_id,
                fragment: parse_fragment(payload)?,
            },
            SUFFIX_TEMP_SET => {
                let text = String::from_utf8_lossy(payload);
                let value = parse_leading_int(&text).ok_or_else(|| {
                    BridgeError::MalformedPayload(format!("unexpected temperature '{text}'"))
                })?;
                Action::SetTemperature { device_id, value }
            }
            SUFFIX_MODE_SET => Action::SetMode {
                device_id,
                mode: String::from_utf8_lossy(payload).parse()?,
            },
            other => {
                trace!("Ignoring suffix '{}' for device {}", other, device_id);
                return Ok(None);
            }
        };

        Ok(Some(action))
    }
}

fn parse_fragment(payload: &[u8]) -> Result<RawStatus> {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(BridgeError::MalformedPayload(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(BridgeError::MalformedPayload(e.to_string())),
    }
}
