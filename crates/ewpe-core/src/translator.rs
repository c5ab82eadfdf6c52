//! Translation between Home Assistant style commands and native device fields.
//!
//! Devices report and accept state as a raw field mapping (`Pow`, `Mod`,
//! `SetTem`, `TemSen`, ...). Home Assistant's MQTT climate integration speaks in
//! mode names and plain temperatures. This module owns the mapping in both
//! directions.
//!
//! The mode table is not symmetric: writing `fan_only`/`heat` sends `Mod` 3/4
//! while reading treats `Mod` 4/5 as `fan_only`/`heat`. Both directions are
//! kept exactly as devices have been observed to behave.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};
use thiserror::Error;

use crate::device::RawStatus;

/// Power flag field.
pub const FIELD_POWER: &str = "Pow";
/// Operating mode field.
pub const FIELD_MODE: &str = "Mod";
/// Target temperature field.
pub const FIELD_SET_TEMPERATURE: &str = "SetTem";
/// Sensed room temperature field.
pub const FIELD_SENSOR_TEMPERATURE: &str = "TemSen";

/// `Mod` codes written when encoding a mode.
mod encode_codes {
    pub const AUTO: i64 = 0;
    pub const COOL: i64 = 1;
    pub const DRY: i64 = 2;
    pub const FAN_ONLY: i64 = 3;
    pub const HEAT: i64 = 4;
}

/// `Mod` codes recognised when decoding a status.
mod decode_codes {
    pub const AUTO: i64 = 0;
    pub const COOL: i64 = 1;
    pub const DRY: i64 = 2;
    pub const FAN_ONLY: i64 = 4;
    pub const HEAT: i64 = 5;
}

/// A mode name was not one of the six normalized modes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown mode '{0}'. Expected one of: off, auto, cool, dry, fan_only, heat.")]
pub struct UnknownMode(pub String);

/// Normalized climate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HvacMode {
    /// Powered off.
    Off,
    /// Automatic.
    Auto,
    /// Cooling.
    Cool,
    /// Dehumidifying.
    Dry,
    /// Fan only.
    FanOnly,
    /// Heating.
    Heat,
}

impl HvacMode {
    /// Every mode, in table order.
    pub const ALL: [Self; 6] = [
        Self::Off,
        Self::Auto,
        Self::Cool,
        Self::Dry,
        Self::FanOnly,
        Self::Heat,
    ];

    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Cool => "cool",
            Self::Dry => "dry",
            Self::FanOnly => "fan_only",
            Self::Heat => "heat",
        }
    }

    /// Raw fragment that switches a device into this mode.
    #[must_use]
    pub fn to_fragment(self) -> RawStatus {
        let mode_code = match self {
            Self::Off => return fragment(json!({ FIELD_POWER: 0 })),
            Self::Auto => encode_codes::AUTO,
            Self::Cool => encode_codes::COOL,
            Self::Dry => encode_codes::DRY,
            Self::FanOnly => encode_codes::FAN_ONLY,
            Self::Heat => encode_codes::HEAT,
        };
        fragment(json!({ FIELD_POWER: 1, FIELD_MODE: mode_code }))
    }

    /// Decode the mode from a raw status.
    ///
    /// A zero power flag means [`HvacMode::Off`] whatever `Mod` says. Returns
    /// `None` when the device is on and `Mod` is missing or has no decode entry.
    #[must_use]
    pub fn from_status(status: &RawStatus) -> Option<Self> {
        if status.get(FIELD_POWER).and_then(as_integer) == Some(0) {
            return Some(Self::Off);
        }

        match status.get(FIELD_MODE).and_then(as_integer)? {
            decode_codes::AUTO => Some(Self::Auto),
            decode_codes::COOL => Some(Self::Cool),
            decode_codes::DRY => Some(Self::Dry),
            decode_codes::FAN_ONLY => Some(Self::FanOnly),
            decode_codes::HEAT => Some(Self::Heat),
            _ => None,
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = UnknownMode;

    /// Exact, case-sensitive match on the wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// Raw fragment setting the target temperature.
#[must_use]
pub fn temperature_fragment(value: i64) -> RawStatus {
    fragment(json!({ FIELD_SET_TEMPERATURE: value }))
}

/// Format a numeric field with exactly one decimal place.
///
/// Integral values (what devices report) render as `"22.0"`. Fractional
/// values are rounded to one decimal. Non-numeric values yield `None`.
#[must_use]
pub fn format_fixed(value: &Value) -> Option<String> {
    if let Some(integer) = value.as_i64() {
        return Some(format!("{integer}.0"));
    }
    value.as_f64().map(|float| format!("{float:.1}"))
}

/// Parse the leading base-10 integer of a payload.
///
/// Leading whitespace and a sign are accepted and parsing stops at the first
/// non-digit, so `"22.0"` yields `22`. Returns `None` when there are no digits.
#[must_use]
pub fn parse_leading_int(input: &str) -> Option<i64> {
    let trimmed = input.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }

    let magnitude: i64 = rest[..digits_end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn fragment(value: Value) -> RawStatus {
    match value {
        Value::Object(map) => map,
        _ => RawStatus::new(),
    }
}
