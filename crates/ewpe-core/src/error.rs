//! Unified error types for the bridge core.
//!
//! Each collaborator has its own error type ([`DeviceError`](crate::device::DeviceError),
//! [`BusError`](crate::bus::BusError)). Both convert into [`BridgeError`], which
//! is what the routing, publishing and scheduling code returns.
//!
//! Configuration errors stay a separate [`ConfigError`](crate::config::ConfigError):
//! they only occur before the bridge starts.
//!
//! Nothing here is ever published on the bus. Callers log the error and move
//! on to the next message or poll tick.

use thiserror::Error;

use crate::device::DeviceId;

/// The unified error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // =========================================================================
    // DEVICE ERRORS
    // =========================================================================
    /// The device layer could not complete a round trip.
    #[error("Device {device_id} is unreachable: {message}")]
    DeviceUnreachable {
        /// Device that failed to answer.
        device_id: DeviceId,
        /// Detail from the device layer.
        message: String,
    },

    /// The device layer does not know the device.
    #[error("Device not found: '{0}'. It may not have been discovered yet.")]
    DeviceNotFound(DeviceId),

    /// The device refused a state change.
    #[error("Device {device_id} rejected the command: {message}")]
    DeviceRejected {
        /// Device that refused.
        device_id: DeviceId,
        /// Detail from the device layer.
        message: String,
    },

    /// A string was not a valid device identifier.
    #[error("Invalid device id: '{0}'")]
    InvalidDeviceId(String),

    // =========================================================================
    // PAYLOAD ERRORS
    // =========================================================================
    /// A mode command named none of the known modes.
    #[error(transparent)]
    UnknownMode(#[from] crate::translator::UnknownMode),

    /// A command payload could not be interpreted.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    // =========================================================================
    // BUS ERRORS
    // =========================================================================
    /// Publishing or subscribing failed.
    #[error("Message bus error: {0}")]
    Bus(String),

    // =========================================================================
    // INTERNAL ERRORS
    // =========================================================================
    /// A value could not be serialized for publishing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invariant inside the bridge was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized [`Result`] type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Returns `true` if an inbound payload was the problem.
    #[inline]
    #[must_use]
    pub const fn is_payload_error(&self) -> bool {
        matches!(self, Self::UnknownMode(_) | Self::MalformedPayload(_))
    }

    /// Returns `true` if retrying later (next poll tick, next message) may succeed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnreachable { .. } | Self::DeviceNotFound(_) | Self::Bus(_)
        )
    }

    /// Machine-readable error code for structured logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DeviceUnreachable { .. } => "DEVICE_UNREACHABLE",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::DeviceRejected { .. } => "DEVICE_REJECTED",
            Self::InvalidDeviceId(_) => "INVALID_DEVICE_ID",
            Self::UnknownMode(_) => "UNKNOWN_MODE",
            Self::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Self::Bus(_) => "BUS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::device::DeviceError> for BridgeError {
    fn from(err: crate::device::DeviceError) -> Self {
        use crate::device::DeviceError;
        match err {
            DeviceError::Unreachable { device_id, message } => {
                Self::DeviceUnreachable { device_id, message }
            }
            DeviceError::NotFound { device_id } => Self::DeviceNotFound(device_id),
            DeviceError::Rejected { device_id, message } => {
                Self::DeviceRejected { device_id, message }
            }
            DeviceError::InvalidId { value } => Self::InvalidDeviceId(value),
        }
    }
}

impl From<crate::bus::BusError> for BridgeError {
    fn from(err: crate::bus::BusError) -> Self {
        Self::Bus(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
