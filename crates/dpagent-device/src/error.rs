//! Device status codes and error handling.
//!
//! Status codes mirror the device's binary API return values; anything
//! non-zero is surfaced as a [`DeviceError`] so callers handle failures
//! through `Result` instead of inspecting raw integers.

use thiserror::Error;

/// Index assigned by the device when an object is created.
///
/// Unique within one object type while the object exists, but reused by the
/// device after deletion. Zero is a legitimate index; presence is always
/// expressed separately (`Option`/`bool`), never as an index-zero sentinel.
pub type DeviceIndex = u32;

/// Return codes of the device's binary API.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Ok = 0,
    Failure = -1,
    InvalidParameter = -2,
    ItemAlreadyExists = -3,
    ItemNotFound = -4,
    ResourceInUse = -5,
    TableFull = -6,
    UnsupportedVersion = -7,
}

impl DeviceStatus {
    /// Creates a status from a raw return value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => DeviceStatus::Ok,
            -2 => DeviceStatus::InvalidParameter,
            -3 => DeviceStatus::ItemAlreadyExists,
            -4 => DeviceStatus::ItemNotFound,
            -5 => DeviceStatus::ResourceInUse,
            -6 => DeviceStatus::TableFull,
            -7 => DeviceStatus::UnsupportedVersion,
            _ => DeviceStatus::Failure,
        }
    }

    /// Returns true if the status indicates success.
    pub fn is_ok(&self) -> bool {
        *self == DeviceStatus::Ok
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceStatus::Ok => "ok",
            DeviceStatus::Failure => "failure",
            DeviceStatus::InvalidParameter => "invalid parameter",
            DeviceStatus::ItemAlreadyExists => "item already exists",
            DeviceStatus::ItemNotFound => "item not found",
            DeviceStatus::ResourceInUse => "resource in use",
            DeviceStatus::TableFull => "table full",
            DeviceStatus::UnsupportedVersion => "unsupported version",
        };
        write!(f, "{} ({})", name, *self as i32)
    }
}

/// Error returned by a device session call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// The device rejected the call with a non-zero status.
    #[error("device call {call} failed: {status}")]
    Call {
        call: &'static str,
        status: DeviceStatus,
    },
    /// The transport to the device process failed.
    #[error("device transport error: {0}")]
    Transport(String),
    /// The device's API version does not match what this agent expects.
    #[error("incompatible device API: {0}")]
    Incompatible(String),
}

impl DeviceError {
    /// Creates a call-level error.
    pub fn call(call: &'static str, status: DeviceStatus) -> Self {
        DeviceError::Call { call, status }
    }
}

/// Result type for device session calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(DeviceStatus::from_raw(0), DeviceStatus::Ok);
        assert_eq!(DeviceStatus::from_raw(-4), DeviceStatus::ItemNotFound);
        assert_eq!(DeviceStatus::from_raw(-99), DeviceStatus::Failure);
        assert!(DeviceStatus::Ok.is_ok());
        assert!(!DeviceStatus::TableFull.is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::call("bridge.create", DeviceStatus::TableFull);
        assert_eq!(
            err.to_string(),
            "device call bridge.create failed: table full (-6)"
        );
    }
}
