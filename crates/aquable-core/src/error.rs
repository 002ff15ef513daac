//! Error types for aquable-core.
//!
//! Every error maps onto one [`ErrorKind`], the classification carried by
//! command records.
//!
//! | Error | Kind | Retried by transport |
//! |-------|------|----------------------|
//! | [`Error::Validation`], [`Error::Parse`] | `validation_error` | no |
//! | [`Error::DeviceNotFound`] | `not_found` | by the registry during resolution |
//! | [`Error::WrongType`] | `wrong_type` | no |
//! | [`Error::Bluetooth`], [`Error::NotConnected`], [`Error::ConnectionFailed`], [`Error::WriteFailed`], [`Error::CharacteristicNotFound`], [`Error::Io`] | `not_reachable` | yes (except missing characteristics) |
//! | [`Error::Timeout`] | `timeout` | yes |
//! | [`Error::Storage`], [`Error::Cancelled`], [`Error::Internal`] | `internal_error` | no |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use aquable_types::{DeviceKind, ParseError};

/// Errors that can occur when driving aquarium devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or resolution.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The resolved device is not of the expected kind.
    #[error("Device {address} is a {actual}, expected a {expected}")]
    WrongType {
        address: String,
        expected: DeviceKind,
        actual: DeviceKind,
    },

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Arguments rejected before any device I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A protocol value could not be built or decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The controller shut down while the operation was running.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device address that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// An invariant the code relies on did not hold.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured reasons for connection failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with the specified address was not seen.
    NotFound { address: String },
    /// Resolution gave up after several attempts.
    RetriesExhausted { address: String, attempts: u32 },
    /// The device advertises a model this crate does not drive.
    Unsupported { address: String, name: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { address } => write!(f, "device '{}' not found", address),
            Self::RetriesExhausted { address, attempts } => {
                write!(f, "device '{}' not found after {} attempts", address, attempts)
            }
            Self::Unsupported { address, name } => {
                write!(f, "device '{}' ({}) is not a supported model", address, name)
            }
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

/// Outcome classification reported on failed command records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    WrongType,
    NotReachable,
    Timeout,
    InternalError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::WrongType => "wrong_type",
            ErrorKind::NotReachable => "not_reachable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a device not found error for a specific address.
    pub fn device_not_found(address: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            address: address.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Classify this error for command records.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Parse(_) => ErrorKind::ValidationError,
            Error::DeviceNotFound(_) => ErrorKind::NotFound,
            Error::WrongType { .. } => ErrorKind::WrongType,
            Error::Bluetooth(_)
            | Error::NotConnected
            | Error::CharacteristicNotFound { .. }
            | Error::ConnectionFailed { .. }
            | Error::WriteFailed { .. }
            | Error::Io(_) => ErrorKind::NotReachable,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Storage(_) | Error::Cancelled | Error::Internal(_) => ErrorKind::InternalError,
        }
    }
}

/// Result type alias using aquable-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
