//! Error types for data parsing in aquable-types.

use thiserror::Error;

/// Errors that can occur when parsing or constructing protocol values.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in aquable-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Not enough bytes to decode the requested structure.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes { expected: usize, actual: usize },

    /// A byte equal to the reserved framing sentinel (0x5A) where it is not allowed.
    #[error("Reserved byte 0x5A is not allowed in {0}")]
    ReservedByte(&'static str),

    /// A value outside the range accepted by the protocol.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// An advertised name that does not map to a supported model.
    #[error("Unknown device model: {0}")]
    UnknownDevice(String),
}

/// Result type alias using aquable-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
