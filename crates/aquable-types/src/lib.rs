//! Platform-agnostic types for BLE aquarium dosers and lights.
//!
//! This crate provides the data types shared by the protocol codec, the
//! status decoders and the service layer in `aquable-core`.
//!
//! # Features
//!
//! - Device kinds, weekdays, clock times and message ids
//! - Decoded status records for dosers and lights
//! - The table of supported models and their channel layouts
//! - UUID constants for the UART GATT service
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use aquable_types::{DeviceKind, DeviceModel, MessageId};
//!
//! let model = DeviceModel::from_device_name("DYNWRGB001122334455").unwrap();
//! assert_eq!(model.kind, DeviceKind::Light);
//!
//! let id = MessageId::INITIAL.next();
//! assert_eq!((id.hi(), id.lo()), (0, 2));
//! ```

pub mod error;
pub mod hex;
pub mod models;
pub mod status;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use models::{DeviceModel, MODELS};
pub use status::{DeviceStatus, DoserStatus, HeadSnapshot, LightKeyframe, LightStatus};
pub use types::{ClockTime, DeviceKind, MessageId, RESERVED_BYTE, Weekday};
pub use crate::uuid as uuids;
