//! Core BLE library for aquarium dosing pumps and LED lights.
//!
//! This crate speaks the vendor UART protocol used by multi-head dosing
//! pumps and multi-channel LED lights, and wraps it in a small service core:
//!
//! - **Protocol codec**: frame building, checksums, message-id sequencing
//! - **Status decoding**: doser head snapshots, lifetime totals, light keyframes
//! - **Device handles**: lazy connection, per-frame retry, status capture
//! - **Connection registry**: one live handle per address, resolution retries
//! - **Command pipeline**: validation, per-device locking, timeouts, outcomes
//! - **Background workers**: auto-discovery and auto-reconnect at startup
//!
//! # Supported Devices
//!
//! | Kind | Models |
//! |------|--------|
//! | Doser | Dosing Pump (4 heads) |
//! | Light | WRGB II, C II, Commander 1 and the other lights in [`MODELS`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aquable_core::{AquaController, CommandRequest, ControllerSettings, MemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller =
//!         AquaController::with_ble(Arc::new(MemoryStore::new()), ControllerSettings::default());
//!
//!     for device in controller.scan(None).await? {
//!         println!("{} {} ({})", device.address, device.name, device.model_name);
//!     }
//!
//!     let record = controller
//!         .execute_command(
//!             "AA:BB:CC:DD:EE:FF",
//!             CommandRequest::new("set_brightness").args(json!({"brightness": 60})),
//!         )
//!         .await;
//!     println!("{:?}", record.status);
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod commands;
pub mod controller;
pub mod decoder;
pub mod device;
pub mod doser;
pub mod error;
pub mod events;
pub mod handle;
pub mod history;
pub mod light;
pub mod mock;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod session;
pub mod storage;
pub mod traits;
pub mod util;
pub mod workers;

pub use aquable_types::types;
pub use aquable_types::uuid as uuids;

// Core exports
pub use controller::{AquaController, ControllerSettings};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, ErrorKind, Result};
pub use handle::{Device, HandleConfig};
pub use traits::{Connector, DeviceHandle, ResolvedDevice, Transport};

/// Type alias for a shared device handle.
pub type SharedDevice = std::sync::Arc<Device>;

pub use cache::{CachedStatus, ChannelInfo, StatusCache};
pub use device::{BleTransport, ConnectionConfig};
pub use doser::{DoseSchedule, Doser};
pub use events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher, EventReceiver, EventSender};
pub use history::CommandHistory;
pub use light::{AutoBrightness, AutoSetting, Brightness, Light};
pub use mock::{MockConnector, MockTransport, RecordedFrame};
pub use pipeline::{Action, CommandRecord, CommandRequest, CommandStatus, Pipeline, PipelineSettings};
pub use registry::Registry;
pub use retry::{RetryConfig, with_retry};
pub use scan::{BleConnector, DiscoveredDevice};
pub use session::{MessageIdSession, SessionInfo, SessionLimits};
pub use storage::{DeviceConfig, DeviceProfile, DeviceStore, MemoryStore, StoredDevice};
pub use workers::{WorkerPhase, WorkerSettings, Workers};

// Re-export from aquable-types
pub use aquable_types::{
    ClockTime, DeviceKind, DeviceModel, DeviceStatus, DoserStatus, LightStatus, MODELS, MessageId,
    Weekday,
};
