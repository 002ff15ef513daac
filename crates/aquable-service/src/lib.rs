//! Background controller and CLI for BLE aquarium dosers and lights.
//!
//! This crate wires [`aquable_core::AquaController`] to:
//! - A TOML configuration file with `AQUA_*` environment overrides
//! - A JSON file that stores device configurations and last statuses
//! - The `aquable` command-line tool
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/aquable/config.toml`:
//!
//! ```toml
//! [ble]
//! status_wait_secs = 1.5
//! command_timeout_secs = 10.0
//! auto_reconnect = true
//! auto_discover = false
//!
//! [storage]
//! data_dir = "~/.local/share/aquable"
//!
//! [logging]
//! level = "info"
//! ```

pub mod config;
pub mod store;

pub use config::{BleConfig, Config, ConfigError, LoggingConfig, StorageConfig, ValidationError};
pub use store::JsonFileStore;
