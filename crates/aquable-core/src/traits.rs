//! Trait abstractions for the radio transport and device handles.
//!
//! [`Transport`] hides the BLE stack so that handles, the registry and the
//! pipeline can be exercised against [`crate::mock::MockTransport`].
//! [`DeviceHandle`] is the contract shared by dosers and lights.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use aquable_types::{DeviceKind, DeviceModel, DeviceStatus};

use crate::error::Result;
use crate::scan::DiscoveredDevice;

/// Callback invoked with every notification payload.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A UART-style radio link to one device.
///
/// # Example
///
/// ```ignore
/// use aquable_core::{Transport, Result};
///
/// async fn ping<T: Transport>(transport: &T, frame: &[u8]) -> Result<()> {
///     transport.write(frame).await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    // --- Connection Management ---

    /// Check if the link is up.
    async fn is_connected(&self) -> bool;

    /// Bring the link up and route notifications to `on_notification`.
    ///
    /// Calling this while connected replaces the handler.
    async fn connect(&self, on_notification: NotificationHandler) -> Result<()>;

    /// Tear the link down. Disconnecting an idle link is not an error.
    async fn disconnect(&self) -> Result<()>;

    // --- Identity ---

    /// Device address (MAC on Linux/Windows, peripheral id on macOS).
    fn address(&self) -> &str;

    // --- Data ---

    /// Write one command frame to the command characteristic.
    async fn write(&self, frame: &[u8]) -> Result<()>;
}

/// Operations common to every device kind.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    // --- Identity ---

    fn kind(&self) -> DeviceKind;

    fn address(&self) -> &str;

    /// Advertised name.
    fn name(&self) -> &str;

    fn model(&self) -> &'static DeviceModel;

    // --- Status ---

    /// Ask the device to notify its status.
    async fn request_status(&self) -> Result<()>;

    /// Feed one notification payload through the decoder.
    fn handle_notification(&self, data: &[u8]);

    /// The most recent decoded status.
    fn last_status(&self) -> Option<DeviceStatus>;

    /// Wait for the next decoded status, returning the latest one on timeout.
    async fn wait_for_status(&self, timeout: Duration) -> Option<DeviceStatus>;

    // --- Connection Management ---

    async fn disconnect(&self) -> Result<()>;
}

/// A device located by a [`Connector`], ready to be wrapped in a handle.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    /// Advertised name.
    pub name: String,
    pub address: String,
    pub transport: Arc<dyn Transport>,
}

/// Finds devices on the radio and hands out transports for them.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Locate one device by address.
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice>;

    /// Scan for supported devices for up to `timeout`.
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;
}
