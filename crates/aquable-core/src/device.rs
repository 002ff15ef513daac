//! BLE transport over the platform Bluetooth stack.
//!
//! A [`BleTransport`] owns one peripheral. Connecting discovers services,
//! caches characteristics, subscribes to the notify characteristic and
//! spawns a task that forwards notification payloads to the handle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use aquable_types::uuids::{UART_RX, UART_TX};

use crate::error::{Error, Result};
use crate::traits::{NotificationHandler, Transport};

/// Default timeout for BLE write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for BLE link operations.
///
/// ```no_run
/// use std::time::Duration;
/// use aquable_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default().connection_timeout(Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connection_timeout: Duration,
    pub write_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// A UART link to one peripheral.
pub struct BleTransport {
    /// Kept alive for the lifetime of the peripheral.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    address: String,
    characteristics_cache: RwLock<HashMap<Uuid, Characteristic>>,
    notification_handles: Mutex<Vec<JoinHandle<()>>>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    pub fn new(
        adapter: Adapter,
        peripheral: Peripheral,
        address: String,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            adapter,
            peripheral,
            address,
            characteristics_cache: RwLock::new(HashMap::new()),
            notification_handles: Mutex::new(Vec::new()),
            config,
        }
    }

    async fn discover(&self) -> Result<()> {
        timeout(self.config.discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());

        let mut cache = self.characteristics_cache.write().await;
        cache.clear();
        for service in &services {
            for char in &service.characteristics {
                cache.insert(char.uuid, char.clone());
            }
        }
        debug!("Cached {} characteristics", cache.len());
        Ok(())
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = self.characteristics_cache.read().await;
        cache.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }

    async fn abort_notification_tasks(&self) {
        let mut handles = self.notification_handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    async fn subscribe(&self, on_notification: NotificationHandler) -> Result<()> {
        let characteristic = self.find_characteristic(UART_TX).await?;
        self.peripheral.subscribe(&characteristic).await?;

        let mut stream = self.peripheral.notifications().await?;
        let handle = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(notification) = stream.next().await {
                if notification.uuid == UART_TX {
                    on_notification(&notification.value);
                }
            }
        });
        self.notification_handles.lock().await.push(handle);
        Ok(())
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address))]
    async fn connect(&self, on_notification: NotificationHandler) -> Result<()> {
        self.abort_notification_tasks().await;

        if !self.is_connected().await {
            info!("Connecting to device...");
            timeout(self.config.connection_timeout, self.peripheral.connect())
                .await
                .map_err(|_| Error::timeout("connect to device", self.config.connection_timeout))??;
        }
        self.discover().await?;
        self.subscribe(on_notification).await?;
        info!("Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_notification_tasks().await;
        if self.is_connected().await {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        let characteristic = self.find_characteristic(UART_RX).await?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(&characteristic, frame, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| Error::timeout("write frame", self.config.write_timeout))?
        .map_err(|e| Error::WriteFailed {
            uuid: UART_RX.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Dropping a transport only stops its notification tasks. Other transports
/// may share the peripheral, so the link is closed solely through
/// [`Transport::disconnect`].
impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Ok(mut handles) = self.notification_handles.try_lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }
}
