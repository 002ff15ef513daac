//! Device discovery and resolution.
//!
//! [`BleConnector`] is the [`Connector`] used in production: it scans with
//! the first Bluetooth adapter, keeps only advertised names that match a
//! supported model and wraps resolved peripherals in a [`BleTransport`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, info};

use aquable_types::{DeviceKind, DeviceModel};

use crate::device::{BleTransport, ConnectionConfig};
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::{Connector, ResolvedDevice};
use crate::util::{create_identifier, normalize_address};

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// A supported device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Advertised name.
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub kind: DeviceKind,
    pub model_name: &'static str,
}

impl DiscoveredDevice {
    pub fn new(
        name: impl Into<String>,
        address: &str,
        rssi: Option<i16>,
        model: &'static DeviceModel,
    ) -> Self {
        Self {
            name: name.into(),
            address: normalize_address(address),
            rssi,
            kind: model.kind,
            model_name: model.name,
        }
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// A peripheral the adapter has seen, with its resolved address.
struct KnownPeripheral {
    peripheral: Peripheral,
    address: String,
    name: Option<String>,
    rssi: Option<i16>,
}

/// Resolves devices through the platform Bluetooth stack.
#[derive(Debug, Default)]
pub struct BleConnector {
    adapter: OnceCell<Adapter>,
    scan_timeout: Option<Duration>,
    connection: ConnectionConfig,
}

impl BleConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan duration used when an address is not already known.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter.get_or_try_init(get_adapter).await
    }

    async fn scan(&self, adapter: &Adapter, duration: Duration) -> Result<()> {
        info!("Starting BLE scan for {} seconds...", duration.as_secs());
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(duration).await;
        adapter.stop_scan().await?;
        Ok(())
    }

    async fn peripherals(&self, adapter: &Adapter) -> Result<Vec<KnownPeripheral>> {
        let mut found = Vec::new();
        for peripheral in adapter.peripherals().await? {
            match peripheral.properties().await {
                Ok(Some(props)) => {
                    let address = create_identifier(&props.address.to_string(), &peripheral.id());
                    found.push(KnownPeripheral {
                        peripheral,
                        address,
                        name: props.local_name,
                        rssi: props.rssi,
                    });
                }
                Ok(None) => {}
                Err(e) => debug!("Error reading peripheral properties: {}", e),
            }
        }
        Ok(found)
    }

    async fn find(&self, adapter: &Adapter, address: &str) -> Result<Option<KnownPeripheral>> {
        Ok(self
            .peripherals(adapter)
            .await?
            .into_iter()
            .find(|known| known.address == address))
    }
}

#[async_trait]
impl Connector for BleConnector {
    #[tracing::instrument(level = "info", skip(self))]
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice> {
        let address = normalize_address(address);
        let adapter = self.adapter().await?;

        let found = match self.find(adapter, &address).await? {
            Some(found) => {
                debug!("Found device in cache (no scan needed)");
                Some(found)
            }
            None => {
                self.scan(adapter, self.scan_timeout.unwrap_or(DEFAULT_SCAN_TIMEOUT))
                    .await?;
                self.find(adapter, &address).await?
            }
        };
        let Some(KnownPeripheral { peripheral, name, .. }) = found else {
            return Err(Error::device_not_found(address));
        };

        let name = name.unwrap_or_default();
        if DeviceModel::from_device_name(&name).is_none() {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::Unsupported {
                address,
                name,
            }));
        }

        let transport = BleTransport::new(
            adapter.clone(),
            peripheral,
            address.clone(),
            self.connection.clone(),
        );
        Ok(ResolvedDevice {
            name,
            address,
            transport: Arc::new(transport),
        })
    }

    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;
        self.scan(adapter, timeout).await?;

        let mut discovered: Vec<DiscoveredDevice> = self
            .peripherals(adapter)
            .await?
            .into_iter()
            .filter_map(|known| {
                let name = known.name?;
                let model = DeviceModel::from_device_name(&name)?;
                Some(DiscoveredDevice::new(name, &known.address, known.rssi, model))
            })
            .collect();
        discovered.sort_by(|a, b| a.address.cmp(&b.address));

        info!("Scan complete. Found {} device(s)", discovered.len());
        Ok(discovered)
    }
}
