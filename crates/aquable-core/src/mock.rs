//! In-memory transport and connector for testing.
//!
//! [`MockTransport`] records every frame written to it and can inject
//! failures, latency and canned status notifications. [`MockConnector`]
//! hands out mock transports by address, so the registry and the command
//! pipeline run end to end without BLE hardware.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aquable_core::{MockTransport, Transport};
//!
//! # tokio_test_block_on(async {
//! let transport = Arc::new(MockTransport::new("AA:BB:CC:DD:EE:FF"));
//! transport.connect(Arc::new(|_: &[u8]| {})).await.unwrap();
//! transport.write(&[0x5A, 0x01]).await.unwrap();
//! assert_eq!(transport.frames(), vec![vec![0x5A, 0x01]]);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use aquable_types::DeviceModel;

use crate::commands::{CMD_STATUS, MODE_STATUS_REQUEST};
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
use crate::scan::DiscoveredDevice;
use crate::traits::{Connector, NotificationHandler, ResolvedDevice, Transport};
use crate::util::normalize_address;

/// A frame accepted by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

/// A fake radio link.
#[derive(Default)]
pub struct MockTransport {
    address: String,
    connected: AtomicBool,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    write_attempts: AtomicU32,
    /// Writes to fail before succeeding again.
    remaining_write_failures: AtomicU32,
    /// Fail every write once this many frames have been accepted.
    fail_after: Mutex<Option<usize>>,
    remaining_connect_failures: AtomicU32,
    /// Simulated write latency in milliseconds (0 = no delay).
    write_latency_ms: AtomicU64,
    frames: Mutex<Vec<RecordedFrame>>,
    status_response: Mutex<Option<Vec<u8>>>,
    handler: Mutex<Option<NotificationHandler>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address),
            ..Self::default()
        }
    }

    /// Bytes of every accepted frame, in write order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.recorded().into_iter().map(|f| f.bytes).collect()
    }

    /// Accepted frames with the instant each was written.
    pub fn recorded(&self) -> Vec<RecordedFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    /// Writes attempted, including failed ones.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::Relaxed)
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.remaining_write_failures.store(count, Ordering::Relaxed);
    }

    /// Accept `count` more frames, then fail every write.
    pub fn fail_writes_after(&self, count: usize) {
        let accepted = self.frames.lock().map(|f| f.len()).unwrap_or(0);
        if let Ok(mut limit) = self.fail_after.lock() {
            *limit = Some(accepted + count);
        }
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.remaining_connect_failures.store(count, Ordering::Relaxed);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Answer every status request with `payload` as a notification.
    pub fn respond_with(&self, payload: Vec<u8>) {
        if let Ok(mut response) = self.status_response.lock() {
            *response = Some(payload);
        }
    }

    /// Deliver an unsolicited notification to the connected handler.
    pub fn notify(&self, payload: &[u8]) {
        let handler = self.handler.lock().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    fn should_fail_write(&self) -> bool {
        let pending = self.remaining_write_failures.load(Ordering::Relaxed);
        if pending > 0 {
            self.remaining_write_failures
                .store(pending - 1, Ordering::Relaxed);
            return true;
        }
        let limit = self.fail_after.lock().ok().and_then(|l| *l);
        let accepted = self.frames.lock().map(|f| f.len()).unwrap_or(0);
        limit.is_some_and(|limit| accepted >= limit)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self, on_notification: NotificationHandler) -> Result<()> {
        let pending = self.remaining_connect_failures.load(Ordering::Relaxed);
        if pending > 0 {
            self.remaining_connect_failures
                .store(pending - 1, Ordering::Relaxed);
            return Err(Error::connection_failed(
                Some(self.address.clone()),
                ConnectionFailureReason::Other("mock connect failure".into()),
            ));
        }
        if let Ok(mut handler) = self.handler.lock() {
            *handler = Some(on_notification);
        }
        self.connected.store(true, Ordering::Relaxed);
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::Relaxed);

        let latency = self.write_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.connected.load(Ordering::Relaxed) {
            return Err(Error::NotConnected);
        }
        if self.should_fail_write() {
            return Err(Error::WriteFailed {
                uuid: aquable_types::uuids::UART_RX.to_string(),
                reason: "mock write failure".into(),
            });
        }

        if let Ok(mut frames) = self.frames.lock() {
            frames.push(RecordedFrame {
                at: Instant::now(),
                bytes: frame.to_vec(),
            });
        }

        let is_status_request = frame.first() == Some(&CMD_STATUS)
            && frame.get(5) == Some(&MODE_STATUS_REQUEST);
        if is_status_request {
            let response = self.status_response.lock().ok().and_then(|r| r.clone());
            if let Some(response) = response {
                self.notify(&response);
            }
        }
        Ok(())
    }
}

/// A fake radio neighbourhood of [`MockTransport`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    devices: Mutex<HashMap<String, (String, Arc<MockTransport>)>>,
    remaining_resolve_failures: AtomicU32,
    resolve_count: AtomicU32,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a device resolvable under its transport's address.
    pub fn add_device(&self, name: impl Into<String>, transport: Arc<MockTransport>) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(transport.address().to_string(), (name.into(), transport));
        }
    }

    /// Add a device and return its transport.
    pub fn add(&self, name: &str, address: &str) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new(address));
        self.add_device(name, Arc::clone(&transport));
        transport
    }

    /// Fail the next `count` resolutions with a not-found error.
    pub fn fail_next_resolves(&self, count: u32) {
        self.remaining_resolve_failures
            .store(count, Ordering::Relaxed);
    }

    pub fn resolve_count(&self) -> u32 {
        self.resolve_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice> {
        self.resolve_count.fetch_add(1, Ordering::Relaxed);
        let address = normalize_address(address);

        let pending = self.remaining_resolve_failures.load(Ordering::Relaxed);
        if pending > 0 {
            self.remaining_resolve_failures
                .store(pending - 1, Ordering::Relaxed);
            return Err(Error::device_not_found(address));
        }

        let found = self
            .devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(&address).cloned());
        match found {
            Some((name, transport)) => Ok(ResolvedDevice {
                name,
                address,
                transport,
            }),
            None => Err(Error::DeviceNotFound(DeviceNotFoundReason::NotFound {
                address,
            })),
        }
    }

    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let devices = self
            .devices
            .lock()
            .map(|d| d.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        let mut found: Vec<DiscoveredDevice> = devices
            .into_iter()
            .filter_map(|(name, transport)| {
                let model = DeviceModel::from_device_name(&name)?;
                Some(DiscoveredDevice::new(name, transport.address(), None, model))
            })
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_requires_connection() {
        let transport = MockTransport::new("aa:00:00:00:00:01");
        assert_eq!(transport.address(), "AA:00:00:00:00:01");
        assert!(matches!(transport.write(&[1]).await, Err(Error::NotConnected)));

        transport.connect(Arc::new(|_: &[u8]| {})).await.unwrap();
        transport.write(&[1]).await.unwrap();
        assert_eq!(transport.frames(), vec![vec![1]]);
        assert_eq!(transport.write_attempts(), 2);
    }

    #[tokio::test]
    async fn test_fail_writes_after() {
        let transport = MockTransport::new("AA:00:00:00:00:02");
        transport.connect(Arc::new(|_: &[u8]| {})).await.unwrap();
        transport.fail_writes_after(1);
        transport.write(&[1]).await.unwrap();
        assert!(transport.write(&[2]).await.is_err());
        assert!(transport.write(&[3]).await.is_err());
        assert_eq!(transport.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_status_response_delivered() {
        let transport = MockTransport::new("AA:00:00:00:00:03");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport
            .connect(Arc::new(move |data: &[u8]| {
                sink.lock().unwrap().push(data.to_vec());
            }))
            .await
            .unwrap();
        transport.respond_with(vec![0x5B, 1]);

        transport.write(&[0xA5, 1, 6, 0, 1, 0x04, 4, 0]).await.unwrap();
        assert!(seen.lock().unwrap().is_empty());

        transport.write(&[0x5A, 1, 6, 0, 1, 0x04, 1, 0]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![0x5B, 1]]);
    }

    #[tokio::test]
    async fn test_connector_resolves_and_discovers() {
        let connector = MockConnector::new();
        connector.add("DYDOSE0123456789AB", "AA:00:00:00:00:04");
        connector.add("Unknown", "AA:00:00:00:00:05");

        let resolved = connector.resolve("aa:00:00:00:00:04").await.unwrap();
        assert_eq!(resolved.name, "DYDOSE0123456789AB");
        assert!(connector.resolve("AA:00:00:00:00:09").await.is_err());

        let found = connector.discover(Duration::from_secs(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "AA:00:00:00:00:04");
    }
}
