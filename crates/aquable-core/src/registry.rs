//! Connection registry.
//!
//! Maps `(kind, address)` to a live [`Device`] handle and remembers a
//! primary address per kind. The registry lock only covers the
//! check-and-insert step; resolving and connecting a device happens outside
//! it, so one slow device never holds up another.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use aquable_types::{DeviceKind, DeviceModel};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher};
use crate::handle::{Device, HandleConfig};
use crate::retry::{RetryConfig, is_retryable, with_retry_if};
use crate::traits::{Connector, DeviceHandle};
use crate::util::normalize_address;

#[derive(Debug, Default)]
struct RegistryState {
    devices: HashMap<DeviceKind, HashMap<String, Arc<Device>>>,
    primary: HashMap<DeviceKind, String>,
}

impl RegistryState {
    fn find(&self, address: &str) -> Option<&Arc<Device>> {
        self.devices.values().find_map(|by_address| by_address.get(address))
    }

    fn insert(&mut self, device: Arc<Device>) {
        let kind = device.kind();
        let address = device.address().to_string();
        self.primary.entry(kind).or_insert_with(|| address.clone());
        self.devices.entry(kind).or_default().insert(address, device);
    }

    /// Remove a handle, promoting another handle of the same kind to
    /// primary when the removed one was primary.
    fn remove(&mut self, address: &str) -> Option<Arc<Device>> {
        let (kind, device) = self.devices.iter_mut().find_map(|(kind, by_address)| {
            by_address.remove(address).map(|device| (*kind, device))
        })?;

        if self.primary.get(&kind).is_some_and(|primary| primary == address) {
            let next = self
                .devices
                .get(&kind)
                .and_then(|by_address| by_address.keys().min().cloned());
            match next {
                Some(next) => {
                    debug!(%kind, primary = %next, "Promoted primary device");
                    self.primary.insert(kind, next);
                }
                None => {
                    self.primary.remove(&kind);
                }
            }
        }
        Some(device)
    }
}

/// Live device handles keyed by kind and address.
#[derive(Debug)]
pub struct Registry {
    connector: Arc<dyn Connector>,
    handle_config: HandleConfig,
    resolve_retry: RetryConfig,
    state: RwLock<RegistryState>,
    events: EventDispatcher,
}

impl Registry {
    pub fn new(connector: Arc<dyn Connector>, handle_config: HandleConfig, events: EventDispatcher) -> Self {
        Self {
            connector,
            handle_config,
            resolve_retry: RetryConfig::for_resolve(),
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Return the handle for `address`, resolving and connecting it first if
    /// needed.
    ///
    /// # Errors
    ///
    /// * [`Error::WrongType`] when the device is not of `expected` kind.
    /// * [`Error::DeviceNotFound`] when resolution fails after retries or the
    ///   device is not a supported model.
    #[tracing::instrument(level = "info", skip(self), fields(address = %address))]
    pub async fn ensure_device(&self, address: &str, expected: Option<DeviceKind>) -> Result<Arc<Device>> {
        let address = normalize_address(address);

        if let Some(existing) = self.state.read().await.find(&address) {
            check_kind(existing, expected)?;
            return Ok(Arc::clone(existing));
        }

        let device = self.open(&address, expected).await?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.find(&address) {
            debug!("Another task connected {} while we were connecting, discarding ours", address);
            check_kind(existing, expected)?;
            return Ok(Arc::clone(existing));
        }
        state.insert(Arc::clone(&device));
        drop(state);

        info!(kind = %device.kind(), model = device.model().name, "Device registered");
        self.events.send(DeviceEvent::Connected {
            device: DeviceId::with_kind(device.address(), device.kind()).name(device.name()),
        });
        Ok(device)
    }

    /// Resolve, build and connect a handle with the resolution retry policy.
    async fn open(&self, address: &str, expected: Option<DeviceKind>) -> Result<Arc<Device>> {
        let attempts = self.resolve_retry.attempts();
        let result = with_retry_if(
            &self.resolve_retry,
            "resolve device",
            is_resolve_retryable,
            || async {
                let resolved = self.connector.resolve(address).await?;
                let model = DeviceModel::from_device_name(&resolved.name).ok_or_else(|| {
                    Error::DeviceNotFound(DeviceNotFoundReason::Unsupported {
                        address: address.to_string(),
                        name: resolved.name.clone(),
                    })
                })?;
                if let Some(expected) = expected
                    && model.kind != expected
                {
                    return Err(Error::WrongType {
                        address: address.to_string(),
                        expected,
                        actual: model.kind,
                    });
                }
                let device = Device::new(
                    resolved.name,
                    model,
                    resolved.transport,
                    self.handle_config.clone(),
                );
                device.connect().await?;
                Ok(Arc::new(device))
            },
        )
        .await;

        result.map_err(|e| match e {
            Error::WrongType { .. }
            | Error::DeviceNotFound(
                DeviceNotFoundReason::Unsupported { .. } | DeviceNotFoundReason::NoAdapter,
            ) => e,
            other => {
                warn!(error = %other, "Device could not be resolved");
                Error::DeviceNotFound(DeviceNotFoundReason::RetriesExhausted {
                    address: address.to_string(),
                    attempts,
                })
            }
        })
    }

    /// Handle for `address`, if registered.
    pub async fn get(&self, address: &str) -> Option<Arc<Device>> {
        self.state.read().await.find(&normalize_address(address)).cloned()
    }

    /// Every handle of one kind, ordered by address.
    pub async fn devices_of_kind(&self, kind: DeviceKind) -> Vec<Arc<Device>> {
        let state = self.state.read().await;
        let mut devices: Vec<Arc<Device>> = state
            .devices
            .get(&kind)
            .map(|by_address| by_address.values().cloned().collect())
            .unwrap_or_default();
        devices.sort_by(|a, b| a.address().cmp(b.address()));
        devices
    }

    /// Every handle, ordered by address.
    pub async fn all(&self) -> Vec<Arc<Device>> {
        let state = self.state.read().await;
        let mut devices: Vec<Arc<Device>> = state
            .devices
            .values()
            .flat_map(|by_address| by_address.values().cloned())
            .collect();
        devices.sort_by(|a, b| a.address().cmp(b.address()));
        devices
    }

    /// The primary handle of one kind.
    pub async fn primary(&self, kind: DeviceKind) -> Option<Arc<Device>> {
        let state = self.state.read().await;
        let address = state.primary.get(&kind)?;
        state.devices.get(&kind)?.get(address).cloned()
    }

    /// Remove a handle and release its radio link.
    ///
    /// Returns `false` when nothing was registered under `address`.
    pub async fn disconnect(&self, address: &str) -> Result<bool> {
        let address = normalize_address(address);
        let Some(device) = self.state.write().await.remove(&address) else {
            return Ok(false);
        };

        device.disconnect().await?;
        self.events.send(DeviceEvent::Disconnected {
            device: DeviceId::with_kind(device.address(), device.kind()).name(device.name()),
            reason: DisconnectReason::UserRequested,
        });
        info!(address = %address, "Device disconnected");
        Ok(true)
    }

    /// Remove every handle and disconnect them concurrently.
    pub async fn disconnect_all(&self) -> HashMap<String, Result<()>> {
        let devices: Vec<Arc<Device>> = {
            let mut state = self.state.write().await;
            state.primary.clear();
            state
                .devices
                .drain()
                .flat_map(|(_, by_address)| by_address.into_values())
                .collect()
        };

        let results = join_all(devices.iter().map(|device| async move {
            let result = device.disconnect().await;
            if result.is_ok() {
                self.events.send(DeviceEvent::Disconnected {
                    device: DeviceId::with_kind(device.address(), device.kind()),
                    reason: DisconnectReason::Shutdown,
                });
            }
            (device.address().to_string(), result)
        }))
        .await;
        results.into_iter().collect()
    }

    /// Number of registered handles.
    pub async fn len(&self) -> usize {
        self.state.read().await.devices.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn check_kind(device: &Device, expected: Option<DeviceKind>) -> Result<()> {
    match expected {
        Some(expected) if device.kind() != expected => Err(Error::WrongType {
            address: device.address().to_string(),
            expected,
            actual: device.kind(),
        }),
        _ => Ok(()),
    }
}

/// Resolution retries not-found results as well as transient radio errors.
fn is_resolve_retryable(error: &Error) -> bool {
    match error {
        Error::DeviceNotFound(DeviceNotFoundReason::NotFound { .. }) => true,
        other => is_retryable(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::ErrorKind;
    use crate::mock::MockConnector;
    use crate::traits::Transport;

    const DOSER: &str = "DYDOSE0123456789AB";
    const LIGHT: &str = "DYNWRGB0123456789AB";

    fn registry(connector: Arc<MockConnector>) -> Registry {
        Registry::new(
            connector,
            HandleConfig::default().settle_delay(Duration::ZERO),
            EventDispatcher::default(),
        )
    }

    #[tokio::test]
    async fn test_ensure_device_connects_once() {
        let connector = Arc::new(MockConnector::new());
        let transport = connector.add(DOSER, "AA:00:00:00:03:01");
        let registry = registry(connector.clone());

        let first = registry.ensure_device("aa:00:00:00:03:01", None).await.unwrap();
        let second = registry
            .ensure_device("AA:00:00:00:03:01", Some(DeviceKind::Doser))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.resolve_count(), 1);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_not_retried() {
        let connector = Arc::new(MockConnector::new());
        connector.add(LIGHT, "AA:00:00:00:03:02");
        let registry = registry(connector.clone());

        let err = registry
            .ensure_device("AA:00:00:00:03:02", Some(DeviceKind::Doser))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongType);
        assert_eq!(connector.resolve_count(), 1);
        assert!(registry.is_empty().await);

        registry.ensure_device("AA:00:00:00:03:02", None).await.unwrap();
        let err = registry
            .ensure_device("AA:00:00:00:03:02", Some(DeviceKind::Doser))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongType);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_retries_then_succeeds() {
        let connector = Arc::new(MockConnector::new());
        connector.add(DOSER, "AA:00:00:00:03:03");
        connector.fail_next_resolves(2);
        let registry = registry(connector.clone());

        registry.ensure_device("AA:00:00:00:03:03", None).await.unwrap();
        assert_eq!(connector.resolve_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_exhausted_is_not_found() {
        let connector = Arc::new(MockConnector::new());
        let registry = registry(connector.clone());

        let err = registry.ensure_device("AA:00:00:00:03:04", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(
            err,
            Error::DeviceNotFound(DeviceNotFoundReason::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(connector.resolve_count(), 3);
    }

    #[tokio::test]
    async fn test_unsupported_model() {
        let connector = Arc::new(MockConnector::new());
        connector.add("SomethingElse", "AA:00:00:00:03:05");
        let registry = registry(connector.clone());

        let err = registry.ensure_device("AA:00:00:00:03:05", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceNotFound(DeviceNotFoundReason::Unsupported { .. })
        ));
        assert_eq!(connector.resolve_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_promotes_primary() {
        let connector = Arc::new(MockConnector::new());
        connector.add(LIGHT, "AA:00:00:00:03:06");
        let second = connector.add("DYNA2001122334455", "AA:00:00:00:03:07");
        connector.add(DOSER, "AA:00:00:00:03:08");
        let registry = registry(connector);

        for address in ["AA:00:00:00:03:06", "AA:00:00:00:03:07", "AA:00:00:00:03:08"] {
            registry.ensure_device(address, None).await.unwrap();
        }
        assert_eq!(registry.devices_of_kind(DeviceKind::Light).await.len(), 2);
        let primary = registry.primary(DeviceKind::Light).await.unwrap();
        assert_eq!(primary.address(), "AA:00:00:00:03:06");

        assert!(registry.disconnect("AA:00:00:00:03:06").await.unwrap());
        let primary = registry.primary(DeviceKind::Light).await.unwrap();
        assert_eq!(primary.address(), "AA:00:00:00:03:07");

        assert!(registry.disconnect("AA:00:00:00:03:07").await.unwrap());
        assert!(registry.primary(DeviceKind::Light).await.is_none());
        assert!(!second.is_connected().await);
        assert!(!registry.disconnect("AA:00:00:00:03:07").await.unwrap());

        assert!(registry.primary(DeviceKind::Doser).await.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let connector = Arc::new(MockConnector::new());
        let a = connector.add(LIGHT, "AA:00:00:00:03:09");
        let b = connector.add(DOSER, "AA:00:00:00:03:0A");
        let registry = registry(connector);
        let mut events = registry.events.subscribe();

        registry.ensure_device("AA:00:00:00:03:09", None).await.unwrap();
        registry.ensure_device("AA:00:00:00:03:0A", None).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), DeviceEvent::Connected { .. }));

        let results = registry.disconnect_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.values().all(Result::is_ok));
        assert!(registry.is_empty().await);
        assert!(!a.is_connected().await);
        assert!(!b.is_connected().await);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_device_single_handle() {
        let connector = Arc::new(MockConnector::new());
        connector.add(DOSER, "AA:00:00:00:03:0B");
        let registry = Arc::new(registry(connector));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.ensure_device("AA:00:00:00:03:0B", None).await.unwrap()
                })
            })
            .collect();
        let handles: Vec<Arc<Device>> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_losing_handle_leaves_shared_link_up() {
        let connector = Arc::new(MockConnector::new());
        let transport = connector.add(DOSER, "AA:00:00:00:03:0C");
        let registry = Arc::new(registry(connector.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.ensure_device("AA:00:00:00:03:0C", None).await.unwrap()
                })
            })
            .collect();
        let handles: Vec<Arc<Device>> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        drop(handles);

        assert_eq!(transport.disconnect_count(), 0);
        assert!(transport.is_connected().await);
        assert!(registry.get("AA:00:00:00:03:0C").await.is_some());

        assert!(registry.disconnect("AA:00:00:00:03:0C").await.unwrap());
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_leaves_link_untouched() {
        let connector = Arc::new(MockConnector::new());
        let transport = connector.add(LIGHT, "AA:00:00:00:03:0D");
        let registry = registry(connector);

        let err = registry
            .ensure_device("AA:00:00:00:03:0D", Some(DeviceKind::Doser))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongType);
        assert_eq!(transport.disconnect_count(), 0);
    }
}
