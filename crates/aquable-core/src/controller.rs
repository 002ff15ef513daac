//! The caller-facing controller.
//!
//! [`AquaController`] owns the registry, the pipeline, the status cache and
//! the command history, and starts and stops the background workers. It is
//! what a frontend (CLI, HTTP layer) talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use aquable_types::DeviceKind;

use crate::cache::{CachedStatus, StatusCache};
use crate::error::Result;
use crate::events::{DeviceEvent, DeviceId, EventDispatcher, EventReceiver};
use crate::handle::{DEFAULT_IDLE_DISCONNECT, DEFAULT_SETTLE_DELAY, HandleConfig};
use crate::history::{CommandHistory, DEFAULT_HISTORY_CAPACITY};
use crate::pipeline::{
    CommandRecord, CommandRequest, DEFAULT_AUTO_SETTINGS_TIMEOUT, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_CONFIRM_WAIT, DEFAULT_STATUS_WAIT, Pipeline, PipelineSettings,
};
use crate::registry::Registry;
use crate::scan::{BleConnector, DEFAULT_SCAN_TIMEOUT, DiscoveredDevice};
use crate::session::SessionLimits;
use crate::storage::DeviceStore;
use crate::traits::{Connector, DeviceHandle};
use crate::util::normalize_address;
use crate::workers::{WorkerContext, WorkerPhase, WorkerSettings, Workers};

/// Tunables read once at startup.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub status_wait: Duration,
    pub command_timeout: Duration,
    pub auto_settings_timeout: Duration,
    pub confirm_wait: Duration,
    pub scan_timeout: Duration,
    pub settle_delay: Duration,
    pub idle_disconnect: Option<Duration>,
    pub auto_reconnect: bool,
    pub auto_discover: bool,
    pub auto_save: bool,
    pub session: SessionLimits,
    pub history_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            status_wait: DEFAULT_STATUS_WAIT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            auto_settings_timeout: DEFAULT_AUTO_SETTINGS_TIMEOUT,
            confirm_wait: DEFAULT_CONFIRM_WAIT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            idle_disconnect: Some(DEFAULT_IDLE_DISCONNECT),
            auto_reconnect: true,
            auto_discover: false,
            auto_save: true,
            session: SessionLimits::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ControllerSettings {
    fn handle_config(&self) -> HandleConfig {
        HandleConfig::default()
            .settle_delay(self.settle_delay)
            .idle_disconnect(self.idle_disconnect)
            .session(self.session)
    }

    fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            command_timeout: self.command_timeout,
            auto_settings_timeout: self.auto_settings_timeout,
            status_wait: self.status_wait,
            confirm_wait: self.confirm_wait,
            auto_save: self.auto_save,
        }
    }

    fn workers(&self) -> WorkerSettings {
        WorkerSettings {
            auto_discover: self.auto_discover,
            auto_reconnect: self.auto_reconnect,
            scan_timeout: self.scan_timeout,
        }
    }
}

/// Entry point for driving dosers and lights.
pub struct AquaController {
    registry: Arc<Registry>,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn DeviceStore>,
    cache: Arc<StatusCache>,
    history: Arc<CommandHistory>,
    events: EventDispatcher,
    settings: ControllerSettings,
    workers: Mutex<Option<Workers>>,
}

impl std::fmt::Debug for AquaController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AquaController")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AquaController {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn DeviceStore>,
        settings: ControllerSettings,
    ) -> Self {
        let events = EventDispatcher::default();
        let registry = Arc::new(Registry::new(
            connector,
            settings.handle_config(),
            events.clone(),
        ));
        let cache = Arc::new(StatusCache::new());
        let history = Arc::new(CommandHistory::new(settings.history_capacity));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&history),
            events.clone(),
            settings.pipeline(),
        ));
        Self {
            registry,
            pipeline,
            store,
            cache,
            history,
            events,
            settings,
            workers: Mutex::new(None),
        }
    }

    /// A controller on the platform Bluetooth stack.
    pub fn with_ble(store: Arc<dyn DeviceStore>, settings: ControllerSettings) -> Self {
        let connector = BleConnector::new().scan_timeout(settings.scan_timeout);
        Self::new(Arc::new(connector), store, settings)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Subscribe to device events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Scan for supported devices.
    pub async fn scan(&self, timeout: Option<Duration>) -> Result<Vec<DiscoveredDevice>> {
        let timeout = timeout.unwrap_or(self.settings.scan_timeout);
        let found = self.registry.connector().discover(timeout).await?;
        for device in &found {
            self.events.send(DeviceEvent::Discovered {
                device: DeviceId::with_kind(device.address.clone(), device.kind)
                    .name(device.name.clone()),
                rssi: device.rssi,
            });
        }
        info!(count = found.len(), "Scan complete");
        Ok(found)
    }

    /// Connect a device and fetch its status.
    pub async fn connect(&self, address: &str, kind: Option<DeviceKind>) -> Result<CachedStatus> {
        self.pipeline.request_status(address, kind).await
    }

    /// Drop a device's handle. Returns `false` if it was not connected.
    pub async fn disconnect(&self, address: &str) -> Result<bool> {
        self.registry.disconnect(address).await
    }

    /// Ask a device for a fresh status.
    pub async fn request_status(&self, address: &str) -> Result<CachedStatus> {
        self.pipeline.request_status(address, None).await
    }

    /// Last published status of every device, connected or not.
    pub fn get_status_snapshot(&self) -> HashMap<String, CachedStatus> {
        self.cache.snapshot()
    }

    /// Current status of the connected devices of the given kinds.
    ///
    /// An empty `kinds` means every kind.
    pub async fn get_live_statuses(&self, kinds: &[DeviceKind]) -> HashMap<String, CachedStatus> {
        self.registry
            .all()
            .await
            .iter()
            .filter(|device| kinds.is_empty() || kinds.contains(&device.kind()))
            .map(|device| {
                let status = CachedStatus::from_device(device);
                (status.address.clone(), status)
            })
            .collect()
    }

    /// Run a command to completion.
    pub async fn execute_command(&self, address: &str, request: CommandRequest) -> CommandRecord {
        self.pipeline.execute(address, request).await
    }

    /// Store a record produced outside [`execute_command`](Self::execute_command).
    pub async fn save_command(&self, record: CommandRecord) {
        self.history.save(record).await;
    }

    /// Recent commands for a device, newest first (20 unless `limit` is set).
    pub async fn get_commands(&self, address: &str, limit: Option<usize>) -> Vec<CommandRecord> {
        self.history.list(&normalize_address(address), limit).await
    }

    pub async fn get_command(&self, address: &str, id: &str) -> Option<CommandRecord> {
        self.history.get(&normalize_address(address), id).await
    }

    /// Start the background workers. Does nothing if they already run.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }
        self.restore_statuses().await;
        info!(
            auto_discover = self.settings.auto_discover,
            auto_reconnect = self.settings.auto_reconnect,
            "Starting background workers"
        );
        *workers = Some(Workers::spawn(WorkerContext {
            registry: Arc::clone(&self.registry),
            pipeline: Arc::clone(&self.pipeline),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            settings: self.settings.workers(),
        }));
    }

    /// Seed the snapshot cache with the statuses persisted by a previous run.
    /// Statuses already cached in this run are kept.
    async fn restore_statuses(&self) {
        let configs = match self.store.list_devices().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "Could not list stored devices");
                return;
            }
        };
        let mut restored = 0usize;
        for config in configs {
            if self.cache.get(&config.address).is_some() {
                continue;
            }
            match self.store.get_device_with_status(&config.address).await {
                Ok(Some(stored)) => {
                    if let Some(status) = stored.status {
                        self.cache.insert(status);
                        restored += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(address = %config.address, error = %e, "Could not load stored status"),
            }
        }
        debug!(restored, "Restored stored statuses");
    }

    /// Phase of the background workers, if started.
    pub async fn worker_phase(&self) -> Option<WorkerPhase> {
        self.workers.lock().await.as_ref().map(Workers::phase)
    }

    /// Stop the workers, cancel in-flight commands, then disconnect every
    /// device. Commands executed afterwards fail as cancelled.
    pub async fn shutdown(&self) {
        if let Some(workers) = self.workers.lock().await.take() {
            workers.shutdown().await;
        }
        self.pipeline.cancel();
        for (address, result) in self.registry.disconnect_all().await {
            if let Err(e) = result {
                warn!(address = %address, error = %e, "Disconnect during shutdown failed");
            }
        }
        info!("Controller stopped");
    }
}
