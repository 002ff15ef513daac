//! Background discovery and reconnection.
//!
//! A single scheduler task walks through [`WorkerPhase`]s once at startup:
//!
//! ```text
//! Discovering ──(nothing attached, auto_reconnect)──► Reconnecting ──► Idle
//!      │                                                                ▲
//!      └──────────────(attached a device)───────────────────────────────┘
//! ```
//!
//! Discovery only runs when it is enabled and the store knows no devices.
//! The workers go through the same registry and pipeline paths as callers and
//! never hold a lock longer than one device operation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{DeviceEvent, DeviceId, EventDispatcher};
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::scan::DEFAULT_SCAN_TIMEOUT;
use crate::storage::DeviceStore;

/// Where the scheduler task is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Discovering,
    Reconnecting,
    Idle,
}

/// Which background jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub auto_discover: bool,
    pub auto_reconnect: bool,
    pub scan_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            auto_discover: false,
            auto_reconnect: true,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

/// Everything the scheduler needs.
pub(crate) struct WorkerContext {
    pub registry: Arc<Registry>,
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<dyn DeviceStore>,
    pub events: EventDispatcher,
    pub settings: WorkerSettings,
}

/// Handle to the running scheduler task.
#[derive(Debug)]
pub struct Workers {
    cancel: CancellationToken,
    phase: watch::Receiver<WorkerPhase>,
    task: JoinHandle<()>,
}

impl Workers {
    pub(crate) fn spawn(ctx: WorkerContext) -> Self {
        let cancel = CancellationToken::new();
        let (phase_tx, phase) = watch::channel(WorkerPhase::Idle);
        let task = tokio::spawn(schedule(ctx, phase_tx, cancel.clone()));
        Self { cancel, phase, task }
    }

    /// Current phase.
    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.clone()
    }

    /// Whether the scheduler has nothing left to do.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the scheduler and wait for it to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            warn!(error = %e, "Background worker panicked");
        }
    }
}

async fn schedule(ctx: WorkerContext, phase_tx: watch::Sender<WorkerPhase>, cancel: CancellationToken) {
    let mut phase = match first_phase(&ctx).await {
        Some(phase) => phase,
        None => return,
    };

    loop {
        phase_tx.send_replace(phase);
        debug!(?phase, "Worker phase");
        phase = match phase {
            WorkerPhase::Discovering => {
                let attached = tokio::select! {
                    () = cancel.cancelled() => break,
                    attached = discover(&ctx) => attached,
                };
                if attached == 0 && ctx.settings.auto_reconnect {
                    WorkerPhase::Reconnecting
                } else {
                    WorkerPhase::Idle
                }
            }
            WorkerPhase::Reconnecting => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = reconnect(&ctx) => {},
                }
                WorkerPhase::Idle
            }
            WorkerPhase::Idle => break,
        };
    }
    phase_tx.send_replace(WorkerPhase::Idle);
    debug!("Background workers finished");
}

async fn first_phase(ctx: &WorkerContext) -> Option<WorkerPhase> {
    let settings = ctx.settings;
    if settings.auto_discover {
        match ctx.store.list_devices().await {
            Ok(known) if known.is_empty() => return Some(WorkerPhase::Discovering),
            Ok(_) => debug!("Known devices present, skipping discovery"),
            Err(e) => warn!(error = %e, "Could not list known devices"),
        }
    }
    settings.auto_reconnect.then_some(WorkerPhase::Reconnecting)
}

/// Scan and attach every supported device, returning how many attached.
async fn discover(ctx: &WorkerContext) -> usize {
    let found = match ctx.registry.connector().discover(ctx.settings.scan_timeout).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Auto-discovery scan failed");
            return 0;
        }
    };
    info!(count = found.len(), "Auto-discovery found devices");

    let mut attached = 0;
    for device in found {
        ctx.events.send(DeviceEvent::Discovered {
            device: DeviceId::with_kind(device.address.clone(), device.kind).name(device.name.clone()),
            rssi: device.rssi,
        });
        match ctx.pipeline.request_status(&device.address, Some(device.kind)).await {
            Ok(_) => {
                attached += 1;
                info!(address = %device.address, model = device.model_name, "Auto-discovered device attached");
            }
            Err(e) => warn!(address = %device.address, error = %e, "Could not attach discovered device"),
        }
    }
    attached
}

/// Reconnect every stored device without asking for status.
async fn reconnect(ctx: &WorkerContext) {
    let known = match ctx.store.list_devices().await {
        Ok(known) => known,
        Err(e) => {
            warn!(error = %e, "Could not list known devices");
            return;
        }
    };

    for config in known {
        match ctx.registry.ensure_device(&config.address, Some(config.kind())).await {
            Ok(_) => info!(address = %config.address, "Reconnected device"),
            Err(e) => warn!(address = %config.address, error = %e, "Reconnect failed"),
        }
    }
}
