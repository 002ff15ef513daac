//! Snapshot cache of the latest status per device.
//!
//! Entries are replaced wholesale; a reader always sees either the previous
//! or the next [`CachedStatus`] for an address, never a mix.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;

use aquable_types::{DeviceKind, DeviceStatus, hex};

use crate::handle::Device;
use crate::traits::DeviceHandle;

/// A named light channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub index: u8,
}

/// The status exchanged with callers and persisted through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStatus {
    pub address: String,
    pub device_type: DeviceKind,
    /// Hex of the last notification, if any arrived.
    pub raw_payload: Option<String>,
    pub parsed: Option<DeviceStatus>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub model_name: String,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
}

impl CachedStatus {
    /// Capture the handle's current status.
    pub fn from_device(device: &Device) -> Self {
        let parsed = device.last_status();
        let model = device.model();
        Self {
            address: device.address().to_string(),
            device_type: device.kind(),
            raw_payload: parsed.as_ref().map(|s| hex::encode(s.raw_payload())),
            parsed,
            updated_at: OffsetDateTime::now_utc(),
            model_name: model.name.to_string(),
            channels: model
                .channel_names()
                .into_iter()
                .map(|(index, name)| ChannelInfo {
                    name: name.to_string(),
                    index,
                })
                .collect(),
        }
    }
}

/// Latest status per address.
#[derive(Debug)]
pub struct StatusCache {
    entries: watch::Sender<HashMap<String, CachedStatus>>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        let (entries, _) = watch::channel(HashMap::new());
        Self { entries }
    }

    /// Replace the entry for `status.address`.
    pub fn insert(&self, status: CachedStatus) {
        self.entries.send_modify(|entries| {
            entries.insert(status.address.clone(), status);
        });
    }

    pub fn remove(&self, address: &str) -> Option<CachedStatus> {
        let mut removed = None;
        self.entries.send_if_modified(|entries| {
            removed = entries.remove(address);
            removed.is_some()
        });
        removed
    }

    pub fn get(&self, address: &str) -> Option<CachedStatus> {
        self.entries.borrow().get(address).cloned()
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> HashMap<String, CachedStatus> {
        self.entries.borrow().clone()
    }

    /// Entries whose device kind is in `kinds`.
    pub fn of_kinds(&self, kinds: &[DeviceKind]) -> HashMap<String, CachedStatus> {
        self.entries
            .borrow()
            .iter()
            .filter(|(_, status)| kinds.contains(&status.device_type))
            .map(|(address, status)| (address.clone(), status.clone()))
            .collect()
    }

    /// Watch the whole map for replacements.
    pub fn subscribe(&self) -> watch::Receiver<HashMap<String, CachedStatus>> {
        self.entries.subscribe()
    }
}
