//! JSON file device store.
//!
//! The whole store is one JSON document, rewritten through a temporary file
//! and a rename on every change so a crash never leaves it half-written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use aquable_core::storage::{DeviceConfig, DeviceStore, StoredDevice};
use aquable_core::util::normalize_address;
use aquable_core::{CachedStatus, Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    devices: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    statuses: BTreeMap<String, CachedStatus>,
}

/// A [`DeviceStore`] backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<Document>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Storage(format!("corrupt store {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened device store");
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &Document) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| Error::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for JsonFileStore {
    async fn get_device(&self, address: &str) -> Result<Option<DeviceConfig>> {
        let document = self.document.lock().await;
        Ok(document.devices.get(&normalize_address(address)).cloned())
    }

    async fn get_device_with_status(&self, address: &str) -> Result<Option<StoredDevice>> {
        let address = normalize_address(address);
        let document = self.document.lock().await;
        Ok(document.devices.get(&address).map(|config| StoredDevice {
            config: config.clone(),
            status: document.statuses.get(&address).cloned(),
        }))
    }

    async fn upsert_device(&self, mut config: DeviceConfig) -> Result<DeviceConfig> {
        config.address = normalize_address(&config.address);
        config.touch();
        let mut document = self.document.lock().await;
        let previous = document.devices.insert(config.address.clone(), config.clone());
        if let Err(e) = self.persist(&document).await {
            // Keep memory and disk in step.
            match previous {
                Some(previous) => document.devices.insert(config.address.clone(), previous),
                None => document.devices.remove(&config.address),
            };
            return Err(e);
        }
        Ok(config)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        let document = self.document.lock().await;
        Ok(document.devices.values().cloned().collect())
    }

    async fn record_status(&self, status: &CachedStatus) -> Result<()> {
        let address = normalize_address(&status.address);
        let mut document = self.document.lock().await;
        let created = !document.devices.contains_key(&address);
        if created {
            let mut config = DeviceConfig::from_status(status);
            config.address = address.clone();
            document.devices.insert(address.clone(), config);
        }
        let previous = document.statuses.insert(address.clone(), status.clone());
        if let Err(e) = self.persist(&document).await {
            if created {
                document.devices.remove(&address);
            }
            match previous {
                Some(previous) => document.statuses.insert(address, previous),
                None => document.statuses.remove(&address),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquable_core::DeviceKind;

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("devices.json")).await.unwrap();
        assert!(store.list_devices().await.unwrap().is_empty());
        assert!(store.get_device("AA:BB:CC:DD:EE:FF").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("devices.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let saved = store
            .upsert_device(DeviceConfig::new_doser("aa:bb:cc:dd:ee:01", Some("Doser".into())))
            .await
            .unwrap();
        assert_eq!(saved.address, "AA:BB:CC:DD:EE:01");
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let devices = reopened.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].kind(), DeviceKind::Doser);
        assert_eq!(devices[0].name.as_deref(), Some("Doser"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_status_registers_device_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let status = CachedStatus {
            address: "AA:BB:CC:DD:EE:02".into(),
            device_type: DeviceKind::Doser,
            raw_payload: Some("5b000000011e000a".into()),
            parsed: None,
            updated_at: time::OffsetDateTime::now_utc(),
            model_name: "Dosing Pump".into(),
            channels: Vec::new(),
        };
        store.record_status(&status).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let devices = reopened.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].kind(), DeviceKind::Doser);
        let stored = reopened
            .get_device_with_status("aa:bb:cc:dd:ee:02")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status.unwrap().raw_payload.as_deref(), Some("5b000000011e000a"));
    }
}
