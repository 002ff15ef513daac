//! Device configuration records and the storage collaborator contract.
//!
//! The pipeline reads and writes [`DeviceConfig`] records through
//! [`DeviceStore`] after a successful mutating command. [`MemoryStore`]
//! keeps everything in memory; the service binary provides a file-backed
//! store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use aquable_types::{ClockTime, DeviceKind, DeviceModel, Weekday};

use crate::cache::CachedStatus;
use crate::error::{Error, Result};

/// Most auto programs a light stores.
pub const MAX_AUTO_PROGRAMS: usize = 7;

/// Persisted configuration for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub profile: DeviceProfile,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl DeviceConfig {
    /// An empty doser record.
    pub fn new_doser(address: impl Into<String>, name: Option<String>) -> Self {
        Self::new(address.into(), name, DeviceProfile::Doser(DoserConfig::default()))
    }

    /// A light record with the model's channels and all levels at zero.
    pub fn new_light(address: impl Into<String>, name: Option<String>, model: &DeviceModel) -> Self {
        Self::new(address.into(), name, DeviceProfile::Light(LightConfig::for_model(model)))
    }

    /// A bare record for a device first seen through its status, such as one
    /// attached by `connect` or discovery.
    pub fn from_status(status: &CachedStatus) -> Self {
        match status.device_type {
            DeviceKind::Doser => Self::new_doser(status.address.clone(), None),
            DeviceKind::Light => {
                let channels = status.channels.iter().map(|c| (c.index, c.name.as_str()));
                Self::new(
                    status.address.clone(),
                    None,
                    DeviceProfile::Light(LightConfig::from_channels(channels)),
                )
            }
        }
    }

    fn new(address: String, name: Option<String>, profile: DeviceProfile) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            address,
            name,
            profile,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self.profile {
            DeviceProfile::Doser(_) => DeviceKind::Doser,
            DeviceProfile::Light(_) => DeviceKind::Light,
        }
    }

    pub fn doser_mut(&mut self) -> Result<&mut DoserConfig> {
        let kind = self.kind();
        match &mut self.profile {
            DeviceProfile::Doser(config) => Ok(config),
            DeviceProfile::Light(_) => Err(wrong_kind(&self.address, DeviceKind::Doser, kind)),
        }
    }

    pub fn light_mut(&mut self) -> Result<&mut LightConfig> {
        let kind = self.kind();
        match &mut self.profile {
            DeviceProfile::Light(config) => Ok(config),
            DeviceProfile::Doser(_) => Err(wrong_kind(&self.address, DeviceKind::Light, kind)),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

fn wrong_kind(address: &str, expected: DeviceKind, actual: DeviceKind) -> Error {
    Error::WrongType {
        address: address.to_string(),
        expected,
        actual,
    }
}

/// Kind-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceProfile {
    Doser(DoserConfig),
    Light(LightConfig),
}

/// Doser heads, ordered by index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoserConfig {
    #[serde(default)]
    pub heads: Vec<DoserHead>,
}

impl DoserConfig {
    /// Create or replace the daily dose for a head.
    pub fn set_head_schedule(
        &mut self,
        index: u8,
        volume_tenths_ml: u16,
        start_time: ClockTime,
        days: Vec<Weekday>,
    ) {
        let schedule = SingleSchedule {
            daily_dose_ml: f64::from(volume_tenths_ml) / 10.0,
            start_time,
        };
        match self.heads.iter_mut().find(|h| h.index == index) {
            Some(head) => {
                head.active = true;
                head.schedule = Some(schedule);
                head.days = days;
            }
            None => {
                self.heads.push(DoserHead {
                    index,
                    label: None,
                    active: true,
                    schedule: Some(schedule),
                    days,
                });
                self.heads.sort_by_key(|h| h.index);
            }
        }
    }

    pub fn head(&self, index: u8) -> Option<&DoserHead> {
        self.heads.iter().find(|h| h.index == index)
    }
}

/// One dosing head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoserHead {
    /// 1 to 4.
    pub index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<SingleSchedule>,
    #[serde(default)]
    pub days: Vec<Weekday>,
}

/// One dose per active day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleSchedule {
    pub daily_dose_ml: f64,
    pub start_time: ClockTime,
}

/// A light channel as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDef {
    /// Channel index as a string, e.g. "0".
    pub key: String,
    pub label: String,
}

/// Light channels and the active profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    pub channels: Vec<ChannelDef>,
    pub profile: LightProfile,
}

impl LightConfig {
    pub fn for_model(model: &DeviceModel) -> Self {
        Self::from_channels(model.channel_names())
    }

    /// Channels from `(index, lowercase name)` pairs, all levels at zero.
    pub fn from_channels<'a>(channels: impl IntoIterator<Item = (u8, &'a str)>) -> Self {
        let names: Vec<(u8, &str)> = channels.into_iter().collect();
        Self {
            channels: names
                .iter()
                .map(|(id, name)| ChannelDef {
                    key: id.to_string(),
                    label: capitalize(name),
                })
                .collect(),
            profile: LightProfile::Manual(ManualProfile {
                levels: names.iter().map(|(_, name)| (name.to_string(), 0)).collect(),
            }),
        }
    }

    /// Per-channel levels keyed by lowercase channel name.
    pub fn levels(&self, values: impl IntoIterator<Item = u8>) -> BTreeMap<String, u8> {
        self.channels
            .iter()
            .map(|c| c.label.to_lowercase())
            .zip(values)
            .collect()
    }

    /// Store manual levels, replacing any auto profile.
    pub fn set_manual(&mut self, levels: BTreeMap<String, u8>) {
        self.profile = LightProfile::Manual(ManualProfile { levels });
    }

    /// Append an auto program, switching a manual profile to auto.
    ///
    /// Fails once [`MAX_AUTO_PROGRAMS`] programs are stored.
    pub fn add_auto_program(&mut self, program: AutoProgram) -> Result<()> {
        match &mut self.profile {
            LightProfile::Auto(auto) => {
                if auto.programs.len() >= MAX_AUTO_PROGRAMS {
                    return Err(Error::validation(format!(
                        "at most {MAX_AUTO_PROGRAMS} auto programs can be stored"
                    )));
                }
                auto.programs.push(program);
            }
            LightProfile::Manual(_) => {
                self.profile = LightProfile::Auto(AutoProfile {
                    programs: vec![program],
                });
            }
        }
        Ok(())
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// How a light is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LightProfile {
    Manual(ManualProfile),
    Auto(AutoProfile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualProfile {
    pub levels: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoProfile {
    pub programs: Vec<AutoProgram>,
}

/// One sunrise/sunset program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoProgram {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub enabled: bool,
    pub days: Vec<Weekday>,
    pub sunrise: ClockTime,
    pub sunset: ClockTime,
    pub ramp_minutes: u16,
    pub levels: BTreeMap<String, u8>,
}

/// A configuration together with the last recorded status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDevice {
    pub config: DeviceConfig,
    pub status: Option<CachedStatus>,
}

/// Storage collaborator used by the pipeline and the workers.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get_device(&self, address: &str) -> Result<Option<DeviceConfig>>;

    async fn get_device_with_status(&self, address: &str) -> Result<Option<StoredDevice>>;

    /// Insert or replace a configuration, returning what was stored.
    async fn upsert_device(&self, config: DeviceConfig) -> Result<DeviceConfig>;

    /// Every stored configuration, ordered by address.
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>>;

    /// Remember the latest status of a device, creating a bare configuration
    /// from it when the address is not stored yet.
    async fn record_status(&self, status: &CachedStatus) -> Result<()>;
}

/// A [`DeviceStore`] that lives in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    configs: RwLock<HashMap<String, DeviceConfig>>,
    statuses: RwLock<HashMap<String, CachedStatus>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Storage("store is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(&self, address: &str) -> Result<Option<DeviceConfig>> {
        Ok(self.configs.read().await.get(address).cloned())
    }

    async fn get_device_with_status(&self, address: &str) -> Result<Option<StoredDevice>> {
        let Some(config) = self.get_device(address).await? else {
            return Ok(None);
        };
        let status = self.statuses.read().await.get(address).cloned();
        Ok(Some(StoredDevice { config, status }))
    }

    async fn upsert_device(&self, mut config: DeviceConfig) -> Result<DeviceConfig> {
        self.check_writable()?;
        config.touch();
        self.configs
            .write()
            .await
            .insert(config.address.clone(), config.clone());
        Ok(config)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        let mut configs: Vec<DeviceConfig> = self.configs.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(configs)
    }

    async fn record_status(&self, status: &CachedStatus) -> Result<()> {
        self.check_writable()?;
        self.configs
            .write()
            .await
            .entry(status.address.clone())
            .or_insert_with(|| DeviceConfig::from_status(status));
        self.statuses
            .write()
            .await
            .insert(status.address.clone(), status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn program(id: &str) -> AutoProgram {
        AutoProgram {
            id: id.into(),
            label: None,
            enabled: true,
            days: vec![Weekday::Saturday, Weekday::Sunday],
            sunrise: time("08:00"),
            sunset: time("20:00"),
            ramp_minutes: 15,
            levels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_doser_head_upsert() {
        let mut config = DoserConfig::default();
        config.set_head_schedule(3, 55, time("10:30"), vec![Weekday::Monday]);
        config.set_head_schedule(1, 10, time("08:00"), vec![]);
        config.set_head_schedule(3, 300, time("11:00"), vec![Weekday::Friday]);

        let indexes: Vec<u8> = config.heads.iter().map(|h| h.index).collect();
        assert_eq!(indexes, vec![1, 3]);
        let head = config.head(3).unwrap();
        assert_eq!(head.schedule.as_ref().unwrap().daily_dose_ml, 30.0);
        assert_eq!(head.days, vec![Weekday::Friday]);
    }

    #[test]
    fn test_light_for_model() {
        let config = LightConfig::for_model(DeviceModel::from_code("DYNWRGB").unwrap());
        let keys: Vec<&str> = config.channels.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
        assert_eq!(config.channels[0].label, "Red");
        assert_eq!(
            config.levels([10, 20, 30]),
            BTreeMap::from([("red".into(), 10), ("green".into(), 20), ("blue".into(), 30)])
        );
    }

    #[test]
    fn test_auto_programs_replace_manual_and_cap() {
        let mut config = LightConfig::for_model(DeviceModel::from_code("DYNA2").unwrap());
        config.add_auto_program(program("p0")).unwrap();
        let LightProfile::Auto(auto) = &config.profile else {
            panic!("expected auto profile");
        };
        assert_eq!(auto.programs.len(), 1);

        for i in 1..MAX_AUTO_PROGRAMS {
            config.add_auto_program(program(&format!("p{i}"))).unwrap();
        }
        assert!(config.add_auto_program(program("overflow")).is_err());
    }

    #[test]
    fn test_profile_json_shape() {
        let mut config = DeviceConfig::new_light(
            "AA:BB",
            None,
            DeviceModel::from_code("DYNA2").unwrap(),
        );
        config.light_mut().unwrap().add_auto_program(program("p0")).unwrap();

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["profile"]["kind"], "light");
        assert_eq!(json["profile"]["profile"]["mode"], "auto");
        let program = &json["profile"]["profile"]["programs"][0];
        assert_eq!(program["rampMinutes"], 15);
        assert_eq!(program["days"], serde_json::json!(["saturday", "sunday"]));
        assert_eq!(program["sunrise"], "08:00");

        let back: DeviceConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_kind_accessors() {
        let mut config = DeviceConfig::new_doser("AA:BB", None);
        assert_eq!(config.kind(), DeviceKind::Doser);
        assert!(config.doser_mut().is_ok());
        assert!(config.light_mut().is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get_device("AA:01").await.unwrap().is_none());

        store.upsert_device(DeviceConfig::new_doser("AA:02", None)).await.unwrap();
        store.upsert_device(DeviceConfig::new_doser("AA:01", None)).await.unwrap();
        let addresses: Vec<String> = store
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.address)
            .collect();
        assert_eq!(addresses, vec!["AA:01", "AA:02"]);

        let stored = store.get_device_with_status("AA:01").await.unwrap().unwrap();
        assert!(stored.status.is_none());

        store.set_fail_writes(true);
        let err = store
            .upsert_device(DeviceConfig::new_doser("AA:03", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InternalError);
    }

    fn light_status(address: &str) -> CachedStatus {
        let model = DeviceModel::from_device_name("DYNWRGB0123456789AB").unwrap();
        CachedStatus {
            address: address.into(),
            device_type: DeviceKind::Light,
            raw_payload: None,
            parsed: None,
            updated_at: OffsetDateTime::now_utc(),
            model_name: model.name.into(),
            channels: model
                .channel_names()
                .into_iter()
                .map(|(index, name)| crate::cache::ChannelInfo {
                    name: name.into(),
                    index,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_first_status_registers_device() {
        let store = MemoryStore::new();
        let status = light_status("AA:04");
        store.record_status(&status).await.unwrap();

        let stored = store.get_device_with_status("AA:04").await.unwrap().unwrap();
        assert_eq!(stored.status, Some(status.clone()));
        assert_eq!(stored.config.name, None);
        let DeviceProfile::Light(light) = &stored.config.profile else {
            panic!("expected a light profile");
        };
        let model = DeviceModel::from_device_name("DYNWRGB0123456789AB").unwrap();
        assert_eq!(light, &LightConfig::for_model(model));

        // A later status leaves an existing configuration alone.
        let mut named = stored.config.clone();
        named.name = Some("Reef".into());
        store.upsert_device(named).await.unwrap();
        store.record_status(&status).await.unwrap();
        let config = store.get_device("AA:04").await.unwrap().unwrap();
        assert_eq!(config.name.as_deref(), Some("Reef"));
        assert_eq!(store.list_devices().await.unwrap().len(), 1);
    }
}
