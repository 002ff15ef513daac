//! Service configuration.
//!
//! Read once at startup from a TOML file, then overridden by `AQUA_*`
//! environment variables. The core only ever sees the resulting
//! [`ControllerSettings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aquable_core::{ControllerSettings, SessionLimits};

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth and command tunables.
    pub ble: BleConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Default configuration file path.
    pub fn default_path() -> PathBuf {
        default_config_path()
    }

    /// Validate the configuration, collecting every problem.
    ///
    /// # Example
    ///
    /// ```
    /// use aquable_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.ble.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.logging.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Apply `AQUA_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `AQUA_*` overrides from `lookup`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let ble = &mut self.ble;
        override_with(&lookup, "AQUA_BLE_AUTO_RECONNECT", parse_bool, &mut ble.auto_reconnect);
        override_with(&lookup, "AQUA_BLE_AUTO_DISCOVER", parse_bool, &mut ble.auto_discover);
        override_with(&lookup, "AQUA_BLE_AUTO_SAVE", parse_bool, &mut ble.auto_save);
        override_with(&lookup, "AQUA_BLE_STATUS_WAIT", parse_from_str, &mut ble.status_wait_secs);
        override_with(&lookup, "AQUA_MSG_ID_RESET_HOURS", parse_from_str, &mut ble.msg_id_reset_hours);
        override_with(&lookup, "AQUA_MSG_ID_MAX_COMMANDS", parse_from_str, &mut ble.msg_id_max_commands);
        if let Some(level) = lookup("AQUA_BLE_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level.trim().to_lowercase();
        }
        if let Some(dir) = lookup("AQUA_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Settings handed to the controller.
    pub fn controller_settings(&self) -> ControllerSettings {
        let ble = &self.ble;
        ControllerSettings {
            status_wait: Duration::from_secs_f64(ble.status_wait_secs),
            command_timeout: Duration::from_secs_f64(ble.command_timeout_secs),
            auto_settings_timeout: Duration::from_secs_f64(ble.auto_settings_timeout_secs),
            confirm_wait: Duration::from_secs_f64(ble.doser_confirm_wait_secs),
            scan_timeout: Duration::from_secs_f64(ble.scan_timeout_secs),
            idle_disconnect: (ble.idle_disconnect_secs > 0)
                .then(|| Duration::from_secs(ble.idle_disconnect_secs)),
            auto_reconnect: ble.auto_reconnect,
            auto_discover: ble.auto_discover,
            auto_save: ble.auto_save,
            session: SessionLimits::default()
                .reset_after(Duration::from_secs_f64(ble.msg_id_reset_hours * 3600.0))
                .max_commands(ble.msg_id_max_commands),
            ..ControllerSettings::default()
        }
    }
}

fn override_with<T, F, P>(lookup: &F, key: &str, parse: P, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse(raw.trim()) {
        Some(value) => *target = value,
        None => tracing::warn!("Ignoring invalid value '{}' for {}", raw, key),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_from_str<T: std::str::FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

/// Bluetooth and command tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Wait for a status notification after a command.
    pub status_wait_secs: f64,
    /// Default command timeout.
    pub command_timeout_secs: f64,
    /// Default timeout for `add_auto_setting`.
    pub auto_settings_timeout_secs: f64,
    /// Wait for the confirming status after a dose schedule.
    pub doser_confirm_wait_secs: f64,
    /// Scan duration.
    pub scan_timeout_secs: f64,
    /// Idle period before a link is dropped; 0 keeps links open.
    pub idle_disconnect_secs: u64,
    /// Reconnect known devices at startup.
    pub auto_reconnect: bool,
    /// Scan for devices at startup when none are known.
    pub auto_discover: bool,
    /// Persist configuration after successful commands.
    pub auto_save: bool,
    /// Message-id session lifetime.
    pub msg_id_reset_hours: f64,
    /// Message ids issued before the session restarts.
    pub msg_id_max_commands: u32,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            status_wait_secs: 1.5,
            command_timeout_secs: 10.0,
            auto_settings_timeout_secs: 15.0,
            doser_confirm_wait_secs: 2.0,
            scan_timeout_secs: 5.0,
            idle_disconnect_secs: 120,
            auto_reconnect: true,
            auto_discover: false,
            auto_save: true,
            msg_id_reset_hours: 24.0,
            msg_id_max_commands: 1000,
        }
    }
}

/// Maximum command timeout accepted by the pipeline, in seconds.
pub const MAX_COMMAND_TIMEOUT_SECS: f64 = 30.0;

impl BleConfig {
    /// Validate Bluetooth configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut check_range = |field: &str, value: f64, min: f64, max: f64| {
            if !(min..=max).contains(&value) {
                errors.push(ValidationError {
                    field: format!("ble.{field}"),
                    message: format!("{value} is out of range ({min} - {max})"),
                });
            }
        };
        check_range("status_wait_secs", self.status_wait_secs, 0.1, 10.0);
        check_range("command_timeout_secs", self.command_timeout_secs, 1.0, MAX_COMMAND_TIMEOUT_SECS);
        check_range(
            "auto_settings_timeout_secs",
            self.auto_settings_timeout_secs,
            1.0,
            MAX_COMMAND_TIMEOUT_SECS,
        );
        check_range("doser_confirm_wait_secs", self.doser_confirm_wait_secs, 0.5, 10.0);
        check_range("scan_timeout_secs", self.scan_timeout_secs, 1.0, 60.0);
        check_range("msg_id_reset_hours", self.msg_id_reset_hours, 0.1, 24.0 * 30.0);

        if self.msg_id_max_commands == 0 {
            errors.push(ValidationError {
                field: "ble.msg_id_max_commands".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the device store.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Path of the JSON device store.
    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.data_dir".to_string(),
                message: "data directory cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// Validate logging configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if LOG_LEVELS.contains(&self.level.as_str()) {
            Vec::new()
        } else {
            vec![ValidationError {
                field: "logging.level".to_string(),
                message: format!(
                    "unknown level '{}': expected one of {}",
                    self.level,
                    LOG_LEVELS.join(", ")
                ),
            }]
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `ble.status_wait_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aquable")
        .join("config.toml")
}

/// Default data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aquable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.ble.status_wait_secs, 1.5);
        assert_eq!(config.ble.command_timeout_secs, 10.0);
        assert!(config.ble.auto_reconnect);
        assert!(!config.ble.auto_discover);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ble]
            auto_discover = true
            scan_timeout_secs = 8.0
            "#,
        )
        .unwrap();
        assert!(config.ble.auto_discover);
        assert_eq!(config.ble.scan_timeout_secs, 8.0);
        assert_eq!(config.ble.msg_id_max_commands, 1000);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = Config::default();
        config.ble.status_wait_secs = 0.0;
        config.ble.command_timeout_secs = 120.0;
        config.ble.msg_id_max_commands = 0;
        config.logging.level = "loud".to_string();

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "ble.status_wait_secs",
                "ble.command_timeout_secs",
                "ble.msg_id_max_commands",
                "logging.level",
            ]
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("AQUA_BLE_AUTO_RECONNECT", "off"),
            ("AQUA_BLE_AUTO_DISCOVER", "YES"),
            ("AQUA_BLE_STATUS_WAIT", "2.5"),
            ("AQUA_MSG_ID_MAX_COMMANDS", "50"),
            ("AQUA_MSG_ID_RESET_HOURS", "not-a-number"),
            ("AQUA_BLE_LOG_LEVEL", "DEBUG"),
            ("AQUA_DATA_DIR", "/var/lib/aquable"),
        ]));

        assert!(!config.ble.auto_reconnect);
        assert!(config.ble.auto_discover);
        assert!(config.ble.auto_save);
        assert_eq!(config.ble.status_wait_secs, 2.5);
        assert_eq!(config.ble.msg_id_max_commands, 50);
        assert_eq!(config.ble.msg_id_reset_hours, 24.0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/aquable"));
    }

    #[test]
    fn test_controller_settings() {
        let mut config = Config::default();
        config.ble.idle_disconnect_secs = 0;
        config.ble.msg_id_reset_hours = 0.5;
        let settings = config.controller_settings();

        assert_eq!(settings.status_wait, Duration::from_millis(1500));
        assert_eq!(settings.auto_settings_timeout, Duration::from_secs(15));
        assert_eq!(settings.confirm_wait, Duration::from_secs(2));
        assert_eq!(settings.idle_disconnect, None);
        assert_eq!(settings.session.reset_after, Duration::from_secs(1800));
        assert_eq!(settings.session.max_commands, 1000);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.ble.auto_discover = true;
        config.storage.data_dir = PathBuf::from("/tmp/aquable-test");
        config.save(&config_path).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Config::load(temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
