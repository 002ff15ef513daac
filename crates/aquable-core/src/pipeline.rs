//! Command execution pipeline.
//!
//! Every request goes through the same steps: validate the arguments,
//! take the per-address lock, run the device operation and a status refresh
//! under a timeout, classify the outcome, persist the new configuration and
//! save the record to the history.
//!
//! ```text
//! pending ──► started ──► success
//!    │                ├─► failed
//!    │                └─► timeout
//!    └──────────────────► failed (validation_error)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use aquable_types::{ClockTime, DeviceKind, Weekday};

use crate::cache::{CachedStatus, StatusCache};
use crate::doser::DoseSchedule;
use crate::error::{Error, ErrorKind, Result};
use crate::events::{DeviceEvent, DeviceId, EventDispatcher};
use crate::handle::Device;
use crate::history::CommandHistory;
use crate::light::{AutoBrightness, AutoSetting};
use crate::registry::Registry;
use crate::storage::{AutoProgram, DeviceConfig, DeviceStore};
use crate::traits::DeviceHandle;
use crate::util::normalize_address;

/// Default command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for `add_auto_setting`, which writes a longer frame.
pub const DEFAULT_AUTO_SETTINGS_TIMEOUT: Duration = Duration::from_secs(15);

/// Default wait for a status notification after a command.
pub const DEFAULT_STATUS_WAIT: Duration = Duration::from_millis(1500);

/// Default wait for the confirming status after a dose.
pub const DEFAULT_CONFIRM_WAIT: Duration = Duration::from_secs(2);

/// Bounds for a caller-supplied timeout, in seconds.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<f64> = 1.0..=30.0;

// --- Records ---

/// Lifecycle state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Started,
    Success,
    Failed,
    Timeout,
}

impl CommandStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

/// A command submitted by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Caller-chosen record id; a random one is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub args: Option<Value>,
    /// Timeout in seconds, 1 to 30.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl CommandRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Outcome of one command. Terminal records never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    pub address: String,
    pub action: String,
    pub args: Option<Value>,
    pub status: CommandStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub timeout_seconds: f64,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl CommandRecord {
    pub fn new(
        id: String,
        address: &str,
        action: &str,
        args: Option<Value>,
        timeout_seconds: f64,
    ) -> Self {
        Self {
            id,
            address: address.to_string(),
            action: action.to_string(),
            args,
            status: CommandStatus::Pending,
            result: None,
            error: None,
            error_kind: None,
            timeout_seconds,
            attempts: 0,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_started(&mut self) {
        if self.status != CommandStatus::Pending {
            return;
        }
        self.status = CommandStatus::Started;
        self.attempts += 1;
        self.started_at = Some(OffsetDateTime::now_utc());
    }

    pub fn mark_success(&mut self, result: Option<Value>) {
        if self.finish(CommandStatus::Success) {
            self.result = result;
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, kind: ErrorKind) {
        if self.finish(CommandStatus::Failed) {
            self.error = Some(error.into());
            self.error_kind = Some(kind);
        }
    }

    pub fn mark_timeout(&mut self) {
        if self.finish(CommandStatus::Timeout) {
            self.error = Some(format!(
                "Command timed out after {} seconds",
                self.timeout_seconds
            ));
            self.error_kind = Some(ErrorKind::Timeout);
        }
    }

    fn finish(&mut self, status: CommandStatus) -> bool {
        if self.is_terminal() {
            debug!(id = %self.id, from = ?self.status, to = ?status, "Ignoring transition of finished command");
            return false;
        }
        self.status = status;
        self.completed_at = Some(OffsetDateTime::now_utc());
        true
    }
}

// --- Actions ---

/// Arguments of `set_brightness`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetBrightnessArgs {
    pub brightness: u8,
    /// Channel index.
    #[serde(default)]
    pub color: u8,
}

/// Arguments of `add_auto_setting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddAutoSettingArgs {
    pub sunrise: ClockTime,
    pub sunset: ClockTime,
    pub brightness: u8,
    #[serde(default)]
    pub ramp_up_minutes: u8,
    #[serde(default, deserialize_with = "weekday_names")]
    pub weekdays: Option<Vec<Weekday>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Arguments of `set_schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetScheduleArgs {
    pub head_index: u8,
    pub volume_tenths_ml: u16,
    pub hour: u8,
    pub minute: u8,
    #[serde(default, deserialize_with = "weekday_names")]
    pub weekdays: Option<Vec<Weekday>>,
    #[serde(default = "default_confirm")]
    pub confirm: bool,
    /// Status wait after a confirmed dose, 0.5 to 10 seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

fn default_confirm() -> bool {
    true
}

/// Accept any spelling [`Weekday::parse_list`] understands.
fn weekday_names<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<Weekday>>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = Option::<Vec<String>>::deserialize(deserializer)?;
    names
        .map(|names| Weekday::parse_list(names).map_err(serde::de::Error::custom))
        .transpose()
}

/// A validated command.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    TurnOn,
    TurnOff,
    EnableAutoMode,
    SetManualMode,
    ResetAutoSettings,
    SetBrightness(SetBrightnessArgs),
    AddAutoSetting(AddAutoSettingArgs),
    SetSchedule(SetScheduleArgs),
}

impl Action {
    /// Validate `args` against the schema of `action`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown actions, unexpected or
    /// missing arguments and out-of-range values.
    pub fn parse(action: &str, args: Option<&Value>) -> Result<Self> {
        let no_args = |action: Action| match args {
            None | Some(Value::Null) => Ok(action),
            Some(Value::Object(map)) if map.is_empty() => Ok(action),
            Some(_) => Err(Error::validation(format!(
                "action '{}' does not accept arguments",
                action.name()
            ))),
        };

        let parsed = match action {
            "turn_on" => no_args(Action::TurnOn)?,
            "turn_off" => no_args(Action::TurnOff)?,
            "enable_auto_mode" => no_args(Action::EnableAutoMode)?,
            "set_manual_mode" => no_args(Action::SetManualMode)?,
            "reset_auto_settings" => no_args(Action::ResetAutoSettings)?,
            "set_brightness" => Action::SetBrightness(schema_args(action, args)?),
            "add_auto_setting" => Action::AddAutoSetting(schema_args(action, args)?),
            "set_schedule" => Action::SetSchedule(schema_args(action, args)?),
            other => return Err(Error::validation(format!("unsupported action '{other}'"))),
        };
        parsed.check_ranges()?;
        Ok(parsed)
    }

    fn check_ranges(&self) -> Result<()> {
        match self {
            Action::SetBrightness(args) => {
                check(args.brightness <= 100, "brightness must be 0-100")?;
                check(args.color <= 5, "color must be 0-5")
            }
            Action::AddAutoSetting(args) => {
                check(args.brightness <= 100, "brightness must be 0-100")?;
                check(args.sunset > args.sunrise, "sunset must be after sunrise")
            }
            Action::SetSchedule(args) => {
                check((1..=4).contains(&args.head_index), "head_index must be 1-4")?;
                check(args.hour <= 23, "hour must be 0-23")?;
                check(args.minute <= 59, "minute must be 0-59")?;
                check(
                    args.wait_seconds.is_none_or(|w| (0.5..=10.0).contains(&w)),
                    "wait_seconds must be 0.5-10",
                )
            }
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::TurnOn => "turn_on",
            Action::TurnOff => "turn_off",
            Action::EnableAutoMode => "enable_auto_mode",
            Action::SetManualMode => "set_manual_mode",
            Action::ResetAutoSettings => "reset_auto_settings",
            Action::SetBrightness(_) => "set_brightness",
            Action::AddAutoSetting(_) => "add_auto_setting",
            Action::SetSchedule(_) => "set_schedule",
        }
    }

    /// Kind of device the action drives.
    #[must_use]
    pub fn target_kind(&self) -> DeviceKind {
        match self {
            Action::SetSchedule(_) => DeviceKind::Doser,
            _ => DeviceKind::Light,
        }
    }

    /// Arguments with defaults filled in.
    #[must_use]
    pub fn normalized_args(&self) -> Option<Value> {
        let value = match self {
            Action::SetBrightness(args) => serde_json::to_value(args),
            Action::AddAutoSetting(args) => serde_json::to_value(args),
            Action::SetSchedule(args) => serde_json::to_value(args),
            _ => return None,
        };
        value.ok()
    }
}

fn schema_args<T: serde::de::DeserializeOwned>(action: &str, args: Option<&Value>) -> Result<T> {
    let args = args
        .filter(|v| !v.is_null())
        .ok_or_else(|| Error::validation(format!("action '{action}' requires arguments")))?;
    T::deserialize(args)
        .map_err(|e| Error::validation(format!("invalid arguments for '{action}': {e}")))
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::validation(message))
    }
}

// --- Pipeline ---

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub command_timeout: Duration,
    pub auto_settings_timeout: Duration,
    /// Wait for the status notification after a command.
    pub status_wait: Duration,
    /// Wait for the confirming status after a dose, unless the request sets one.
    pub confirm_wait: Duration,
    /// Persist configuration after successful mutating commands.
    pub auto_save: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            auto_settings_timeout: DEFAULT_AUTO_SETTINGS_TIMEOUT,
            status_wait: DEFAULT_STATUS_WAIT,
            confirm_wait: DEFAULT_CONFIRM_WAIT,
            auto_save: true,
        }
    }
}

/// Runs commands against registered devices.
pub struct Pipeline {
    registry: Arc<Registry>,
    store: Arc<dyn DeviceStore>,
    cache: Arc<StatusCache>,
    history: Arc<CommandHistory>,
    events: EventDispatcher,
    settings: PipelineSettings,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn DeviceStore>,
        cache: Arc<StatusCache>,
        history: Arc<CommandHistory>,
        events: EventDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            history,
            events,
            settings,
            locks: StdMutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort in-flight commands and fail every later one with
    /// [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// The lock serializing commands for `address`, created on first use.
    fn lock_for(&self, address: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(address.to_string()).or_default())
    }

    fn timeout_for(&self, action: Option<&Action>, requested: Option<f64>) -> Result<Duration> {
        match requested {
            Some(seconds) if TIMEOUT_RANGE.contains(&seconds) => Ok(Duration::from_secs_f64(seconds)),
            Some(seconds) => Err(Error::validation(format!(
                "timeout must be 1-30 seconds, got {seconds}"
            ))),
            None => Ok(match action {
                Some(Action::AddAutoSetting(_)) => self.settings.auto_settings_timeout,
                _ => self.settings.command_timeout,
            }),
        }
    }

    /// Run one command and return its terminal record.
    #[tracing::instrument(level = "info", skip(self, request), fields(action = %request.action))]
    pub async fn execute(&self, address: &str, request: CommandRequest) -> CommandRecord {
        let address = normalize_address(address);
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let validated = Action::parse(&request.action, request.args.as_ref()).and_then(|action| {
            let timeout = self.timeout_for(Some(&action), request.timeout)?;
            Ok((action, timeout))
        });
        let (action, timeout) = match validated {
            Ok(validated) => validated,
            Err(e) => {
                let timeout = self
                    .timeout_for(None, request.timeout)
                    .unwrap_or(self.settings.command_timeout);
                let mut record = CommandRecord::new(
                    id,
                    &address,
                    &request.action,
                    request.args,
                    timeout.as_secs_f64(),
                );
                info!(address = %address, error = %e, "Command rejected");
                record.mark_failed(e.to_string(), e.kind());
                self.finish(&record).await;
                return record;
            }
        };

        let mut record = CommandRecord::new(
            id,
            &address,
            action.name(),
            action.normalized_args(),
            timeout.as_secs_f64(),
        );

        let lock = self.lock_for(&address);
        {
            let _guard = lock.lock().await;
            record.mark_started();
            debug!(address = %address, id = %record.id, "Command started");

            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Ok(Err(Error::Cancelled)),
                outcome = tokio::time::timeout(timeout, self.run(&address, &action)) => outcome,
            };
            match outcome {
                Ok(Ok(result)) => record.mark_success(Some(result)),
                Ok(Err(Error::Cancelled)) => {
                    warn!(address = %address, action = action.name(), "Command cancelled by shutdown");
                    record.mark_failed(Error::Cancelled.to_string(), ErrorKind::InternalError);
                }
                Ok(Err(e)) => {
                    let kind = e.kind();
                    if kind == ErrorKind::InternalError {
                        error!(address = %address, action = action.name(), error = ?e, "Command failed");
                    } else {
                        warn!(address = %address, action = action.name(), error = %e, "Command failed");
                    }
                    record.mark_failed(e.to_string(), kind);
                }
                Err(_) => {
                    warn!(
                        address = %address,
                        action = action.name(),
                        timeout = ?timeout,
                        "Command timed out"
                    );
                    record.mark_timeout();
                }
            }
        }

        self.finish(&record).await;
        record
    }

    /// Ask a device for its status under the address lock and publish it.
    ///
    /// Connects the device first when needed.
    pub async fn request_status(&self, address: &str, expected: Option<DeviceKind>) -> Result<CachedStatus> {
        let address = normalize_address(address);
        let lock = self.lock_for(&address);
        let _guard = lock.lock().await;

        let device = self.registry.ensure_device(&address, expected).await?;
        device.refresh_status(self.settings.status_wait).await?;
        Ok(self.publish_status(&device).await)
    }

    async fn finish(&self, record: &CommandRecord) {
        self.history.save(record.clone()).await;
        self.events.send(DeviceEvent::CommandFinished {
            device: DeviceId::new(record.address.clone()),
            command_id: record.id.clone(),
            action: record.action.clone(),
            status: record.status,
        });
    }

    /// Device operation, status refresh and persistence.
    async fn run(&self, address: &str, action: &Action) -> Result<Value> {
        let device = self
            .registry
            .ensure_device(address, Some(action.target_kind()))
            .await?;

        let mut confirmed = false;
        match action {
            Action::TurnOn => device.light()?.turn_on().await?,
            Action::TurnOff => device.light()?.turn_off().await?,
            Action::EnableAutoMode => device.light()?.enable_auto_mode().await?,
            Action::SetManualMode => device.light()?.set_manual_mode().await?,
            Action::ResetAutoSettings => device.light()?.reset_settings().await?,
            Action::SetBrightness(args) => {
                device
                    .light()?
                    .set_channel_brightness(args.brightness, usize::from(args.color))
                    .await?
            }
            Action::AddAutoSetting(args) => {
                let setting = AutoSetting {
                    sunrise: args.sunrise,
                    sunset: args.sunset,
                    brightness: AutoBrightness::Uniform(args.brightness),
                    ramp_minutes: args.ramp_up_minutes,
                    weekdays: args.weekdays.clone(),
                };
                device.light()?.add_auto_setting(&setting).await?
            }
            Action::SetSchedule(args) => {
                let schedule = DoseSchedule {
                    head: args.head_index,
                    volume_tenths_ml: args.volume_tenths_ml,
                    time: ClockTime::new(args.hour, args.minute)?,
                    weekdays: args.weekdays.clone(),
                };
                let wait = args
                    .wait_seconds
                    .map_or(self.settings.confirm_wait, Duration::from_secs_f64);
                device
                    .doser()?
                    .set_daily_dose(&schedule, args.confirm, wait)
                    .await?;
                confirmed = args.confirm;
            }
        }

        // The device has changed; a failed refresh only means a stale status.
        if !confirmed && let Err(e) = device.refresh_status(self.settings.status_wait).await {
            warn!(address = %address, error = %e, "Status refresh after command failed");
        }
        let status = self.publish_status(&device).await;

        if self.settings.auto_save
            && let Err(e) = self.persist(&device, action).await
        {
            warn!(address = %address, action = action.name(), error = %e, "Failed to save device configuration");
        }

        serde_json::to_value(&status).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Replace the cached status and hand it to the store.
    pub(crate) async fn publish_status(&self, device: &Device) -> CachedStatus {
        let status = CachedStatus::from_device(device);
        self.cache.insert(status.clone());
        if let Err(e) = self.store.record_status(&status).await {
            warn!(address = %status.address, error = %e, "Failed to record status");
        }
        self.events.send(DeviceEvent::Status {
            device: DeviceId::with_kind(device.address(), device.kind()).name(device.name()),
            status: Box::new(status.clone()),
        });
        status
    }

    /// Update the stored configuration to match what the device was told.
    async fn persist(&self, device: &Device, action: &Action) -> Result<()> {
        let address = device.address();
        let existing = self.store.get_device(address).await?;
        let name = Some(device.name().to_string());

        let mut config = match action {
            Action::SetSchedule(args) => {
                let mut config = existing.unwrap_or_else(|| DeviceConfig::new_doser(address, name));
                config.doser_mut()?.set_head_schedule(
                    args.head_index,
                    args.volume_tenths_ml,
                    ClockTime::new(args.hour, args.minute)?,
                    args.weekdays.clone().unwrap_or_else(|| Weekday::ALL.to_vec()),
                );
                config
            }
            Action::AddAutoSetting(args) => {
                let mut config = existing
                    .unwrap_or_else(|| DeviceConfig::new_light(address, name, device.model()));
                let light = config.light_mut()?;
                let levels = light.levels(std::iter::repeat(args.brightness));
                light.add_auto_program(AutoProgram {
                    id: Uuid::new_v4().simple().to_string(),
                    label: Some(
                        args.label
                            .clone()
                            .unwrap_or_else(|| format!("Auto {}-{}", args.sunrise, args.sunset)),
                    ),
                    enabled: true,
                    days: args.weekdays.clone().unwrap_or_else(|| Weekday::ALL.to_vec()),
                    sunrise: args.sunrise,
                    sunset: args.sunset,
                    ramp_minutes: u16::from(args.ramp_up_minutes),
                    levels,
                })?;
                config
            }
            Action::SetBrightness(args) => {
                let mut config = existing
                    .unwrap_or_else(|| DeviceConfig::new_light(address, name, device.model()));
                let light = config.light_mut()?;
                let color = usize::from(args.color);
                let levels = light.levels((0..).map(|i| if i == color { args.brightness } else { 0 }));
                light.set_manual(levels);
                config
            }
            _ => return Ok(()),
        };
        // Records created from a bare status carry no name yet.
        if config.name.is_none() {
            config.name = Some(device.name().to_string());
        }

        self.store.upsert_device(config).await?;
        debug!(address = %address, action = action.name(), "Device configuration saved");
        Ok(())
    }
}
