//! Shared device-handle machinery and the [`Device`] variant.
//!
//! A handle connects lazily on its first send, waits a short settle delay,
//! and drops the link after a period without traffic. Every frame takes a
//! fresh message id from the handle's session and is sent with the frame
//! retry preset.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aquable_types::{DeviceKind, DeviceModel, DeviceStatus, MessageId};

use crate::codec;
use crate::decoder::decode_notification;
use crate::doser::Doser;
use crate::error::{Error, Result};
use crate::light::Light;
use crate::retry::{RetryConfig, with_retry};
use crate::session::{MessageIdSession, SessionInfo, SessionLimits};
use crate::traits::{DeviceHandle, NotificationHandler, Transport};

/// Delay after connecting before the first write.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Idle period after which the link is dropped.
pub const DEFAULT_IDLE_DISCONNECT: Duration = Duration::from_secs(120);

/// Per-handle behavior.
#[derive(Debug, Clone)]
pub struct HandleConfig {
    pub settle_delay: Duration,
    /// `None` keeps the link up until an explicit disconnect.
    pub idle_disconnect: Option<Duration>,
    pub send_retry: RetryConfig,
    pub session: SessionLimits,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            idle_disconnect: Some(DEFAULT_IDLE_DISCONNECT),
            send_retry: RetryConfig::for_frame(),
            session: SessionLimits::default(),
        }
    }
}

impl HandleConfig {
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn idle_disconnect(mut self, idle: Option<Duration>) -> Self {
        self.idle_disconnect = idle;
        self
    }

    #[must_use]
    pub fn session(mut self, limits: SessionLimits) -> Self {
        self.session = limits;
        self
    }
}

/// State shared by both device kinds.
pub(crate) struct HandleCore {
    name: String,
    model: &'static DeviceModel,
    transport: Arc<dyn Transport>,
    session: Mutex<MessageIdSession>,
    status: Arc<watch::Sender<Option<DeviceStatus>>>,
    connect_lock: Mutex<()>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    config: HandleConfig,
}

impl std::fmt::Debug for HandleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCore")
            .field("name", &self.name)
            .field("address", &self.transport.address())
            .field("model", &self.model.name)
            .finish_non_exhaustive()
    }
}

impl HandleCore {
    pub(crate) fn new(
        name: String,
        model: &'static DeviceModel,
        transport: Arc<dyn Transport>,
        config: HandleConfig,
    ) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            name,
            model,
            transport,
            session: Mutex::new(MessageIdSession::new(config.session)),
            status: Arc::new(status),
            connect_lock: Mutex::new(()),
            idle_timer: Mutex::new(None),
            config,
        }
    }

    pub(crate) fn kind(&self) -> DeviceKind {
        self.model.kind
    }

    pub(crate) fn address(&self) -> &str {
        self.transport.address()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn model(&self) -> &'static DeviceModel {
        self.model
    }

    fn notification_handler(&self) -> NotificationHandler {
        let kind = self.kind();
        let status = Arc::clone(&self.status);
        Arc::new(move |data: &[u8]| {
            if let Some(decoded) = decode_notification(kind, data) {
                status.send_replace(Some(decoded));
            }
        })
    }

    pub(crate) fn handle_notification(&self, data: &[u8]) {
        (self.notification_handler())(data);
    }

    pub(crate) fn last_status(&self) -> Option<DeviceStatus> {
        self.status.borrow().clone()
    }

    /// A receiver that only observes statuses decoded after this call.
    pub(crate) fn status_receiver(&self) -> watch::Receiver<Option<DeviceStatus>> {
        let mut rx = self.status.subscribe();
        rx.borrow_and_update();
        rx
    }

    pub(crate) async fn wait_on(
        &self,
        mut rx: watch::Receiver<Option<DeviceStatus>>,
        timeout: Duration,
    ) -> Option<DeviceStatus> {
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => rx.borrow_and_update().clone(),
            Ok(Err(_)) | Err(_) => {
                warn!(
                    address = %self.address(),
                    timeout = ?timeout,
                    "No status notification received"
                );
                self.last_status()
            }
        }
    }

    pub(crate) async fn wait_for_status(&self, timeout: Duration) -> Option<DeviceStatus> {
        let rx = self.status_receiver();
        self.wait_on(rx, timeout).await
    }

    pub(crate) async fn session_info(&self) -> SessionInfo {
        self.session.lock().await.info()
    }

    async fn ensure_connected(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.transport.is_connected().await {
            return Ok(());
        }
        info!(address = %self.address(), model = self.model.name, "Connecting");
        self.transport.connect(self.notification_handler()).await?;
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// Build a frame with the next message id and send it.
    pub(crate) async fn send<F>(&self, label: &str, build: F) -> Result<()>
    where
        F: FnOnce(MessageId) -> Result<Vec<u8>>,
    {
        let frame = {
            let mut session = self.session.lock().await;
            let frame = build(session.next_id())?;
            if let (Some(hi), Some(lo)) = (frame.get(3), frame.get(4)) {
                session.record_used(MessageId::new(*hi, *lo)?);
            }
            frame
        };
        debug!(address = %self.address(), frame = label, bytes = ?frame, "Sending frame");

        with_retry(&self.config.send_retry, label, || async {
            self.ensure_connected().await?;
            self.transport.write(&frame).await
        })
        .await?;

        self.restart_idle_timer().await;
        Ok(())
    }

    /// Bring the link up now instead of on the first send.
    pub(crate) async fn connect(&self) -> Result<()> {
        self.ensure_connected().await?;
        self.restart_idle_timer().await;
        Ok(())
    }

    pub(crate) async fn request_status(&self) -> Result<()> {
        self.send("status_request", codec::status_request).await
    }

    /// Request status and wait for the resulting notification.
    pub(crate) async fn refresh_status(&self, timeout: Duration) -> Result<Option<DeviceStatus>> {
        let rx = self.status_receiver();
        self.request_status().await?;
        Ok(self.wait_on(rx, timeout).await)
    }

    async fn restart_idle_timer(&self) {
        let Some(idle) = self.config.idle_disconnect else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let mut timer = self.idle_timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            debug!(address = %transport.address(), "Idle, disconnecting");
            if let Err(e) = transport.disconnect().await {
                debug!(address = %transport.address(), error = %e, "Idle disconnect failed");
            }
        }));
    }

    pub(crate) async fn disconnect(&self) -> Result<()> {
        if let Some(timer) = self.idle_timer.lock().await.take() {
            timer.abort();
        }
        info!(address = %self.address(), "Disconnecting");
        self.transport.disconnect().await
    }
}

impl Drop for HandleCore {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.idle_timer.try_lock() {
            if let Some(timer) = timer.take() {
                timer.abort();
            }
        }
    }
}

/// A live handle for either device kind.
#[derive(Debug)]
pub enum Device {
    Doser(Doser),
    Light(Light),
}

impl Device {
    /// Wrap a transport in the handle matching the model's kind.
    pub fn new(
        name: impl Into<String>,
        model: &'static DeviceModel,
        transport: Arc<dyn Transport>,
        config: HandleConfig,
    ) -> Self {
        let core = HandleCore::new(name.into(), model, transport, config);
        match model.kind {
            DeviceKind::Doser => Device::Doser(Doser::from_core(core)),
            DeviceKind::Light => Device::Light(Light::from_core(core)),
        }
    }

    fn core(&self) -> &HandleCore {
        match self {
            Device::Doser(d) => d.core(),
            Device::Light(l) => l.core(),
        }
    }

    #[must_use]
    pub fn as_doser(&self) -> Option<&Doser> {
        match self {
            Device::Doser(d) => Some(d),
            Device::Light(_) => None,
        }
    }

    #[must_use]
    pub fn as_light(&self) -> Option<&Light> {
        match self {
            Device::Light(l) => Some(l),
            Device::Doser(_) => None,
        }
    }

    /// Doser handle or a [`Error::WrongType`].
    pub fn doser(&self) -> Result<&Doser> {
        self.as_doser().ok_or_else(|| self.wrong_type(DeviceKind::Doser))
    }

    /// Light handle or a [`Error::WrongType`].
    pub fn light(&self) -> Result<&Light> {
        self.as_light().ok_or_else(|| self.wrong_type(DeviceKind::Light))
    }

    fn wrong_type(&self, expected: DeviceKind) -> Error {
        Error::WrongType {
            address: self.address().to_string(),
            expected,
            actual: self.kind(),
        }
    }

    /// Connect the radio link.
    pub async fn connect(&self) -> Result<()> {
        self.core().connect().await
    }

    /// Request status and wait up to `timeout` for the notification.
    pub async fn refresh_status(&self, timeout: Duration) -> Result<Option<DeviceStatus>> {
        self.core().refresh_status(timeout).await
    }

    pub async fn session_info(&self) -> SessionInfo {
        self.core().session_info().await
    }
}

#[async_trait]
impl DeviceHandle for Device {
    fn kind(&self) -> DeviceKind {
        self.core().kind()
    }

    fn address(&self) -> &str {
        self.core().address()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn model(&self) -> &'static DeviceModel {
        self.core().model()
    }

    async fn request_status(&self) -> Result<()> {
        self.core().request_status().await
    }

    fn handle_notification(&self, data: &[u8]) {
        self.core().handle_notification(data);
    }

    fn last_status(&self) -> Option<DeviceStatus> {
        self.core().last_status()
    }

    async fn wait_for_status(&self, timeout: Duration) -> Option<DeviceStatus> {
        self.core().wait_for_status(timeout).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.core().disconnect().await
    }
}
