//! Device event system.
//!
//! The controller broadcasts an event for every connection change, status
//! update and finished command. Events are serializable so that a front end
//! can forward them as they are.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use aquable_types::DeviceKind;

use crate::cache::CachedStatus;
use crate::pipeline::CommandStatus;

/// Device identifier for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub address: String,
    /// Advertised name if known.
    pub name: Option<String>,
    pub kind: Option<DeviceKind>,
}

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            kind: None,
        }
    }

    pub fn with_kind(address: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(address)
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Events emitted by the controller.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A supported device was seen during a scan.
    Discovered { device: DeviceId, rssi: Option<i16> },
    Connected { device: DeviceId },
    Disconnected {
        device: DeviceId,
        reason: DisconnectReason,
    },
    /// A fresh status replaced the cached one.
    Status {
        device: DeviceId,
        status: Box<CachedStatus>,
    },
    /// A command reached a terminal state.
    CommandFinished {
        device: DeviceId,
        command_id: String,
        action: String,
        status: CommandStatus,
    },
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    UserRequested,
    Shutdown,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event. Having no receivers is fine.
    pub fn send(&self, event: DeviceEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = DeviceEvent::Disconnected {
            device: DeviceId::with_kind("AA:BB", DeviceKind::Light).name("DYNA2001122334455"),
            reason: DisconnectReason::UserRequested,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "disconnected");
        assert_eq!(json["device"]["kind"], "light");
        assert_eq!(json["reason"], "user_requested");
    }

    #[tokio::test]
    async fn test_dispatcher_broadcasts() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);

        dispatcher.send(DeviceEvent::Connected {
            device: DeviceId::new("AA:BB"),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DeviceEvent::Connected { device } if device.address == "AA:BB"));
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.send(DeviceEvent::Connected {
            device: DeviceId::new("AA:BB"),
        });
    }
}
