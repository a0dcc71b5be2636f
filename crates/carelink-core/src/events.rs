//! Typed notifications for UI layers.
//!
//! Every observable change in the cuff's lifecycle is published as a
//! [`CareEvent`] on a broadcast channel. Subscribers that fall behind miss
//! events rather than stalling the service.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use carelink_types::Reading;

use crate::link::ConnectionState;

/// Events emitted by the cuff service.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CareEvent {
    /// A measurement began, either from the app or the cuff's button.
    MeasurementStarted,
    /// A reading is available.
    MeasurementCompleted { reading: Reading },
    /// The cuff is connected and ready for commands.
    DeviceConnected { name: Option<String> },
    /// The link to the cuff was lost or closed.
    DeviceDisconnected { reason: Option<String> },
    /// A measurement was aborted or interrupted.
    MeasurementError { reason: String },
    /// New battery percentage from the cuff.
    BatteryLevelUpdated { level: u8 },
    /// The connection state machine moved between states.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl CareEvent {
    /// Stable event name, e.g. `measurement_completed`.
    pub fn name(&self) -> &'static str {
        match self {
            CareEvent::MeasurementStarted => "measurement_started",
            CareEvent::MeasurementCompleted { .. } => "measurement_completed",
            CareEvent::DeviceConnected { .. } => "device_connected",
            CareEvent::DeviceDisconnected { .. } => "device_disconnected",
            CareEvent::MeasurementError { .. } => "measurement_error",
            CareEvent::BatteryLevelUpdated { .. } => "battery_level_updated",
            CareEvent::StateChanged { .. } => "state_changed",
        }
    }
}

/// Sender for cuff events.
pub type EventSender = broadcast::Sender<CareEvent>;

/// Receiver for cuff events.
pub type EventReceiver = broadcast::Receiver<CareEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: CareEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
