//! Platform seam between the state machine and a Bluetooth stack.
//!
//! [`BleTransport`] exposes just the GATT operations the cuff needs. Calls
//! are request/response; anything the radio reports on its own (adapter
//! power changes, advertisements, link loss, notifications) arrives as a
//! [`TransportEvent`] on the channel handed out by
//! [`BleTransport::take_events`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AdapterFailure, Result};

/// Opaque identifier of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The platform identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Power and permission state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Returns true when the radio can scan and connect.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }

    /// Returns true for states that will not resolve without user action.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, AdapterState::Unsupported | AdapterState::Unauthorized)
    }

    /// Failure reason for any state other than powered on.
    pub fn failure(&self) -> Option<AdapterFailure> {
        match self {
            AdapterState::PoweredOn => None,
            AdapterState::PoweredOff => Some(AdapterFailure::PoweredOff),
            AdapterState::Unauthorized => Some(AdapterFailure::Unauthorized),
            AdapterState::Unsupported => Some(AdapterFailure::Unsupported),
            AdapterState::Resetting => Some(AdapterFailure::Resetting),
            AdapterState::Unknown => Some(AdapterFailure::Unknown),
        }
    }
}

/// A scan result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Peripheral that advertised.
    pub peripheral: PeripheralId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A characteristic found during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Whether the characteristic supports notifications.
    pub notify: bool,
}

impl CharacteristicInfo {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, notify: bool) -> Self {
        Self { uuid, notify }
    }
}

/// Unsolicited events from the platform stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The adapter changed power or permission state.
    AdapterState(AdapterState),
    /// A peripheral was seen while scanning.
    Advertisement(Advertisement),
    /// A peripheral link went down.
    Disconnected {
        peripheral: PeripheralId,
        reason: Option<String>,
    },
    /// A subscribed characteristic changed value.
    Notification {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Receiving half of a transport's event channel.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of a transport's event channel.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// GATT operations needed to drive the cuff.
///
/// Implemented by [`BtleplugTransport`](crate::BtleplugTransport) for real
/// hardware and [`MockTransport`](crate::MockTransport) for tests.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Take the event channel. Returns `None` after the first call.
    fn take_events(&self) -> Option<TransportEvents>;

    /// Current adapter state.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Begin scanning, filtered to `services` where the platform supports it.
    async fn start_scan(&self, services: &[Uuid]) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a link to a peripheral.
    async fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Close or cancel a link.
    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Discover primary services.
    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>>;

    /// List the characteristics of one service.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()>;

    /// Read a characteristic value.
    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a characteristic value without response.
    async fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;
}
