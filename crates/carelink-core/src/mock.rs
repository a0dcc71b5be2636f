//! Mock transport for testing without BLE hardware.
//!
//! [`MockTransport`] implements [`BleTransport`] with a scripted cuff: it
//! answers discovery with the cuff's GATT layout, records every write, and
//! exposes hooks to inject advertisements, notifications, adapter changes
//! and link loss.
//!
//! # Features
//!
//! - **Auto advertise**: report the cuff as soon as a scan starts
//! - **Auto reply**: answer the start command with a result packet
//! - **Failure injection**: fail connects or writes on demand

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use carelink_types::packet::{START_COMMAND, encode_measurement};
use carelink_types::uuid::{
    BATTERY_LEVEL, BATTERY_SERVICE, CUFF_SERVICE, NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC,
};

use crate::error::{AdapterFailure, Error, Result};
use crate::transport::{
    AdapterState, Advertisement, BleTransport, CharacteristicInfo, PeripheralId, TransportEvent,
    TransportEventSender, TransportEvents,
};

/// A scripted cuff behind a fake adapter.
///
/// # Example
///
/// ```
/// use carelink_core::MockTransportBuilder;
///
/// let transport = MockTransportBuilder::new()
///     .name("KN-550BT 01")
///     .auto_advertise(true)
///     .reply_to_start(120, 80, 72)
///     .build();
/// assert!(!transport.is_connected());
/// ```
pub struct MockTransport {
    id: PeripheralId,
    name: String,
    adapter: Mutex<AdapterState>,
    events_tx: TransportEventSender,
    events_rx: Mutex<Option<TransportEvents>>,
    characteristics: HashMap<Uuid, Vec<CharacteristicInfo>>,
    battery: AtomicU8,
    has_battery: bool,
    connected: AtomicBool,
    scanning: AtomicBool,
    auto_advertise: bool,
    start_reply: Mutex<Option<Vec<u8>>>,
    connect_failure: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    subscriptions: Mutex<Vec<Uuid>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .finish()
    }
}

fn guard<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a powered-on mock cuff with default values.
    pub fn new(name: &str) -> Self {
        MockTransportBuilder::new().name(name).build()
    }

    /// Peripheral id of the mock cuff.
    pub fn peripheral(&self) -> &PeripheralId {
        &self.id
    }

    /// Advertised name of the mock cuff.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed)
    }

    /// Every value written so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        guard(&self.writes).clone()
    }

    /// Characteristics with notifications enabled.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        guard(&self.subscriptions).clone()
    }

    // --- test hooks ---

    /// Report the mock cuff as seen by the scanner.
    pub fn advertise(&self) {
        self.emit(TransportEvent::Advertisement(self.advertisement()));
    }

    /// Report an arbitrary advertisement.
    pub fn advertise_device(&self, advertisement: Advertisement) {
        self.emit(TransportEvent::Advertisement(advertisement));
    }

    /// Push bytes on the notify characteristic.
    pub fn notify(&self, value: &[u8]) {
        self.emit(TransportEvent::Notification {
            peripheral: self.id.clone(),
            characteristic: NOTIFY_CHARACTERISTIC,
            value: value.to_vec(),
        });
    }

    /// Push a new battery level.
    pub fn notify_battery(&self, level: u8) {
        self.battery.store(level, Ordering::Relaxed);
        self.emit(TransportEvent::Notification {
            peripheral: self.id.clone(),
            characteristic: BATTERY_LEVEL,
            value: vec![level],
        });
    }

    /// Simulate the cuff dropping the link.
    pub fn drop_link(&self, reason: Option<&str>) {
        self.connected.store(false, Ordering::Relaxed);
        self.emit(TransportEvent::Disconnected {
            peripheral: self.id.clone(),
            reason: reason.map(str::to_string),
        });
    }

    /// Change the adapter state and report it.
    pub fn set_adapter_state(&self, state: AdapterState) {
        *guard(&self.adapter) = state;
        self.emit(TransportEvent::AdapterState(state));
    }

    /// Answer the next start commands with this packet, or stop answering.
    pub fn set_start_reply(&self, reply: Option<Vec<u8>>) {
        *guard(&self.start_reply) = reply;
    }

    /// Make connects fail with `reason`, or succeed again with `None`.
    pub fn set_connect_failure(&self, reason: Option<&str>) {
        *guard(&self.connect_failure) = reason.map(str::to_string);
    }

    /// Make writes fail.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            peripheral: self.id.clone(),
            name: Some(self.name.clone()),
            services: vec![CUFF_SERVICE],
            rssi: Some(-55),
        }
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver may already be gone during teardown.
        let _ = self.events_tx.send(event);
    }

    fn check_peripheral(&self, peripheral: &PeripheralId) -> Result<()> {
        if peripheral != &self.id {
            return Err(Error::connection_failed(format!(
                "unknown peripheral {peripheral}"
            )));
        }
        if !self.is_connected() {
            return Err(Error::connection_failed("not connected"));
        }
        Ok(())
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    fn take_events(&self) -> Option<TransportEvents> {
        guard(&self.events_rx).take()
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(*guard(&self.adapter))
    }

    async fn start_scan(&self, _services: &[Uuid]) -> Result<()> {
        let state = *guard(&self.adapter);
        if let Some(failure) = state.failure() {
            return Err(Error::AdapterUnavailable(failure));
        }
        self.scanning.store(true, Ordering::Relaxed);
        if self.auto_advertise {
            self.advertise();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanning.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        if let Some(reason) = guard(&self.connect_failure).clone() {
            return Err(Error::connection_failed(reason));
        }
        if !guard(&self.adapter).is_powered_on() {
            return Err(Error::AdapterUnavailable(AdapterFailure::PoweredOff));
        }
        if peripheral != &self.id {
            return Err(Error::connection_failed(format!(
                "unknown peripheral {peripheral}"
            )));
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        if peripheral == &self.id && self.connected.swap(false, Ordering::Relaxed) {
            self.emit(TransportEvent::Disconnected {
                peripheral: peripheral.clone(),
                reason: None,
            });
        }
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>> {
        self.check_peripheral(peripheral)?;
        let mut services = vec![CUFF_SERVICE];
        if self.has_battery {
            services.push(BATTERY_SERVICE);
        }
        Ok(services)
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>> {
        self.check_peripheral(peripheral)?;
        Ok(self
            .characteristics
            .get(&service)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()> {
        self.check_peripheral(peripheral)?;
        guard(&self.subscriptions).push(characteristic);
        Ok(())
    }

    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<Vec<u8>> {
        self.check_peripheral(peripheral)?;
        if characteristic == BATTERY_LEVEL && self.has_battery {
            Ok(vec![self.battery.load(Ordering::Relaxed)])
        } else {
            Err(Error::discovery_failed(format!(
                "characteristic {characteristic} not readable"
            )))
        }
    }

    async fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.check_peripheral(peripheral)?;
        if characteristic != WRITE_CHARACTERISTIC {
            return Err(Error::WriteFailed(format!(
                "characteristic {characteristic} not writable"
            )));
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::WriteFailed("mock write failure".to_string()));
        }
        guard(&self.writes).push(value.to_vec());
        if value == START_COMMAND
            && let Some(reply) = guard(&self.start_reply).clone()
        {
            self.notify(&reply);
        }
        Ok(())
    }
}

/// Builder for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    name: String,
    adapter: AdapterState,
    battery: Option<u8>,
    battery_notifies: bool,
    auto_advertise: bool,
    start_reply: Option<Vec<u8>>,
    omit_write_characteristic: bool,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            name: "KN-550BT".to_string(),
            adapter: AdapterState::PoweredOn,
            battery: Some(85),
            battery_notifies: true,
            auto_advertise: false,
            start_reply: None,
            omit_write_characteristic: false,
        }
    }
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Initial adapter state.
    #[must_use]
    pub fn adapter_state(mut self, state: AdapterState) -> Self {
        self.adapter = state;
        self
    }

    /// Battery level, or `None` to omit the battery service.
    #[must_use]
    pub fn battery(mut self, level: Option<u8>) -> Self {
        self.battery = level;
        self
    }

    /// Whether the battery level characteristic supports notify.
    #[must_use]
    pub fn battery_notifies(mut self, notifies: bool) -> Self {
        self.battery_notifies = notifies;
        self
    }

    /// Advertise the cuff as soon as a scan starts.
    #[must_use]
    pub fn auto_advertise(mut self, enabled: bool) -> Self {
        self.auto_advertise = enabled;
        self
    }

    /// Answer the start command with a result packet.
    #[must_use]
    pub fn reply_to_start(mut self, systolic: u16, diastolic: u16, pulse: u16) -> Self {
        self.start_reply = Some(encode_measurement(systolic, diastolic, pulse).to_vec());
        self
    }

    /// Leave the write characteristic out of the GATT layout.
    #[must_use]
    pub fn omit_write_characteristic(mut self, omit: bool) -> Self {
        self.omit_write_characteristic = omit;
        self
    }

    pub fn build(self) -> MockTransport {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut cuff_chars = vec![CharacteristicInfo::new(NOTIFY_CHARACTERISTIC, true)];
        if !self.omit_write_characteristic {
            cuff_chars.push(CharacteristicInfo::new(WRITE_CHARACTERISTIC, false));
        }
        let mut characteristics = HashMap::from([(CUFF_SERVICE, cuff_chars)]);
        if self.battery.is_some() {
            characteristics.insert(
                BATTERY_SERVICE,
                vec![CharacteristicInfo::new(BATTERY_LEVEL, self.battery_notifies)],
            );
        }

        MockTransport {
            id: PeripheralId::new(format!("MOCK-{:06X}", rand::random::<u32>() % 0xFFFFFF)),
            name: self.name,
            adapter: Mutex::new(self.adapter),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            characteristics,
            battery: AtomicU8::new(self.battery.unwrap_or(0)),
            has_battery: self.battery.is_some(),
            connected: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            auto_advertise: self.auto_advertise,
            start_reply: Mutex::new(self.start_reply),
            connect_failure: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}
