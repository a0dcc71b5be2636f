//! [`BleTransport`] over the host Bluetooth stack via btleplug.
//!
//! The adapter's central event stream is forwarded onto the transport event
//! channel: discovered peripherals become [`Advertisement`]s, link loss
//! becomes [`TransportEvent::Disconnected`], and power changes become
//! [`TransportEvent::AdapterState`]. Each connected peripheral gets one
//! notification forwarder, started on its first subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{self, Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{
    AdapterState, Advertisement, BleTransport, CharacteristicInfo, PeripheralId, TransportEvent,
    TransportEventSender, TransportEvents,
};

type PeripheralMap = Arc<RwLock<HashMap<PeripheralId, Peripheral>>>;

/// Transport backed by the first Bluetooth adapter on the host.
pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: PeripheralMap,
    events_tx: TransportEventSender,
    events_rx: Mutex<Option<TransportEvents>>,
    central_task: JoinHandle<()>,
    notification_tasks: Mutex<HashMap<PeripheralId, JoinHandle<()>>>,
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport").finish_non_exhaustive()
    }
}

impl BtleplugTransport {
    /// Open the first available adapter and start forwarding its events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] when the host has no adapter, or a
    /// Bluetooth error if the platform manager cannot be created.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DeviceNotFound("no Bluetooth adapter".to_string()))?;
        Self::with_adapter(adapter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peripherals = PeripheralMap::default();
        let central_events = adapter.events().await?;
        let central_task = tokio::spawn(forward_central_events(
            adapter.clone(),
            central_events,
            events_tx.clone(),
            peripherals.clone(),
        ));
        if let Ok(info) = adapter.adapter_info().await {
            info!(adapter = %info, "using Bluetooth adapter");
        }
        Ok(Self {
            adapter,
            peripherals,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            central_task,
            notification_tasks: Mutex::new(HashMap::new()),
        })
    }

    async fn lookup(&self, peripheral: &PeripheralId) -> Result<Peripheral> {
        self.peripherals
            .read()
            .await
            .get(peripheral)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(peripheral.to_string()))
    }

    fn characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::discovery_failed(format!("characteristic {uuid} not found")))
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<PeripheralId, JoinHandle<()>>> {
        self.notification_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn ensure_notification_forwarder(
        &self,
        id: &PeripheralId,
        peripheral: &Peripheral,
    ) -> Result<()> {
        if self.tasks().get(id).is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let mut stream = peripheral.notifications().await?;
        let tx = self.events_tx.clone();
        let forwarded_id = id.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let event = TransportEvent::Notification {
                    peripheral: forwarded_id.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!(peripheral = %forwarded_id, "notification stream ended");
        });
        self.tasks().insert(id.clone(), task);
        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.central_task.abort();
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}

/// Convert a platform peripheral id to ours.
fn peripheral_id(id: &platform::PeripheralId) -> PeripheralId {
    let raw = format!("{id:?}");
    PeripheralId::new(
        raw.trim_start_matches("PeripheralId(")
            .trim_end_matches(')'),
    )
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

async fn forward_central_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    tx: TransportEventSender,
    peripherals: PeripheralMap,
) {
    while let Some(event) = events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                match advertisement(&adapter, &id, &peripherals).await {
                    Some(ad) => TransportEvent::Advertisement(ad),
                    None => continue,
                }
            }
            CentralEvent::DeviceDisconnected(id) => TransportEvent::Disconnected {
                peripheral: peripheral_id(&id),
                reason: None,
            },
            CentralEvent::StateUpdate(state) => TransportEvent::AdapterState(adapter_state(state)),
            _ => continue,
        };
        if tx.send(forwarded).is_err() {
            break;
        }
    }
    debug!("central event stream ended");
}

async fn advertisement(
    adapter: &Adapter,
    id: &platform::PeripheralId,
    peripherals: &PeripheralMap,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => return None,
        Err(e) => {
            debug!(error = %e, "failed to read peripheral properties");
            return None;
        }
    };
    let ours = peripheral_id(id);
    peripherals.write().await.insert(ours.clone(), peripheral);
    Some(Advertisement {
        peripheral: ours,
        name: properties.local_name,
        services: properties.services,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    fn take_events(&self) -> Option<TransportEvents> {
        self.events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(adapter_state(self.adapter.adapter_state().await?))
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<()> {
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let device = self.lookup(peripheral).await?;
        if !device.is_connected().await? {
            device.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        if let Some(task) = self.tasks().remove(peripheral) {
            task.abort();
        }
        let device = self.lookup(peripheral).await?;
        device.disconnect().await?;
        Ok(())
    }

    async fn discover_services(&self, peripheral: &PeripheralId) -> Result<Vec<Uuid>> {
        let device = self.lookup(peripheral).await?;
        device.discover_services().await?;
        Ok(device.services().into_iter().map(|s| s.uuid).collect())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> Result<Vec<CharacteristicInfo>> {
        let device = self.lookup(peripheral).await?;
        let service = device
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::discovery_failed(format!("service {service} not found")))?;
        Ok(service
            .characteristics
            .iter()
            .map(|c| {
                let notify = c
                    .properties
                    .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
                CharacteristicInfo::new(c.uuid, notify)
            })
            .collect())
    }

    async fn subscribe(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<()> {
        let device = self.lookup(peripheral).await?;
        let target = Self::characteristic(&device, characteristic)?;
        self.ensure_notification_forwarder(peripheral, &device)
            .await?;
        device.subscribe(&target).await?;
        Ok(())
    }

    async fn read(&self, peripheral: &PeripheralId, characteristic: Uuid) -> Result<Vec<u8>> {
        let device = self.lookup(peripheral).await?;
        let target = Self::characteristic(&device, characteristic)?;
        Ok(device.read(&target).await?)
    }

    async fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let device = self.lookup(peripheral).await?;
        let target = Self::characteristic(&device, characteristic)?;
        device
            .write(&target, value, WriteType::WithoutResponse)
            .await
            .map_err(|e| {
                warn!(error = %e, "write failed");
                Error::WriteFailed(e.to_string())
            })
    }
}
