//! Connection lifecycle state machine.
//!
//! [`ConnectionStateMachine`] owns the adapter/peripheral lifecycle of the
//! cuff and nothing else. It never performs I/O itself: requests and
//! platform events go in, and a list of [`LinkOutput`]s comes out for the
//! driver to execute. Timers are requested with [`LinkAction::ArmTimer`] and
//! reported back with [`LinkInput::Timer`]; every timer carries a generation
//! so one that was superseded is ignored when it fires.
//!
//! ```text
//! Uninitialized -> Initializing -> Idle -> Scanning -> Connecting
//!     -> DiscoveringServices -> DiscoveringCharacteristics -> Ready
//!     -> Disconnected
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use carelink_types::packet::{decode_battery, to_hex};
use carelink_types::uuid::{
    BATTERY_LEVEL, BATTERY_SERVICE, CUFF_SERVICE, NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC,
    name_matches,
};

use crate::config::CuffConfig;
use crate::error::{AdapterFailure, Error, Result};
use crate::events::CareEvent;
use crate::transport::{AdapterState, Advertisement, CharacteristicInfo, PeripheralId};

/// Battery level assumed until the cuff reports one.
pub const DEFAULT_BATTERY_LEVEL: u8 = 100;

/// Lifecycle state of the link to the cuff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnected,
}

impl ConnectionState {
    /// Returns true once `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        !matches!(
            self,
            ConnectionState::Uninitialized | ConnectionState::Initializing
        )
    }

    /// Returns true between picking a peripheral and reaching `Ready`.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::DiscoveringCharacteristics
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::DiscoveringServices => "discovering services",
            ConnectionState::DiscoveringCharacteristics => "discovering characteristics",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// What a timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounded wait for the adapter during `initialize`.
    Initialize,
    /// Scan window.
    Scan,
    /// Measurement fallback.
    Measurement,
}

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    kind: TimerKind,
    generation: u64,
}

impl TimerId {
    /// What this timer guards.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

/// Hands out timer ids with strictly increasing generations.
#[derive(Debug, Default)]
pub(crate) struct TimerIds {
    next: u64,
}

impl TimerIds {
    pub(crate) fn next(&mut self, kind: TimerKind) -> TimerId {
        self.next += 1;
        TimerId {
            kind,
            generation: self.next,
        }
    }
}

/// Long-running requests that complete asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `initialize`: resolves when the adapter is usable.
    Initialize,
    /// `scan`: resolves when the cuff is `Ready` or the attempt fails.
    Connect,
}

/// Inputs from the platform and from the driver's timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    /// The adapter reported a new state.
    AdapterStateChanged(AdapterState),
    /// A previously armed timer fired.
    Timer(TimerId),
    /// A peripheral advertised while scanning.
    Advertisement(Advertisement),
    /// Outcome of [`LinkAction::Connect`].
    ConnectResult {
        peripheral: PeripheralId,
        result: std::result::Result<(), String>,
    },
    /// Outcome of [`LinkAction::DiscoverServices`].
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: std::result::Result<Vec<Uuid>, String>,
    },
    /// Outcome of [`LinkAction::DiscoverCharacteristics`].
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: std::result::Result<Vec<CharacteristicInfo>, String>,
    },
    /// Outcome of a battery [`LinkAction::Read`].
    BatteryRead {
        peripheral: PeripheralId,
        result: std::result::Result<Vec<u8>, String>,
    },
    /// The link to a peripheral went down.
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

/// Radio side effects for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Ask the platform for the current adapter state.
    QueryAdapter,
    StartScan { services: Vec<Uuid> },
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
    },
    Subscribe {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    Read {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    Write {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// Deliver [`LinkInput::Timer`] after `after`.
    ArmTimer { timer: TimerId, after: Duration },
}

/// Everything the state machine can produce.
#[derive(Debug)]
pub enum LinkOutput {
    /// Perform a radio operation or arm a timer.
    Action(LinkAction),
    /// Resolve an outstanding request.
    Completed {
        op: Operation,
        result: Result<()>,
    },
    /// Publish to observers.
    Event(CareEvent),
    /// Raw bytes from the notify characteristic, for the codec.
    Packet(Vec<u8>),
}

/// Point-in-time copy of the link's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub adapter: AdapterState,
    pub device_name: Option<String>,
    pub battery_level: u8,
    pub measuring: bool,
}

impl LinkStatus {
    /// Returns true when commands can be written.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Returns true while scanning.
    pub fn is_scanning(&self) -> bool {
        self.state == ConnectionState::Scanning
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            adapter: AdapterState::Unknown,
            device_name: None,
            battery_level: DEFAULT_BATTERY_LEVEL,
            measuring: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    peripheral: PeripheralId,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct Handles {
    notify: Option<Uuid>,
    write: Option<Uuid>,
    battery: Option<Uuid>,
}

/// Drives the adapter and peripheral lifecycle.
///
/// Writes are only ever issued once both the notify and the write
/// characteristic have been resolved. At most one [`Operation::Connect`]
/// request is outstanding at a time; a failure during connect or discovery
/// resolves that request and leaves the machine able to scan again.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    init_timeout: Duration,
    name_patterns: Vec<String>,
    discover_battery: bool,
    state: ConnectionState,
    adapter: AdapterState,
    target: Option<Target>,
    handles: Handles,
    battery_level: u8,
    timers: TimerIds,
    init_timer: Option<TimerId>,
    scan_timer: Option<TimerId>,
    pending_connect: bool,
    out: Vec<LinkOutput>,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Uninitialized` state.
    pub fn new(config: &CuffConfig) -> Self {
        Self {
            init_timeout: config.init_timeout,
            name_patterns: config.name_patterns.clone(),
            discover_battery: config.discover_battery,
            state: ConnectionState::Uninitialized,
            adapter: AdapterState::Unknown,
            target: None,
            handles: Handles::default(),
            battery_level: DEFAULT_BATTERY_LEVEL,
            timers: TimerIds::default(),
            init_timer: None,
            scan_timer: None,
            pending_connect: false,
            out: Vec::new(),
        }
    }

    // --- queries ---

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ConnectionState::Scanning
    }

    /// Name of the cuff, once it is ready.
    pub fn connected_device_name(&self) -> Option<&str> {
        if self.is_ready() {
            self.target.as_ref().and_then(|t| t.name.as_deref())
        } else {
            None
        }
    }

    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    /// Peripheral currently targeted, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        self.target.as_ref().map(|t| &t.peripheral)
    }

    /// Snapshot of the observable state.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            adapter: self.adapter,
            device_name: self.connected_device_name().map(str::to_string),
            battery_level: self.battery_level,
            measuring: false,
        }
    }

    // --- requests ---

    /// Start (or confirm) initialization.
    ///
    /// Completes immediately when the adapter is already powered on,
    /// otherwise waits for a power-on report bounded by the init timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if initialization is already in progress.
    pub fn initialize(&mut self) -> Result<Vec<LinkOutput>> {
        match self.state {
            ConnectionState::Initializing => {
                return Err(Error::busy("initialization already in progress"));
            }
            ConnectionState::Uninitialized | ConnectionState::Disconnected => {
                if self.adapter.is_powered_on() {
                    self.transition(ConnectionState::Idle);
                    self.complete(Operation::Initialize, Ok(()));
                } else {
                    self.transition(ConnectionState::Initializing);
                    let timer = self.timers.next(TimerKind::Initialize);
                    self.init_timer = Some(timer);
                    self.act(LinkAction::QueryAdapter);
                    self.act(LinkAction::ArmTimer {
                        timer,
                        after: self.init_timeout,
                    });
                }
            }
            _ => self.complete(Operation::Initialize, Ok(())),
        }
        Ok(self.drain())
    }

    /// Scan for a cuff and connect to the first match.
    ///
    /// The returned outputs start the scan; the [`Operation::Connect`]
    /// completion arrives later, once the cuff is ready or the attempt
    /// fails. Calling `scan` while already scanning restarts the scan.
    ///
    /// # Errors
    ///
    /// Fails without changing state if not initialized, if the adapter is
    /// not powered on, or if a connection is ready or being set up.
    pub fn scan(&mut self, timeout: Duration) -> Result<Vec<LinkOutput>> {
        if !self.state.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if let Some(failure) = self.adapter.failure() {
            return Err(Error::AdapterUnavailable(failure));
        }
        match self.state {
            ConnectionState::Ready => return Err(Error::busy("already connected")),
            s if s.is_connecting() && self.pending_connect => {
                return Err(Error::busy("connection already in progress"));
            }
            ConnectionState::Scanning => {
                debug!("restarting scan");
                self.act(LinkAction::StopScan);
                self.fail_connect(Error::connection_failed("scan restarted"));
            }
            s if s.is_connecting() => {
                // Discovery stalled after an earlier failure; drop that link.
                if let Some(target) = self.target.take() {
                    self.act(LinkAction::CancelConnection(target.peripheral));
                }
                self.handles = Handles::default();
            }
            _ => {}
        }

        self.pending_connect = true;
        let timer = self.timers.next(TimerKind::Scan);
        self.scan_timer = Some(timer);
        self.transition(ConnectionState::Scanning);
        info!(timeout_secs = timeout.as_secs_f32(), "scanning for cuff");
        self.act(LinkAction::StartScan {
            services: vec![CUFF_SERVICE],
        });
        self.act(LinkAction::ArmTimer {
            timer,
            after: timeout,
        });
        Ok(self.drain())
    }

    /// Queue a write to the cuff's command characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] unless the state is `Ready`; nothing is
    /// sent in that case.
    pub fn write(&mut self, value: &[u8]) -> Result<Vec<LinkOutput>> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotReady);
        }
        let (Some(target), Some(characteristic)) = (&self.target, self.handles.write) else {
            return Err(Error::NotReady);
        };
        debug!(bytes = %to_hex(value), "write");
        let action = LinkAction::Write {
            peripheral: target.peripheral.clone(),
            characteristic,
            value: value.to_vec(),
        };
        self.act(action);
        Ok(self.drain())
    }

    /// Stop scanning and close the current link, if any.
    ///
    /// The move to `Disconnected` happens when the platform reports the
    /// link is down.
    pub fn disconnect(&mut self) -> Vec<LinkOutput> {
        if self.state == ConnectionState::Scanning {
            self.scan_timer = None;
            self.act(LinkAction::StopScan);
            self.transition(ConnectionState::Idle);
            self.fail_connect(Error::connection_failed("scan cancelled"));
        }
        if let Some(target) = &self.target {
            let peripheral = target.peripheral.clone();
            self.act(LinkAction::CancelConnection(peripheral));
        }
        self.drain()
    }

    // --- events ---

    /// Feed one platform event or timer expiry.
    pub fn handle(&mut self, input: LinkInput) -> Vec<LinkOutput> {
        match input {
            LinkInput::AdapterStateChanged(state) => self.on_adapter_state(state),
            LinkInput::Timer(timer) => self.on_timer(timer),
            LinkInput::Advertisement(ad) => self.on_advertisement(ad),
            LinkInput::ConnectResult { peripheral, result } => {
                self.on_connect_result(&peripheral, result)
            }
            LinkInput::ServicesDiscovered { peripheral, result } => {
                self.on_services(&peripheral, result)
            }
            LinkInput::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.on_characteristics(&peripheral, service, result),
            LinkInput::BatteryRead { peripheral, result } => {
                if self.is_target(&peripheral) {
                    match result {
                        Ok(value) => self.update_battery(&value),
                        Err(reason) => debug!(%reason, "battery read failed"),
                    }
                }
            }
            LinkInput::Disconnected { peripheral, reason } => {
                self.on_disconnected(&peripheral, reason)
            }
            LinkInput::Notification {
                peripheral,
                characteristic,
                value,
            } => {
                if !self.is_target(&peripheral) {
                    return Vec::new();
                }
                if Some(characteristic) == self.handles.notify {
                    self.out.push(LinkOutput::Packet(value));
                } else if Some(characteristic) == self.handles.battery {
                    self.update_battery(&value);
                }
            }
        }
        self.drain()
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        debug!(?state, "adapter state");
        self.adapter = state;

        if self.state == ConnectionState::Initializing {
            if state.is_powered_on() {
                self.init_timer = None;
                self.transition(ConnectionState::Idle);
                self.complete(Operation::Initialize, Ok(()));
            } else if state.is_terminal_failure() {
                self.init_timer = None;
                self.transition(ConnectionState::Uninitialized);
                let failure = state.failure().unwrap_or(AdapterFailure::Unknown);
                self.complete(
                    Operation::Initialize,
                    Err(Error::AdapterUnavailable(failure)),
                );
            }
            return;
        }

        if let Some(failure) = state.failure()
            && self.state.is_initialized()
        {
            warn!(%failure, from = %self.state, "adapter no longer usable");
            self.scan_timer = None;
            let was_ready = self.state == ConnectionState::Ready;
            self.target = None;
            self.handles = Handles::default();
            self.fail_connect(Error::AdapterUnavailable(failure));
            self.transition(ConnectionState::Uninitialized);
            if was_ready {
                self.event(CareEvent::DeviceDisconnected {
                    reason: Some(failure.to_string()),
                });
            }
        }
    }

    fn on_timer(&mut self, timer: TimerId) {
        if self.init_timer == Some(timer) && self.state == ConnectionState::Initializing {
            self.init_timer = None;
            let failure = self.adapter.failure().unwrap_or(AdapterFailure::Unknown);
            warn!(%failure, "adapter not ready in time");
            self.transition(ConnectionState::Uninitialized);
            self.complete(
                Operation::Initialize,
                Err(Error::AdapterUnavailable(failure)),
            );
        } else if self.scan_timer == Some(timer) && self.state == ConnectionState::Scanning {
            self.scan_timer = None;
            info!("scan timed out without finding a cuff");
            self.act(LinkAction::StopScan);
            self.transition(ConnectionState::Idle);
            self.fail_connect(Error::DeviceNotFound(
                "no cuff found; make sure it is switched on".to_string(),
            ));
        } else {
            debug!(?timer, "ignoring stale timer");
        }
    }

    fn on_advertisement(&mut self, ad: Advertisement) {
        if self.state != ConnectionState::Scanning || self.target.is_some() {
            return;
        }
        if !ad.services.contains(&CUFF_SERVICE) {
            return;
        }
        let Some(name) = ad.name.as_deref() else {
            return;
        };
        if !name_matches(name, &self.name_patterns) {
            debug!(device = name, "ignoring non-matching device");
            return;
        }

        info!(peripheral = %ad.peripheral, device = name, rssi = ?ad.rssi, "found cuff");
        self.scan_timer = None;
        self.act(LinkAction::StopScan);
        self.target = Some(Target {
            peripheral: ad.peripheral.clone(),
            name: ad.name.clone(),
        });
        self.transition(ConnectionState::Connecting);
        self.act(LinkAction::Connect(ad.peripheral));
    }

    fn on_connect_result(
        &mut self,
        peripheral: &PeripheralId,
        result: std::result::Result<(), String>,
    ) {
        if !self.is_target(peripheral) || self.state != ConnectionState::Connecting {
            return;
        }
        match result {
            Ok(()) => {
                self.transition(ConnectionState::DiscoveringServices);
                self.act(LinkAction::DiscoverServices(peripheral.clone()));
            }
            Err(reason) => {
                warn!(%peripheral, %reason, "connect failed");
                self.target = None;
                let next = if self.adapter.is_powered_on() {
                    ConnectionState::Idle
                } else {
                    ConnectionState::Uninitialized
                };
                self.transition(next);
                self.fail_connect(Error::connection_failed(reason));
            }
        }
    }

    fn on_services(
        &mut self,
        peripheral: &PeripheralId,
        result: std::result::Result<Vec<Uuid>, String>,
    ) {
        if !self.is_target(peripheral) || self.state != ConnectionState::DiscoveringServices {
            return;
        }
        match result {
            Ok(services) if services.contains(&CUFF_SERVICE) => {
                self.transition(ConnectionState::DiscoveringCharacteristics);
                self.act(LinkAction::DiscoverCharacteristics {
                    peripheral: peripheral.clone(),
                    service: CUFF_SERVICE,
                });
                if self.discover_battery && services.contains(&BATTERY_SERVICE) {
                    self.act(LinkAction::DiscoverCharacteristics {
                        peripheral: peripheral.clone(),
                        service: BATTERY_SERVICE,
                    });
                }
            }
            Ok(_) => self.discovery_failed(peripheral, "cuff service not found".to_string()),
            Err(reason) => self.discovery_failed(peripheral, reason),
        }
    }

    fn on_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: Uuid,
        result: std::result::Result<Vec<CharacteristicInfo>, String>,
    ) {
        if !self.is_target(peripheral) {
            return;
        }

        if service == BATTERY_SERVICE {
            match result {
                Ok(chars) => match chars.iter().find(|c| c.uuid == BATTERY_LEVEL) {
                    Some(level) => {
                        self.handles.battery = Some(BATTERY_LEVEL);
                        self.act(LinkAction::Read {
                            peripheral: peripheral.clone(),
                            characteristic: BATTERY_LEVEL,
                        });
                        if level.notify {
                            self.act(LinkAction::Subscribe {
                                peripheral: peripheral.clone(),
                                characteristic: BATTERY_LEVEL,
                            });
                        }
                    }
                    None => debug!("battery service has no level characteristic"),
                },
                Err(reason) => debug!(%reason, "battery discovery failed"),
            }
            return;
        }

        if service != CUFF_SERVICE || self.state != ConnectionState::DiscoveringCharacteristics {
            return;
        }
        let chars = match result {
            Ok(chars) => chars,
            Err(reason) => return self.discovery_failed(peripheral, reason),
        };

        let has = |uuid: Uuid| chars.iter().any(|c| c.uuid == uuid).then_some(uuid);
        self.handles.notify = has(NOTIFY_CHARACTERISTIC);
        self.handles.write = has(WRITE_CHARACTERISTIC);

        match (self.handles.notify, self.handles.write) {
            (Some(notify), Some(_)) => {
                self.act(LinkAction::Subscribe {
                    peripheral: peripheral.clone(),
                    characteristic: notify,
                });
                self.transition(ConnectionState::Ready);
                let name = self.target.as_ref().and_then(|t| t.name.clone());
                info!(%peripheral, device = ?name, "cuff ready");
                if self.pending_connect {
                    self.pending_connect = false;
                    self.complete(Operation::Connect, Ok(()));
                }
                self.event(CareEvent::DeviceConnected { name });
            }
            (None, _) => {
                self.discovery_failed(peripheral, "notify characteristic not found".to_string())
            }
            (_, None) => {
                self.discovery_failed(peripheral, "write characteristic not found".to_string())
            }
        }
    }

    fn on_disconnected(&mut self, peripheral: &PeripheralId, reason: Option<String>) {
        if !self.is_target(peripheral) {
            return;
        }
        info!(%peripheral, reason = ?reason, from = %self.state, "cuff disconnected");
        // Only a link that announced DeviceConnected announces its loss.
        let was_ready = self.state == ConnectionState::Ready;
        self.target = None;
        self.handles = Handles::default();
        self.fail_connect(Error::connection_failed(
            reason.clone().unwrap_or_else(|| "device disconnected".to_string()),
        ));
        self.transition(ConnectionState::Disconnected);
        if was_ready {
            self.event(CareEvent::DeviceDisconnected { reason });
        }
    }

    // --- helpers ---

    fn discovery_failed(&mut self, peripheral: &PeripheralId, reason: String) {
        warn!(%peripheral, %reason, state = %self.state, "discovery failed");
        self.fail_connect(Error::discovery_failed(reason));
        self.act(LinkAction::CancelConnection(peripheral.clone()));
    }

    fn update_battery(&mut self, value: &[u8]) {
        match decode_battery(value) {
            Ok(level) => {
                debug!(level, "battery level");
                self.battery_level = level;
                self.event(CareEvent::BatteryLevelUpdated { level });
            }
            Err(e) => warn!(error = %e, "bad battery payload"),
        }
    }

    fn is_target(&self, peripheral: &PeripheralId) -> bool {
        self.target
            .as_ref()
            .is_some_and(|t| &t.peripheral == peripheral)
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from != to {
            debug!(%from, %to, "state change");
            self.state = to;
            self.event(CareEvent::StateChanged { from, to });
        }
    }

    fn fail_connect(&mut self, error: Error) {
        if self.pending_connect {
            self.pending_connect = false;
            self.complete(Operation::Connect, Err(error));
        }
    }

    fn complete(&mut self, op: Operation, result: Result<()>) {
        self.out.push(LinkOutput::Completed { op, result });
    }

    fn act(&mut self, action: LinkAction) {
        self.out.push(LinkOutput::Action(action));
    }

    fn event(&mut self, event: CareEvent) {
        self.out.push(LinkOutput::Event(event));
    }

    fn drain(&mut self) -> Vec<LinkOutput> {
        std::mem::take(&mut self.out)
    }
}
