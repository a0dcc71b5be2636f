//! Async driver for [`CuffController`].
//!
//! [`CuffService`] owns the controller on a single tokio task. Requests from
//! [`CuffHandle`]s, transport events and timer expiries are all serialized
//! through that task, so the controller itself never needs a lock. Radio
//! actions run in order on a separate worker task and report back as
//! [`LinkInput`]s; timers are plain `tokio::time::sleep`s that post
//! [`LinkInput::Timer`] when they fire.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use carelink_core::{BtleplugTransport, CuffService};
//!
//! # async fn example() -> carelink_core::Result<()> {
//! let transport = Arc::new(BtleplugTransport::new().await?);
//! let cuff = CuffService::new(transport).spawn()?;
//! cuff.initialize().await?;
//! cuff.scan(None).await?;
//! let reading = cuff.measure().await?;
//! println!("{} mmHg, pulse {}", reading.formatted_value(), reading.pulse);
//! cuff.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use carelink_types::Reading;
use carelink_types::uuid::BATTERY_LEVEL;

use crate::config::CuffConfig;
use crate::controller::{CuffController, Effect};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver};
use crate::link::{LinkAction, LinkInput, LinkStatus, Operation};
use crate::session::{MeasurementCallback, SessionMode};
use crate::traits::{CloudSync, MemoryStore, NoopCloudSync, ReadingStore};
use crate::transport::{BleTransport, TransportEvent, TransportEvents};

const COMMAND_CAPACITY: usize = 32;

/// How long shutdown waits for uploads that are still in flight.
const UPLOAD_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Initialize(Reply<()>),
    Scan {
        timeout: Option<Duration>,
        reply: Reply<()>,
    },
    Disconnect(Reply<()>),
    Write {
        value: Vec<u8>,
        reply: Reply<()>,
    },
    Measure {
        mode: SessionMode,
        callback: MeasurementCallback,
        reply: Reply<()>,
    },
    StopMeasurement(Reply<()>),
}

/// Builder that wires a transport, store and cloud client to a controller.
pub struct CuffService {
    transport: Arc<dyn BleTransport>,
    config: CuffConfig,
    store: Box<dyn ReadingStore>,
    cloud: Arc<dyn CloudSync>,
}

impl CuffService {
    /// Start building a service over `transport`.
    ///
    /// Readings go to an in-memory store and are not uploaded unless
    /// [`store`](Self::store) and [`cloud`](Self::cloud) are set.
    pub fn new(transport: Arc<dyn BleTransport>) -> Self {
        Self {
            transport,
            config: CuffConfig::default(),
            store: Box::new(MemoryStore::new()),
            cloud: Arc::new(NoopCloudSync),
        }
    }

    #[must_use]
    pub fn config(mut self, config: CuffConfig) -> Self {
        self.config = config;
        self
    }

    /// Where readings are persisted.
    #[must_use]
    pub fn store(mut self, store: Box<dyn ReadingStore>) -> Self {
        self.store = store;
        self
    }

    /// Where Bluetooth readings are uploaded.
    #[must_use]
    pub fn cloud(mut self, cloud: Arc<dyn CloudSync>) -> Self {
        self.cloud = cloud;
        self
    }

    /// Spawn the driver task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the config is invalid or the
    /// transport's event channel was already taken.
    pub fn spawn(self) -> Result<CuffHandle> {
        self.config.validate()?;
        let transport_events = self
            .transport
            .take_events()
            .ok_or_else(|| Error::invalid_config("transport events already taken"))?;

        let controller = CuffController::new(&self.config);
        let events = EventDispatcher::new(self.config.event_capacity);
        let (status_tx, status_rx) = watch::channel(controller.status());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let radio = tokio::spawn(run_radio(
            self.transport.clone(),
            radio_rx,
            inputs_tx.clone(),
            cancel.child_token(),
        ));

        let driver = Driver {
            controller,
            transport: self.transport,
            store: self.store,
            cloud: self.cloud,
            events: events.clone(),
            status: status_tx,
            radio: radio_tx,
            inputs: inputs_tx,
            pending: HashMap::new(),
            uploads: TaskTracker::new(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run(commands_rx, transport_events, inputs_rx, radio));

        Ok(CuffHandle {
            commands: commands_tx,
            status: status_rx,
            events,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cheaply cloneable handle to a running [`CuffService`].
#[derive(Clone)]
pub struct CuffHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<LinkStatus>,
    events: EventDispatcher,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for CuffHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuffHandle")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl CuffHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Wait until the adapter is powered on.
    ///
    /// Resolves immediately if already initialized.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.request(Command::Initialize).await
    }

    /// Scan for a cuff and connect to the first one found.
    ///
    /// Resolves once the cuff is ready for commands. Uses the configured
    /// scan window when `timeout` is `None`.
    #[tracing::instrument(skip(self))]
    pub async fn scan(&self, timeout: Option<Duration>) -> Result<()> {
        self.request(|reply| Command::Scan { timeout, reply }).await
    }

    /// Stop scanning and close the link, if any.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Write raw bytes to the cuff's command characteristic.
    pub async fn write(&self, value: &[u8]) -> Result<()> {
        let value = value.to_vec();
        self.request(|reply| Command::Write { value, reply }).await
    }

    /// Send the start command; `callback` receives the reading.
    ///
    /// The callback runs on the service task and must not block.
    #[tracing::instrument(skip_all)]
    pub async fn start_measurement<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Reading) + Send + 'static,
    {
        self.begin(SessionMode::Active, Box::new(callback)).await
    }

    /// Wait for a measurement started with the cuff's own button.
    #[tracing::instrument(skip_all)]
    pub async fn listen_for_measurement<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Reading) + Send + 'static,
    {
        self.begin(SessionMode::Passive, Box::new(callback)).await
    }

    /// Start a measurement and wait for its reading.
    ///
    /// Returns [`Error::Cancelled`] if the measurement is stopped first, or
    /// [`Error::ServiceStopped`] if the service shuts down first.
    pub async fn measure(&self) -> Result<Reading> {
        self.await_reading(SessionMode::Active).await
    }

    /// Wait for a button-started measurement and return its reading.
    pub async fn listen(&self) -> Result<Reading> {
        self.await_reading(SessionMode::Passive).await
    }

    /// Send the stop command and drop the pending measurement.
    #[tracing::instrument(skip(self))]
    pub async fn stop_measurement(&self) -> Result<()> {
        self.request(Command::StopMeasurement).await
    }

    async fn begin(&self, mode: SessionMode, callback: MeasurementCallback) -> Result<()> {
        self.request(|reply| Command::Measure {
            mode,
            callback,
            reply,
        })
        .await
    }

    async fn await_reading(&self, mode: SessionMode) -> Result<Reading> {
        let (tx, rx) = oneshot::channel();
        self.begin(
            mode,
            Box::new(move |reading| {
                let _ = tx.send(reading);
            }),
        )
        .await?;
        // Shutdown cancels the token before the driver drops the callback.
        rx.await.map_err(|_| {
            if self.cancel.is_cancelled() {
                Error::ServiceStopped
            } else {
                Error::Cancelled
            }
        })
    }

    // --- status ---

    /// Latest status snapshot.
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready()
    }

    pub fn is_scanning(&self) -> bool {
        self.status.borrow().is_scanning()
    }

    pub fn is_measuring(&self) -> bool {
        self.status.borrow().measuring
    }

    /// Name of the connected cuff, if ready.
    pub fn connected_device_name(&self) -> Option<String> {
        self.status.borrow().device_name.clone()
    }

    /// Last reported battery percentage.
    pub fn battery_level(&self) -> u8 {
        self.status.borrow().battery_level
    }

    /// Subscribe to service events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Stop the service, closing any link, and wait for it to finish.
    ///
    /// Outstanding requests fail with [`Error::ServiceStopped`]. Uploads
    /// already started are given up to 30 seconds to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "cuff service task failed");
        }
    }
}

struct Driver {
    controller: CuffController,
    transport: Arc<dyn BleTransport>,
    store: Box<dyn ReadingStore>,
    cloud: Arc<dyn CloudSync>,
    events: EventDispatcher,
    status: watch::Sender<LinkStatus>,
    radio: mpsc::UnboundedSender<LinkAction>,
    inputs: mpsc::UnboundedSender<LinkInput>,
    pending: HashMap<Operation, VecDeque<Reply<()>>>,
    uploads: TaskTracker,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: TransportEvents,
        mut inputs: mpsc::UnboundedReceiver<LinkInput>,
        radio: JoinHandle<()>,
    ) {
        debug!("cuff service started");
        let mut transport_open = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => self.on_input(link_input(event)),
                    None => {
                        warn!("transport event stream closed");
                        transport_open = false;
                    }
                },
                Some(input) = inputs.recv() => self.on_input(input),
            }
            self.publish_status();
        }

        self.cancel.cancel();
        let _ = radio.await;
        let peripheral = self.controller.link().peripheral().cloned();
        if let Some(peripheral) = peripheral
            && let Err(e) = self.transport.disconnect(&peripheral).await
        {
            debug!(error = %e, "disconnect on shutdown failed");
        }

        self.uploads.close();
        if !self.uploads.is_empty() {
            debug!(count = self.uploads.len(), "waiting for uploads");
            if tokio::time::timeout(UPLOAD_DRAIN_TIMEOUT, self.uploads.wait())
                .await
                .is_err()
            {
                warn!(
                    count = self.uploads.len(),
                    "uploads still pending at shutdown, abandoning"
                );
            }
        }
        debug!("cuff service stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Initialize(reply) => {
                let result = self.controller.initialize();
                self.start(Operation::Initialize, result, reply);
            }
            Command::Scan { timeout, reply } => {
                let result = self.controller.scan(timeout);
                self.start(Operation::Connect, result, reply);
            }
            Command::Disconnect(reply) => {
                let effects = self.controller.disconnect();
                self.execute(effects);
                let _ = reply.send(Ok(()));
            }
            Command::Write { value, reply } => {
                let result = self.controller.write(&value);
                self.finish(result, reply);
            }
            Command::Measure {
                mode,
                callback,
                reply,
            } => {
                let result = match mode {
                    SessionMode::Active => self.controller.start_measurement(callback),
                    SessionMode::Passive => self.controller.listen_for_measurement(callback),
                };
                self.finish(result, reply);
            }
            Command::StopMeasurement(reply) => {
                let effects = self.controller.stop_measurement();
                self.execute(effects);
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Queue `reply` to be resolved by the operation's completion.
    fn start(&mut self, op: Operation, result: Result<Vec<Effect>>, reply: Reply<()>) {
        match result {
            Ok(effects) => {
                self.pending.entry(op).or_default().push_back(reply);
                self.execute(effects);
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Resolve `reply` as soon as the effects are queued.
    fn finish(&mut self, result: Result<Vec<Effect>>, reply: Reply<()>) {
        match result {
            Ok(effects) => {
                self.execute(effects);
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn on_input(&mut self, input: LinkInput) {
        let effects = self.controller.handle(input);
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Action(LinkAction::ArmTimer { timer, after }) => {
                    let inputs = self.inputs.clone();
                    let cancel = self.cancel.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(after) => {
                                let _ = inputs.send(LinkInput::Timer(timer));
                            }
                        }
                    });
                }
                Effect::Action(action) => {
                    if self.radio.send(action).is_err() {
                        debug!("radio worker stopped, dropping action");
                    }
                }
                Effect::Completed { op, result } => {
                    match self.pending.get_mut(&op).and_then(VecDeque::pop_front) {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => debug!(?op, "completion with no waiting caller"),
                    }
                }
                Effect::Event(event) => {
                    debug!(event = event.name(), "event");
                    self.events.send(event);
                }
                Effect::Record { reading, upload } => self.record(reading, upload),
            }
        }
    }

    fn record(&mut self, reading: Reading, upload: bool) {
        let store = &self.store;
        if let Err(e) = blocking(|| store.append(&reading)) {
            warn!(error = %e, "failed to store reading");
        }
        if upload {
            let cloud = self.cloud.clone();
            self.uploads.spawn(async move {
                match cloud.upload(&reading).await {
                    Ok(()) => info!(id = %reading.id, "reading uploaded"),
                    Err(e) => warn!(error = %e, "failed to upload reading"),
                }
            });
        }
    }

    fn publish_status(&self) {
        let status = self.controller.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Run store I/O, handing this worker's other tasks to another thread first
/// when the runtime allows it.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

fn link_input(event: TransportEvent) -> LinkInput {
    match event {
        TransportEvent::AdapterState(state) => LinkInput::AdapterStateChanged(state),
        TransportEvent::Advertisement(ad) => LinkInput::Advertisement(ad),
        TransportEvent::Disconnected { peripheral, reason } => {
            LinkInput::Disconnected { peripheral, reason }
        }
        TransportEvent::Notification {
            peripheral,
            characteristic,
            value,
        } => LinkInput::Notification {
            peripheral,
            characteristic,
            value,
        },
    }
}

/// Executes radio actions in order and reports their outcomes.
async fn run_radio(
    transport: Arc<dyn BleTransport>,
    mut actions: mpsc::UnboundedReceiver<LinkAction>,
    inputs: mpsc::UnboundedSender<LinkInput>,
    cancel: CancellationToken,
) {
    loop {
        let action = tokio::select! {
            _ = cancel.cancelled() => break,
            action = actions.recv() => match action {
                Some(action) => action,
                None => break,
            },
        };
        if let Some(input) = perform(transport.as_ref(), action).await
            && inputs.send(input).is_err()
        {
            break;
        }
    }
}

async fn perform(transport: &dyn BleTransport, action: LinkAction) -> Option<LinkInput> {
    match action {
        LinkAction::QueryAdapter => match transport.adapter_state().await {
            Ok(state) => Some(LinkInput::AdapterStateChanged(state)),
            Err(e) => {
                warn!(error = %e, "failed to query adapter state");
                None
            }
        },
        LinkAction::StartScan { services } => {
            if let Err(e) = transport.start_scan(&services).await {
                warn!(error = %e, "failed to start scan");
            }
            None
        }
        LinkAction::StopScan => {
            if let Err(e) = transport.stop_scan().await {
                debug!(error = %e, "failed to stop scan");
            }
            None
        }
        LinkAction::Connect(peripheral) => {
            let result = transport.connect(&peripheral).await.map_err(|e| e.to_string());
            Some(LinkInput::ConnectResult { peripheral, result })
        }
        LinkAction::CancelConnection(peripheral) => {
            if let Err(e) = transport.disconnect(&peripheral).await {
                debug!(error = %e, "failed to cancel connection");
            }
            None
        }
        LinkAction::DiscoverServices(peripheral) => {
            let result = transport
                .discover_services(&peripheral)
                .await
                .map_err(|e| e.to_string());
            Some(LinkInput::ServicesDiscovered { peripheral, result })
        }
        LinkAction::DiscoverCharacteristics {
            peripheral,
            service,
        } => {
            let result = transport
                .discover_characteristics(&peripheral, service)
                .await
                .map_err(|e| e.to_string());
            Some(LinkInput::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            })
        }
        LinkAction::Subscribe {
            peripheral,
            characteristic,
        } => {
            if let Err(e) = transport.subscribe(&peripheral, characteristic).await {
                warn!(error = %e, %characteristic, "failed to enable notifications");
            }
            None
        }
        LinkAction::Read {
            peripheral,
            characteristic,
        } => {
            let result = transport
                .read(&peripheral, characteristic)
                .await
                .map_err(|e| e.to_string());
            if characteristic == BATTERY_LEVEL {
                Some(LinkInput::BatteryRead { peripheral, result })
            } else {
                debug!(%characteristic, "ignoring read result");
                None
            }
        }
        LinkAction::Write {
            peripheral,
            characteristic,
            value,
        } => {
            if let Err(e) = transport.write(&peripheral, characteristic, &value).await {
                warn!(error = %e, "failed to write command");
            }
            None
        }
        // Timers are armed by the driver, never sent to the radio.
        LinkAction::ArmTimer { .. } => None,
    }
}
