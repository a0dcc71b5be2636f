//! Composition of link, session and router into one event-driven core.
//!
//! [`CuffController`] is still free of I/O: the driver in
//! [`service`](crate::service) feeds it requests and platform events and
//! executes the [`Effect`]s it returns. Notification bytes from the link are
//! decoded here and dispatched to the session (results) or the router
//! (button events).

use std::time::Duration;

use tracing::warn;

use carelink_types::packet::{DecodedPacket, decode, to_hex};
use carelink_types::{Command, Reading};

use crate::config::CuffConfig;
use crate::error::{Error, Result};
use crate::events::CareEvent;
use crate::link::{
    ConnectionStateMachine, LinkAction, LinkInput, LinkOutput, LinkStatus, Operation, TimerKind,
};
use crate::router::DeviceEventRouter;
use crate::session::{MeasurementCallback, MeasurementSession, SessionMode, SessionOutput};

/// Work for the driver.
#[derive(Debug)]
pub enum Effect {
    /// Perform a radio operation or arm a timer.
    Action(LinkAction),
    /// Resolve an outstanding request.
    Completed { op: Operation, result: Result<()> },
    /// Publish to observers.
    Event(CareEvent),
    /// Persist a reading, and upload it when `upload` is set.
    Record { reading: Reading, upload: bool },
}

/// The cuff's protocol core.
#[derive(Debug)]
pub struct CuffController {
    link: ConnectionStateMachine,
    session: MeasurementSession,
    router: DeviceEventRouter,
    scan_timeout: Duration,
}

impl CuffController {
    pub fn new(config: &CuffConfig) -> Self {
        Self {
            link: ConnectionStateMachine::new(config),
            session: MeasurementSession::new(config.measurement_timeout),
            router: DeviceEventRouter::new(),
            scan_timeout: config.scan_timeout,
        }
    }

    /// The connection state machine, for read-only queries.
    pub fn link(&self) -> &ConnectionStateMachine {
        &self.link
    }

    /// Returns true while a measurement is pending.
    pub fn is_measuring(&self) -> bool {
        self.session.is_pending()
    }

    /// Snapshot of link and session state.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            measuring: self.session.is_pending(),
            ..self.link.status()
        }
    }

    pub fn initialize(&mut self) -> Result<Vec<Effect>> {
        let out = self.link.initialize()?;
        Ok(self.absorb(out))
    }

    /// Scan and connect, using the configured window when `timeout` is None.
    pub fn scan(&mut self, timeout: Option<Duration>) -> Result<Vec<Effect>> {
        let out = self.link.scan(timeout.unwrap_or(self.scan_timeout))?;
        Ok(self.absorb(out))
    }

    pub fn disconnect(&mut self) -> Vec<Effect> {
        let out = self.link.disconnect();
        self.absorb(out)
    }

    /// Write raw bytes to the command characteristic.
    pub fn write(&mut self, value: &[u8]) -> Result<Vec<Effect>> {
        let out = self.link.write(value)?;
        Ok(self.absorb(out))
    }

    /// Send the start command and wait for a reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the cuff is not connected and
    /// [`Error::MeasurementInProgress`] if a measurement is pending. Nothing
    /// is sent or registered in either case.
    pub fn start_measurement(&mut self, callback: MeasurementCallback) -> Result<Vec<Effect>> {
        self.begin(SessionMode::Active, callback)
    }

    /// Wait for a measurement started with the cuff's own button.
    ///
    /// # Errors
    ///
    /// Same as [`start_measurement`](Self::start_measurement).
    pub fn listen_for_measurement(
        &mut self,
        callback: MeasurementCallback,
    ) -> Result<Vec<Effect>> {
        self.begin(SessionMode::Passive, callback)
    }

    /// Send the stop command if connected and drop any pending measurement.
    pub fn stop_measurement(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link.is_ready() {
            match self.link.write(&Command::Stop.bytes()) {
                Ok(out) => effects = self.absorb(out),
                Err(e) => warn!(error = %e, "failed to queue stop command"),
            }
        }
        self.session.cancel();
        effects
    }

    /// Feed one platform event or timer expiry.
    pub fn handle(&mut self, input: LinkInput) -> Vec<Effect> {
        if let LinkInput::Timer(timer) = &input
            && timer.kind() == TimerKind::Measurement
        {
            let out = self.session.on_timer(*timer);
            return session_effects(out);
        }
        let out = self.link.handle(input);
        self.absorb(out)
    }

    fn begin(&mut self, mode: SessionMode, callback: MeasurementCallback) -> Result<Vec<Effect>> {
        if !self.link.is_ready() {
            return Err(Error::NotReady);
        }
        if self.session.is_pending() {
            return Err(Error::MeasurementInProgress);
        }
        let mut effects = match mode {
            SessionMode::Active => {
                let out = self.link.write(&Command::Start.bytes())?;
                self.absorb(out)
            }
            SessionMode::Passive => Vec::new(),
        };
        let out = self.session.begin(mode, callback)?;
        effects.extend(session_effects(out));
        Ok(effects)
    }

    fn absorb(&mut self, outputs: Vec<LinkOutput>) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(outputs.len());
        for output in outputs {
            match output {
                LinkOutput::Action(action) => effects.push(Effect::Action(action)),
                LinkOutput::Completed { op, result } => {
                    effects.push(Effect::Completed { op, result })
                }
                LinkOutput::Event(event) => {
                    let disconnected = matches!(event, CareEvent::DeviceDisconnected { .. });
                    effects.push(Effect::Event(event));
                    if disconnected {
                        effects.extend(session_effects(self.session.on_disconnect()));
                    }
                }
                LinkOutput::Packet(bytes) => self.on_packet(&bytes, &mut effects),
            }
        }
        effects
    }

    fn on_packet(&mut self, bytes: &[u8], effects: &mut Vec<Effect>) {
        match decode(bytes) {
            DecodedPacket::Measurement {
                systolic,
                diastolic,
                pulse,
            } => {
                let out = self.session.on_measurement(systolic, diastolic, pulse);
                effects.extend(session_effects(out));
            }
            DecodedPacket::DeviceEvent(code) => {
                if let Some(event) = self.router.route(code) {
                    effects.push(Effect::Event(event));
                }
            }
            DecodedPacket::Rejected(reason) => {
                warn!(%reason, bytes = %to_hex(bytes), "discarding packet");
            }
        }
    }
}

fn session_effects(outputs: Vec<SessionOutput>) -> Vec<Effect> {
    outputs
        .into_iter()
        .map(|output| match output {
            SessionOutput::ArmTimer { timer, after } => {
                Effect::Action(LinkAction::ArmTimer { timer, after })
            }
            SessionOutput::Event(event) => Effect::Event(event),
            SessionOutput::Record { reading, upload } => Effect::Record { reading, upload },
        })
        .collect()
}
