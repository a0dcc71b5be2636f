//! Measurement session: pairs a measurement request with its result.
//!
//! A session holds at most one pending measurement. It is resolved exactly
//! once, either by the first valid measurement packet or by the fallback
//! timer, which produces a placeholder reading marked
//! [`ReadingSource::Simulated`].

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use carelink_types::{Reading, ReadingSource};

use crate::error::{Error, Result};
use crate::events::CareEvent;
use crate::link::{TimerId, TimerIds, TimerKind};

/// Callback invoked with the finished reading.
pub type MeasurementCallback = Box<dyn FnOnce(Reading) + Send>;

/// How a measurement was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// The app sent the start command.
    Active,
    /// Waiting for the user to press start on the cuff.
    Passive,
}

struct PendingMeasurement {
    callback: MeasurementCallback,
    timer: TimerId,
    mode: SessionMode,
}

impl fmt::Debug for PendingMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMeasurement")
            .field("timer", &self.timer)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// Deliver [`TimerKind::Measurement`] after `after`.
    ArmTimer { timer: TimerId, after: Duration },
    /// Publish to observers.
    Event(CareEvent),
    /// Persist the reading, and upload it when `upload` is set.
    Record { reading: Reading, upload: bool },
}

/// Owns the pending measurement and its fallback timer.
#[derive(Debug)]
pub struct MeasurementSession {
    timeout: Duration,
    pending: Option<PendingMeasurement>,
    timers: TimerIds,
}

impl MeasurementSession {
    /// Create a session whose fallback fires after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: None,
            timers: TimerIds::default(),
        }
    }

    /// Returns true while a measurement is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Mode of the pending measurement, if any.
    pub fn mode(&self) -> Option<SessionMode> {
        self.pending.as_ref().map(|p| p.mode)
    }

    /// Register a pending measurement and arm its fallback timer.
    ///
    /// Does not check the link; the caller sends the start command for
    /// [`SessionMode::Active`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MeasurementInProgress`] if one is already pending.
    /// The existing measurement is left untouched.
    pub fn begin(
        &mut self,
        mode: SessionMode,
        callback: MeasurementCallback,
    ) -> Result<Vec<SessionOutput>> {
        if self.pending.is_some() {
            return Err(Error::MeasurementInProgress);
        }
        let timer = self.timers.next(TimerKind::Measurement);
        self.pending = Some(PendingMeasurement {
            callback,
            timer,
            mode,
        });
        debug!(?mode, timeout_secs = self.timeout.as_secs(), "measurement pending");

        let mut out = vec![SessionOutput::ArmTimer {
            timer,
            after: self.timeout,
        }];
        if mode == SessionMode::Active {
            out.push(SessionOutput::Event(CareEvent::MeasurementStarted));
        }
        Ok(out)
    }

    /// Handle a decoded measurement.
    ///
    /// Every valid reading is recorded and published; if a measurement is
    /// pending its callback receives the reading and the pending state is
    /// cleared.
    pub fn on_measurement(&mut self, systolic: u16, diastolic: u16, pulse: u16) -> Vec<SessionOutput> {
        let reading = Reading::new(systolic, diastolic, pulse, ReadingSource::Bluetooth);
        info!(
            value = %reading.formatted_value(),
            pulse,
            pending = self.pending.is_some(),
            "measurement received"
        );
        if let Some(pending) = self.pending.take() {
            (pending.callback)(reading.clone());
        }
        vec![
            SessionOutput::Record {
                reading: reading.clone(),
                upload: true,
            },
            SessionOutput::Event(CareEvent::MeasurementCompleted { reading }),
        ]
    }

    /// Handle the fallback timer.
    ///
    /// Timers from an earlier, already resolved measurement are ignored.
    pub fn on_timer(&mut self, timer: TimerId) -> Vec<SessionOutput> {
        let is_current = self.pending.as_ref().is_some_and(|p| p.timer == timer);
        if !is_current {
            debug!(?timer, "ignoring stale measurement timer");
            return Vec::new();
        }
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };

        let reading = Reading::simulated(&mut rand::rng());
        warn!(
            timeout_secs = self.timeout.as_secs(),
            value = %reading.formatted_value(),
            "no reading from cuff, using simulated placeholder"
        );
        (pending.callback)(reading.clone());
        vec![
            SessionOutput::Record {
                reading: reading.clone(),
                upload: false,
            },
            SessionOutput::Event(CareEvent::MeasurementCompleted { reading }),
        ]
    }

    /// Report a lost link during a pending measurement.
    ///
    /// The measurement stays pending; its timer still decides the outcome.
    pub fn on_disconnect(&mut self) -> Vec<SessionOutput> {
        if self.pending.is_some() {
            warn!("cuff disconnected during measurement");
            vec![SessionOutput::Event(CareEvent::MeasurementError {
                reason: "device disconnected".to_string(),
            })]
        } else {
            Vec::new()
        }
    }

    /// Drop the pending measurement without invoking its callback.
    ///
    /// Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.pending.take().is_some();
        if cancelled {
            debug!("measurement cancelled");
        }
        cancelled
    }
}
