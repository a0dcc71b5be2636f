//! Core data types for blood pressure readings.
//!
//! This module contains the reading record shared by the codec, the
//! measurement session and persistence, together with the clinical
//! category used when presenting a reading.

use core::fmt;
use core::ops::RangeInclusive;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ParseError;

/// Accepted systolic pressure in mmHg.
pub const SYSTOLIC_RANGE: RangeInclusive<u16> = 50..=250;

/// Accepted diastolic pressure in mmHg.
pub const DIASTOLIC_RANGE: RangeInclusive<u16> = 30..=150;

/// Accepted pulse rate in beats per minute.
pub const PULSE_RANGE: RangeInclusive<u16> = 40..=200;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReadingSource {
    /// Decoded from a cuff notification.
    #[default]
    Bluetooth,
    /// Placeholder produced when a measurement times out.
    Simulated,
    /// Entered by hand.
    Manual,
}

impl ReadingSource {
    /// Stable lowercase name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingSource::Bluetooth => "bluetooth",
            ReadingSource::Simulated => "simulated",
            ReadingSource::Manual => "manual",
        }
    }
}

impl fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bluetooth" => Ok(ReadingSource::Bluetooth),
            "simulated" => Ok(ReadingSource::Simulated),
            "manual" => Ok(ReadingSource::Manual),
            other => Err(ParseError::InvalidValue(format!(
                "unknown reading source '{other}'"
            ))),
        }
    }
}

/// A completed blood pressure and pulse measurement.
///
/// Readings are immutable once created. Values from the cuff are range
/// checked by the codec before a reading is ever built, so `Reading::new`
/// trusts its arguments; use [`Reading::manual`] for unchecked input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Unique identifier.
    pub id: Uuid,
    /// Systolic pressure in mmHg.
    pub systolic: u16,
    /// Diastolic pressure in mmHg.
    pub diastolic: u16,
    /// Pulse rate in bpm.
    pub pulse: u16,
    /// When the reading was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Origin of the values.
    pub source: ReadingSource,
}

impl Reading {
    /// Create a reading stamped with the current time and a fresh id.
    pub fn new(systolic: u16, diastolic: u16, pulse: u16, source: ReadingSource) -> Self {
        Self::with_timestamp(systolic, diastolic, pulse, source, OffsetDateTime::now_utc())
    }

    /// Create a reading with an explicit timestamp.
    pub fn with_timestamp(
        systolic: u16,
        diastolic: u16,
        pulse: u16,
        source: ReadingSource,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            systolic,
            diastolic,
            pulse,
            timestamp,
            source,
        }
    }

    /// Create a manually entered reading, validating each value.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidValue`] naming the first field that is
    /// outside its accepted range.
    pub fn manual(systolic: u16, diastolic: u16, pulse: u16) -> Result<Self, ParseError> {
        check_range("systolic", systolic, &SYSTOLIC_RANGE)?;
        check_range("diastolic", diastolic, &DIASTOLIC_RANGE)?;
        check_range("pulse", pulse, &PULSE_RANGE)?;
        Ok(Self::new(systolic, diastolic, pulse, ReadingSource::Manual))
    }

    /// Placeholder reading used when the cuff never reports a result.
    ///
    /// Values are drawn from a plausible resting range, well inside the
    /// accepted bounds.
    pub fn simulated<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(
            rng.random_range(110..=140),
            rng.random_range(70..=90),
            rng.random_range(60..=100),
            ReadingSource::Simulated,
        )
    }

    /// "systolic/diastolic", e.g. `120/80`.
    pub fn formatted_value(&self) -> String {
        format!("{}/{}", self.systolic, self.diastolic)
    }

    /// Clinical category for this reading.
    pub fn category(&self) -> BloodPressureCategory {
        BloodPressureCategory::classify(self.systolic, self.diastolic)
    }
}

fn check_range(field: &str, value: u16, range: &RangeInclusive<u16>) -> Result<(), ParseError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ParseError::InvalidValue(format!(
            "{field} {value} outside {}..={}",
            range.start(),
            range.end()
        )))
    }
}

/// Blood pressure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BloodPressureCategory {
    /// Below 120/80.
    Normal,
    /// Systolic 120-129 with diastolic below 80.
    Elevated,
    /// Systolic 130-139 or diastolic 80-89.
    HypertensionStage1,
    /// Systolic 140-179 or diastolic 90-119.
    HypertensionStage2,
    /// 180/120 and above.
    HypertensiveCrisis,
}

impl BloodPressureCategory {
    /// Classify a systolic/diastolic pair.
    pub fn classify(systolic: u16, diastolic: u16) -> Self {
        if systolic < 120 && diastolic < 80 {
            Self::Normal
        } else if systolic < 130 && diastolic < 80 {
            Self::Elevated
        } else if systolic < 140 || diastolic < 90 {
            Self::HypertensionStage1
        } else if systolic < 180 || diastolic < 120 {
            Self::HypertensionStage2
        } else {
            Self::HypertensiveCrisis
        }
    }

    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Elevated => "Slightly Elevated",
            Self::HypertensionStage1 => "Hypertension Stage 1",
            Self::HypertensionStage2 => "Hypertension Stage 2",
            Self::HypertensiveCrisis => "Hypertensive Crisis",
        }
    }

    /// Advice shown alongside a reading in this category.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Normal => "Your blood pressure is normal. Maintain a healthy lifestyle.",
            Self::Elevated => {
                "Blood pressure is slightly elevated. Reduce salt intake and increase exercise."
            }
            Self::HypertensionStage1 => "Consult a doctor and adjust diet and lifestyle habits.",
            Self::HypertensionStage2 => "Blood pressure is high. Please see a doctor soon.",
            Self::HypertensiveCrisis => {
                "Blood pressure is dangerously high! Seek immediate medical attention!"
            }
        }
    }

    /// Whether the reading warrants urgent attention.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::HypertensiveCrisis)
    }
}

impl fmt::Display for BloodPressureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
