//! Platform-agnostic types for the KN-550BT blood pressure monitor.
//!
//! This crate holds everything that does not need a Bluetooth stack:
//!
//! - The [`Reading`] record and its clinical [`BloodPressureCategory`]
//! - The notification/command codec in [`packet`]
//! - UUID constants and advertisement name patterns
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use carelink_types::packet::{decode, DecodedPacket};
//!
//! let packet = decode(&[0xFD, 0x78, 0x00, 0x50, 0x00, 0x48]);
//! assert_eq!(
//!     packet,
//!     DecodedPacket::Measurement { systolic: 120, diastolic: 80, pulse: 72 }
//! );
//! ```

pub mod error;
pub mod packet;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use packet::{Command, DecodedPacket, DeviceEventCode, Rejection};
pub use types::{
    BloodPressureCategory, DIASTOLIC_RANGE, PULSE_RANGE, Reading, ReadingSource, SYSTOLIC_RANGE,
};
pub use self::uuid as uuids;
