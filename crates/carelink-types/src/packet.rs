//! Wire codec for the KN-550BT notify and write characteristics.
//!
//! Inbound notifications are one of two packet kinds, distinguished by the
//! first byte:
//!
//! | Offset | Result (`0xFD`)       | Event (`0xFE`) |
//! |--------|-----------------------|----------------|
//! | 0      | tag                   | tag            |
//! | 1-2    | systolic, u16 LE      | event code     |
//! | 3-4    | diastolic, u16 LE     |                |
//! | 5      | pulse, u8             |                |
//!
//! Decoding is pure: the same bytes always produce the same [`DecodedPacket`].
//! Malformed input is reported as [`DecodedPacket::Rejected`] rather than an
//! error so callers can log it and keep listening.

use core::fmt;
use core::str::FromStr;

use bytes::Buf;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{DIASTOLIC_RANGE, PULSE_RANGE, SYSTOLIC_RANGE};

/// Tag byte of a measurement result packet.
pub const MEASUREMENT_TAG: u8 = 0xFD;

/// Tag byte of a device event packet.
pub const EVENT_TAG: u8 = 0xFE;

/// Minimum length of a measurement result packet.
pub const MIN_MEASUREMENT_BYTES: usize = 6;

/// Minimum length of a device event packet.
pub const MIN_EVENT_BYTES: usize = 2;

/// Start measurement command.
pub const START_COMMAND: [u8; 6] = [0xFD, 0xFD, 0xFA, 0x05, 0x11, 0x00];

/// Stop measurement command.
pub const STOP_COMMAND: [u8; 6] = [0xFD, 0xFD, 0xFA, 0x05, 0x12, 0x00];

/// Event codes reported by the cuff's physical buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceEventCode {
    /// The user pressed start on the cuff.
    StartedOnDevice,
    /// The user pressed stop on the cuff.
    StoppedOnDevice,
    /// The cuff is inflating or measuring.
    Measuring,
    /// A code this codec does not know.
    Unknown(u8),
}

impl From<u8> for DeviceEventCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => DeviceEventCode::StartedOnDevice,
            0x02 => DeviceEventCode::StoppedOnDevice,
            0x03 => DeviceEventCode::Measuring,
            other => DeviceEventCode::Unknown(other),
        }
    }
}

impl From<DeviceEventCode> for u8 {
    fn from(code: DeviceEventCode) -> Self {
        match code {
            DeviceEventCode::StartedOnDevice => 0x01,
            DeviceEventCode::StoppedOnDevice => 0x02,
            DeviceEventCode::Measuring => 0x03,
            DeviceEventCode::Unknown(other) => other,
        }
    }
}

/// Measurement field named in a range rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Systolic,
    Diastolic,
    Pulse,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Systolic => "systolic",
            Field::Diastolic => "diastolic",
            Field::Pulse => "pulse",
        })
    }
}

/// Why a packet was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Shorter than the packet kind requires.
    TooShort { len: usize },
    /// First byte is neither a result nor an event tag.
    UnknownPacketType(u8),
    /// A measurement field fell outside its accepted range.
    OutOfRange { field: Field, value: u16 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooShort { len } => write!(f, "packet too short ({len} bytes)"),
            Rejection::UnknownPacketType(tag) => {
                write!(f, "unknown packet type 0x{tag:02X}")
            }
            Rejection::OutOfRange { field, value } => {
                write!(f, "{field} out of range: {value}")
            }
        }
    }
}

/// Result of decoding one notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPacket {
    /// A finished measurement, already range checked.
    Measurement {
        systolic: u16,
        diastolic: u16,
        pulse: u16,
    },
    /// A button or status event from the cuff.
    DeviceEvent(DeviceEventCode),
    /// Noise or a malformed payload.
    Rejected(Rejection),
}

impl DecodedPacket {
    /// Returns true for a rejected packet.
    pub fn is_rejected(&self) -> bool {
        matches!(self, DecodedPacket::Rejected(_))
    }
}

/// Decode a notification payload.
///
/// Result packets need six bytes; event packets need only the tag and the
/// code. Any other short buffer is rejected. Range checks run systolic,
/// diastolic, then pulse, and the first violation wins.
pub fn decode(bytes: &[u8]) -> DecodedPacket {
    let Some(&tag) = bytes.first() else {
        return DecodedPacket::Rejected(Rejection::TooShort { len: 0 });
    };

    if tag == EVENT_TAG && bytes.len() >= MIN_EVENT_BYTES {
        return DecodedPacket::DeviceEvent(DeviceEventCode::from(bytes[1]));
    }
    if bytes.len() < MIN_MEASUREMENT_BYTES {
        return DecodedPacket::Rejected(Rejection::TooShort { len: bytes.len() });
    }
    if tag != MEASUREMENT_TAG {
        return DecodedPacket::Rejected(Rejection::UnknownPacketType(tag));
    }

    let mut buf = &bytes[1..];
    let systolic = buf.get_u16_le();
    let diastolic = buf.get_u16_le();
    let pulse = u16::from(buf.get_u8());

    for (field, value, range) in [
        (Field::Systolic, systolic, &SYSTOLIC_RANGE),
        (Field::Diastolic, diastolic, &DIASTOLIC_RANGE),
        (Field::Pulse, pulse, &PULSE_RANGE),
    ] {
        if !range.contains(&value) {
            return DecodedPacket::Rejected(Rejection::OutOfRange { field, value });
        }
    }

    DecodedPacket::Measurement {
        systolic,
        diastolic,
        pulse,
    }
}

/// Decode a battery level payload (single percentage byte).
///
/// # Errors
///
/// Returns [`ParseError::InsufficientBytes`] for an empty buffer.
pub fn decode_battery(bytes: &[u8]) -> Result<u8, ParseError> {
    bytes.first().copied().ok_or(ParseError::InsufficientBytes {
        expected: 1,
        actual: 0,
    })
}

/// Build a measurement result packet in the cuff's wire layout.
///
/// Pulse values above 255 are truncated to the low byte, as the wire field
/// is a single byte.
pub fn encode_measurement(systolic: u16, diastolic: u16, pulse: u16) -> [u8; 6] {
    let [s0, s1] = systolic.to_le_bytes();
    let [d0, d1] = diastolic.to_le_bytes();
    [MEASUREMENT_TAG, s0, s1, d0, d1, pulse as u8]
}

/// Build a device event packet.
pub fn encode_event(code: DeviceEventCode) -> [u8; 2] {
    [EVENT_TAG, u8::from(code)]
}

/// Commands accepted by the cuff's write characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begin inflating and measuring.
    Start,
    /// Abort the current measurement.
    Stop,
}

impl Command {
    /// Wire bytes for this command.
    pub fn bytes(&self) -> [u8; 6] {
        match self {
            Command::Start => START_COMMAND,
            Command::Stop => STOP_COMMAND,
        }
    }

    /// Lowercase command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode a command.
pub fn encode(command: Command) -> [u8; 6] {
    command.bytes()
}

/// Encode a command by name.
///
/// # Errors
///
/// Returns [`ParseError::UnknownCommand`] for anything other than `start`
/// or `stop`.
pub fn encode_named(name: &str) -> Result<[u8; 6], ParseError> {
    name.parse::<Command>().map(encode)
}

/// Lowercase, space separated hex, e.g. `fd 78 00`.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- measurement decoding ---

    #[test]
    fn test_decode_reference_measurement() {
        let bytes = [0xFD, 0x78, 0x00, 0x50, 0x00, 0x48];
        assert_eq!(
            decode(&bytes),
            DecodedPacket::Measurement {
                systolic: 120,
                diastolic: 80,
                pulse: 72,
            }
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let bytes = [0xFD, 0x78, 0x00, 0x50, 0x00, 0x48, 0xAA, 0xBB];
        assert!(matches!(
            decode(&bytes),
            DecodedPacket::Measurement { systolic: 120, .. }
        ));
    }

    #[test]
    fn test_decode_systolic_uses_high_byte() {
        // 0x0100 = 256 is above range, so the high byte must be honored.
        let bytes = [0xFD, 0x00, 0x01, 0x50, 0x00, 0x48];
        assert_eq!(
            decode(&bytes),
            DecodedPacket::Rejected(Rejection::OutOfRange {
                field: Field::Systolic,
                value: 256,
            })
        );
    }

    #[test]
    fn test_decode_systolic_boundaries() {
        let below = encode_measurement(49, 80, 72);
        let above = encode_measurement(251, 80, 72);
        assert_eq!(
            decode(&below),
            DecodedPacket::Rejected(Rejection::OutOfRange {
                field: Field::Systolic,
                value: 49,
            })
        );
        assert_eq!(
            decode(&above),
            DecodedPacket::Rejected(Rejection::OutOfRange {
                field: Field::Systolic,
                value: 251,
            })
        );
        assert!(!decode(&encode_measurement(50, 80, 72)).is_rejected());
        assert!(!decode(&encode_measurement(250, 80, 72)).is_rejected());
    }

    #[test]
    fn test_decode_diastolic_and_pulse_boundaries() {
        assert!(decode(&encode_measurement(120, 29, 72)).is_rejected());
        assert!(decode(&encode_measurement(120, 151, 72)).is_rejected());
        assert!(decode(&encode_measurement(120, 80, 39)).is_rejected());
        assert!(decode(&encode_measurement(120, 80, 201)).is_rejected());
        assert!(!decode(&encode_measurement(120, 30, 40)).is_rejected());
        assert!(!decode(&encode_measurement(120, 150, 200)).is_rejected());
    }

    #[test]
    fn test_decode_first_violation_wins() {
        // All three fields are out of range; systolic is reported.
        let bytes = encode_measurement(10, 10, 10);
        assert_eq!(
            decode(&bytes),
            DecodedPacket::Rejected(Rejection::OutOfRange {
                field: Field::Systolic,
                value: 10,
            })
        );

        let bytes = encode_measurement(120, 10, 10);
        assert_eq!(
            decode(&bytes),
            DecodedPacket::Rejected(Rejection::OutOfRange {
                field: Field::Diastolic,
                value: 10,
            })
        );
    }

    // --- rejections ---

    #[test]
    fn test_decode_short_buffers() {
        assert_eq!(
            decode(&[]),
            DecodedPacket::Rejected(Rejection::TooShort { len: 0 })
        );
        assert_eq!(
            decode(&[0xFD, 0x78, 0x00, 0x50, 0x00]),
            DecodedPacket::Rejected(Rejection::TooShort { len: 5 })
        );
        // A lone event tag has no code.
        assert_eq!(
            decode(&[0xFE]),
            DecodedPacket::Rejected(Rejection::TooShort { len: 1 })
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        let bytes = [0x01, 0x78, 0x00, 0x50, 0x00, 0x48];
        assert_eq!(
            decode(&bytes),
            DecodedPacket::Rejected(Rejection::UnknownPacketType(0x01))
        );
    }

    #[test]
    fn test_rejection_messages_name_the_problem() {
        let r = Rejection::OutOfRange {
            field: Field::Pulse,
            value: 220,
        };
        assert_eq!(r.to_string(), "pulse out of range: 220");
        assert_eq!(
            Rejection::UnknownPacketType(0xAB).to_string(),
            "unknown packet type 0xAB"
        );
    }

    // --- device events ---

    #[test]
    fn test_decode_device_events() {
        assert_eq!(
            decode(&[0xFE, 0x01]),
            DecodedPacket::DeviceEvent(DeviceEventCode::StartedOnDevice)
        );
        assert_eq!(
            decode(&[0xFE, 0x02, 0, 0, 0, 0]),
            DecodedPacket::DeviceEvent(DeviceEventCode::StoppedOnDevice)
        );
        assert_eq!(
            decode(&[0xFE, 0x03]),
            DecodedPacket::DeviceEvent(DeviceEventCode::Measuring)
        );
    }

    #[test]
    fn test_unknown_event_code_is_surfaced() {
        assert_eq!(
            decode(&[0xFE, 0x7F]),
            DecodedPacket::DeviceEvent(DeviceEventCode::Unknown(0x7F))
        );
        assert_eq!(encode_event(DeviceEventCode::Unknown(0x7F)), [0xFE, 0x7F]);
    }

    // --- commands ---

    #[test]
    fn test_encode_commands_exact_bytes() {
        assert_eq!(encode(Command::Start), [0xFD, 0xFD, 0xFA, 0x05, 0x11, 0x00]);
        assert_eq!(encode(Command::Stop), [0xFD, 0xFD, 0xFA, 0x05, 0x12, 0x00]);
        assert_eq!(encode_named("start"), Ok(START_COMMAND));
        assert_eq!(encode_named("stop"), Ok(STOP_COMMAND));
    }

    #[test]
    fn test_encode_unknown_command_fails() {
        assert_eq!(
            encode_named("inflate"),
            Err(ParseError::UnknownCommand("inflate".to_string()))
        );
        assert!("START".parse::<Command>().is_err());
    }

    // --- battery ---

    #[test]
    fn test_decode_battery() {
        assert_eq!(decode_battery(&[87]), Ok(87));
        assert_eq!(decode_battery(&[87, 1, 2]), Ok(87));
        // No range validation beyond non-emptiness.
        assert_eq!(decode_battery(&[200]), Ok(200));
        assert!(decode_battery(&[]).is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0xFD, 0x78, 0x00]), "fd 78 00");
        assert_eq!(to_hex(&[]), "");
    }
}
