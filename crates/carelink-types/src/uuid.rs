//! Bluetooth UUIDs and advertisement names for the KN-550BT cuff.

use uuid::{Uuid, uuid};

// --- iHealth vendor service ---

/// Main vendor service advertised by the cuff.
pub const CUFF_SERVICE: Uuid = uuid!("636f6d2e-6a69-7561-6e2e-646576000000");

/// Notify characteristic carrying measurement results and button events.
pub const NOTIFY_CHARACTERISTIC: Uuid = uuid!("7365642e-6a69-7561-6e2e-646576000000");

/// Write characteristic accepting start/stop commands.
pub const WRITE_CHARACTERISTIC: Uuid = uuid!("7265632e-6a69-7561-6e2e-646576000000");

// --- Standard BLE services ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic (percentage).
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Substrings of advertised names that identify a supported cuff.
pub const NAME_PATTERNS: &[&str] = &["KN-550BT", "iHealth", "KN-550"];

/// Returns true if `name` contains any of `patterns`.
pub fn name_matches<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| name.contains(p.as_ref()))
}
