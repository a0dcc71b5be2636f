//! Error types for carelink-core.
//!
//! Adapter problems, connection and discovery failures, and misuse of the
//! measurement API all surface here. Malformed packets from the cuff are not
//! errors: the codec rejects them and the session keeps listening.
//!
//! | Error | Typical cause | Recovery |
//! |-------|---------------|----------|
//! | [`Error::AdapterUnavailable`] | Bluetooth off or permission denied | Fix adapter, call `initialize` again |
//! | [`Error::NotInitialized`] | `scan` before `initialize` | Call `initialize` |
//! | [`Error::DeviceNotFound`] | Cuff asleep or out of range | Wake the cuff, scan again |
//! | [`Error::ConnectionFailed`] | Link dropped during setup | Scan again |
//! | [`Error::DiscoveryFailed`] | Unexpected GATT layout | Do not retry |
//! | [`Error::NotReady`] | Write or measurement before `Ready` | Connect first |
//! | [`Error::MeasurementInProgress`] | Overlapping measurement requests | Wait or stop the current one |

use thiserror::Error;

/// Errors that can occur when talking to the cuff.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The adapter is not usable.
    #[error("Bluetooth unavailable: {0}")]
    AdapterUnavailable(AdapterFailure),

    /// `initialize` has not completed.
    #[error("Service not initialized")]
    NotInitialized,

    /// Write or measurement attempted while the link is not ready.
    #[error("Device not connected")]
    NotReady,

    /// No matching cuff was seen before the scan ended.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connecting to the cuff failed.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Adapter-supplied or local reason.
        reason: String,
    },

    /// Service or characteristic discovery failed.
    #[error("Discovery failed: {reason}")]
    DiscoveryFailed {
        /// What was missing or what the adapter reported.
        reason: String,
    },

    /// A conflicting operation is already running.
    #[error("Busy: {0}")]
    Busy(String),

    /// A measurement is already pending.
    #[error("A measurement is already in progress")]
    MeasurementInProgress,

    /// The pending measurement was cancelled before producing a reading.
    #[error("Measurement cancelled")]
    Cancelled,

    /// Writing to the cuff failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Persisting a reading failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Uploading a reading failed.
    #[error("Cloud sync error: {0}")]
    Cloud(String),

    /// The background service has shut down.
    #[error("Cuff service stopped")]
    ServiceStopped,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why the Bluetooth adapter cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdapterFailure {
    /// The radio is switched off.
    PoweredOff,
    /// The app lacks Bluetooth permission.
    Unauthorized,
    /// The host has no usable BLE radio.
    Unsupported,
    /// The stack is restarting.
    Resetting,
    /// State not reported yet.
    Unknown,
}

impl std::fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoweredOff => write!(f, "please turn on Bluetooth"),
            Self::Unauthorized => write!(f, "Bluetooth permission not granted"),
            Self::Unsupported => write!(f, "this device does not support Bluetooth LE"),
            Self::Resetting => write!(f, "Bluetooth is resetting"),
            Self::Unknown => write!(f, "Bluetooth is not ready"),
        }
    }
}

impl Error {
    /// Create a connection failure.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a discovery failure.
    pub fn discovery_failed(reason: impl Into<String>) -> Self {
        Self::DiscoveryFailed {
            reason: reason.into(),
        }
    }

    /// Create a busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using carelink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
