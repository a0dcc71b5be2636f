//! Tunables for the cuff service.

use std::time::Duration;

use carelink_types::uuid::NAME_PATTERNS;

use crate::error::{Error, Result};

/// How long `initialize` waits for the adapter to report powered on.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default scan window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a measurement may run before the placeholder fallback fires.
pub const DEFAULT_MEASUREMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Configuration for [`CuffController`](crate::CuffController) and the
/// service that drives it.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use carelink_core::CuffConfig;
///
/// let config = CuffConfig::default()
///     .scan_timeout(Duration::from_secs(30))
///     .measurement_timeout(Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CuffConfig {
    /// Bounded wait for the adapter during `initialize`.
    pub init_timeout: Duration,
    /// Scan window used when `scan` is called without an explicit timeout.
    pub scan_timeout: Duration,
    /// Window after which a pending measurement falls back to a placeholder.
    pub measurement_timeout: Duration,
    /// Substrings an advertised name must contain.
    pub name_patterns: Vec<String>,
    /// Whether to look for the standard battery service.
    pub discover_battery: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CuffConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            measurement_timeout: DEFAULT_MEASUREMENT_TIMEOUT,
            name_patterns: NAME_PATTERNS.iter().map(|s| s.to_string()).collect(),
            discover_battery: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CuffConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter wait used by `initialize`.
    #[must_use]
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the default scan window.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the measurement fallback window.
    #[must_use]
    pub fn measurement_timeout(mut self, timeout: Duration) -> Self {
        self.measurement_timeout = timeout;
        self
    }

    /// Replace the advertised-name patterns.
    #[must_use]
    pub fn name_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable battery service discovery.
    #[must_use]
    pub fn discover_battery(mut self, enabled: bool) -> Self {
        self.discover_battery = enabled;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero durations, an empty pattern
    /// list, or a zero event capacity.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("init_timeout", self.init_timeout),
            ("scan_timeout", self.scan_timeout),
            ("measurement_timeout", self.measurement_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        if self.name_patterns.iter().all(|p| p.is_empty()) {
            return Err(Error::invalid_config(
                "at least one non-empty name pattern is required",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CuffConfig::default();
        assert_eq!(config.init_timeout, Duration::from_secs(1));
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(config.measurement_timeout, Duration::from_secs(30));
        assert_eq!(config.name_patterns, vec!["KN-550BT", "iHealth", "KN-550"]);
        assert!(config.discover_battery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CuffConfig::new()
            .scan_timeout(Duration::from_secs(3))
            .name_patterns(["BP-Test"])
            .discover_battery(false);
        assert_eq!(config.scan_timeout, Duration::from_secs(3));
        assert_eq!(config.name_patterns, vec!["BP-Test".to_string()]);
        assert!(!config.discover_battery);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(
            CuffConfig::default()
                .measurement_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        let empty: [&str; 0] = [];
        assert!(CuffConfig::default().name_patterns(empty).validate().is_err());
        assert!(CuffConfig::default().event_capacity(0).validate().is_err());
    }
}
