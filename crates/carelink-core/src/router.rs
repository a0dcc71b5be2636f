//! Routing of button events reported by the cuff.

use tracing::{debug, info, warn};

use carelink_types::DeviceEventCode;

use crate::events::CareEvent;

/// Reason attached to the error emitted when the user aborts on the cuff.
pub const USER_STOPPED_REASON: &str = "user stopped on device";

/// Maps [`DeviceEventCode`]s to observer notifications.
///
/// The router is stateless and never touches the measurement session: a
/// stop pressed on the cuff is announced, but a pending measurement is still
/// resolved by its own timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceEventRouter;

impl DeviceEventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Returns the event to publish for `code`, if any.
    pub fn route(&self, code: DeviceEventCode) -> Option<CareEvent> {
        match code {
            DeviceEventCode::StartedOnDevice => {
                info!("measurement started on cuff");
                Some(CareEvent::MeasurementStarted)
            }
            DeviceEventCode::StoppedOnDevice => {
                warn!("measurement stopped on cuff");
                Some(CareEvent::MeasurementError {
                    reason: USER_STOPPED_REASON.to_string(),
                })
            }
            DeviceEventCode::Measuring => {
                debug!("cuff measuring");
                None
            }
            DeviceEventCode::Unknown(code) => {
                debug!(code = format_args!("0x{code:02X}"), "unknown device event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_types::packet::{DecodedPacket, decode};

    #[test]
    fn test_start_button_announces_start() {
        let router = DeviceEventRouter::new();
        assert_eq!(
            router.route(DeviceEventCode::StartedOnDevice),
            Some(CareEvent::MeasurementStarted)
        );
    }

    #[test]
    fn test_stop_button_reports_error() {
        let router = DeviceEventRouter::new();
        assert_eq!(
            router.route(DeviceEventCode::StoppedOnDevice),
            Some(CareEvent::MeasurementError {
                reason: "user stopped on device".to_string()
            })
        );
    }

    #[test]
    fn test_informational_codes_are_silent() {
        let router = DeviceEventRouter::new();
        assert_eq!(router.route(DeviceEventCode::Measuring), None);
        assert_eq!(router.route(DeviceEventCode::Unknown(0x42)), None);
    }

    #[test]
    fn test_decoded_start_event_routes_to_started() {
        let DecodedPacket::DeviceEvent(code) = decode(&[0xFE, 0x01]) else {
            panic!("expected device event");
        };
        assert_eq!(
            DeviceEventRouter::new().route(code),
            Some(CareEvent::MeasurementStarted)
        );
    }
}
