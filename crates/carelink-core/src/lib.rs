//! BLE core for the iHealth KN-550BT blood pressure monitor.
//!
//! This crate drives the cuff from adapter power-on to a finished reading:
//!
//! - **Connection lifecycle**: [`ConnectionStateMachine`] scans, connects,
//!   discovers the GATT layout and tracks link loss
//! - **Measurement sessions**: [`MeasurementSession`] pairs a request with
//!   exactly one reading, falling back to a simulated placeholder on timeout
//! - **Device events**: [`DeviceEventRouter`] turns the cuff's button
//!   packets into [`CareEvent`]s
//! - **Async service**: [`CuffService`] runs all of the above on one tokio
//!   task behind a cloneable [`CuffHandle`]
//!
//! The state machines are free of I/O. [`CuffController`] composes them and
//! returns [`Effect`]s, which the service executes against a
//! [`BleTransport`]: [`BtleplugTransport`] for real hardware or
//! [`MockTransport`] for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use carelink_core::{BtleplugTransport, CuffConfig, CuffService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleplugTransport::new().await?);
//!     let cuff = CuffService::new(transport)
//!         .config(CuffConfig::default())
//!         .spawn()?;
//!
//!     cuff.initialize().await?;
//!     cuff.scan(None).await?;
//!     println!("Connected to {:?}", cuff.connected_device_name());
//!
//!     let reading = cuff.measure().await?;
//!     println!("{} ({})", reading.formatted_value(), reading.category());
//!     Ok(())
//! }
//! ```

pub mod ble;
#[cfg(feature = "cloud-sync")]
pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod link;
pub mod mock;
pub mod router;
pub mod service;
pub mod session;
pub mod traits;
pub mod transport;

pub use carelink_types::types;
pub use carelink_types::uuid as uuids;
pub use carelink_types::{
    BloodPressureCategory, Command, DecodedPacket, DeviceEventCode, Reading, ReadingSource,
};

pub use ble::BtleplugTransport;
#[cfg(feature = "cloud-sync")]
pub use cloud::HttpCloudSync;
pub use config::CuffConfig;
pub use controller::{CuffController, Effect};
pub use error::{AdapterFailure, Error, Result};
pub use events::{CareEvent, EventDispatcher, EventReceiver, EventSender};
pub use link::{ConnectionState, ConnectionStateMachine, LinkStatus};
pub use mock::{MockTransport, MockTransportBuilder};
pub use router::DeviceEventRouter;
pub use service::{CuffHandle, CuffService};
pub use session::{MeasurementCallback, MeasurementSession, SessionMode};
pub use traits::{CloudSync, MemoryStore, NoopCloudSync, ReadingStore};
pub use transport::{AdapterState, Advertisement, BleTransport, PeripheralId, TransportEvent};
