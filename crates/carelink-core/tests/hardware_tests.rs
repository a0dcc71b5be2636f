//! Hardware tests for carelink-core.
//!
//! These need a powered-on KN-550BT in range and should be run with:
//! ```
//! cargo test --package carelink-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! `CARELINK_SCAN_SECS` overrides the scan window (default 15).

use std::env;
use std::sync::Arc;
use std::time::Duration;

use carelink_core::{BtleplugTransport, CuffConfig, CuffService};
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("carelink_core=debug")
        .with_test_writer()
        .try_init();
}

fn scan_window() -> Duration {
    let secs = env::var("CARELINK_SCAN_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(15);
    Duration::from_secs(secs)
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_read_battery() {
    init_tracing();
    let transport = Arc::new(BtleplugTransport::new().await.expect("adapter"));
    let cuff = CuffService::new(transport)
        .config(CuffConfig::default().init_timeout(Duration::from_secs(5)))
        .spawn()
        .unwrap();

    cuff.initialize().await.expect("adapter powered on");
    cuff.scan(Some(scan_window())).await.expect("cuff found");
    println!(
        "Connected to {:?}, battery {}%",
        cuff.connected_device_name(),
        cuff.battery_level()
    );
    assert!(cuff.is_ready());
    cuff.shutdown().await;
}

#[tokio::test]
#[ignore = "requires BLE hardware and a person wearing the cuff"]
async fn test_full_measurement() {
    init_tracing();
    let transport = Arc::new(BtleplugTransport::new().await.expect("adapter"));
    let cuff = CuffService::new(transport).spawn().unwrap();

    cuff.initialize().await.expect("adapter powered on");
    cuff.scan(Some(scan_window())).await.expect("cuff found");

    let reading = timeout(Duration::from_secs(90), cuff.measure())
        .await
        .expect("measurement finished")
        .expect("measurement succeeded");
    println!(
        "{} mmHg, pulse {} ({:?}, {})",
        reading.formatted_value(),
        reading.pulse,
        reading.source,
        reading.category()
    );
    cuff.shutdown().await;
}
