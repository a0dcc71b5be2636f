//! End-to-end tests for `CuffService` against `MockTransport`.
//!
//! Time is paused in every test, so measurement and scan timeouts elapse
//! instantly once the service is idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use carelink_core::{
    AdapterFailure, AdapterState, CareEvent, CloudSync, ConnectionState, CuffConfig, CuffHandle,
    CuffService, Error, EventReceiver, LinkStatus, MemoryStore, MockTransport,
    MockTransportBuilder, Reading, ReadingSource, ReadingStore,
};
use carelink_types::packet::{START_COMMAND, STOP_COMMAND, encode_measurement};

fn spawn(transport: &Arc<MockTransport>) -> CuffHandle {
    CuffService::new(transport.clone()).spawn().unwrap()
}

async fn connect(cuff: &CuffHandle) {
    cuff.initialize().await.unwrap();
    cuff.scan(None).await.unwrap();
    assert!(cuff.is_ready());
}

async fn wait_until(cuff: &CuffHandle, condition: impl FnMut(&LinkStatus) -> bool) {
    let mut status = cuff.watch_status();
    timeout(Duration::from_secs(120), status.wait_for(condition))
        .await
        .expect("status not reached in time")
        .expect("service stopped");
}

/// Let spawned tasks (radio worker, uploads) run without advancing timers.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut EventReceiver) -> Vec<CareEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[derive(Default)]
struct CountingCloud {
    uploads: AtomicUsize,
}

#[async_trait]
impl CloudSync for CountingCloud {
    async fn upload(&self, _reading: &Reading) -> carelink_core::Result<()> {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Cloud that takes a while to answer, or never answers when `hang` is set.
#[derive(Default)]
struct SlowCloud {
    hang: bool,
    uploads: AtomicUsize,
}

#[async_trait]
impl CloudSync for SlowCloud {
    async fn upload(&self, _reading: &Reading) -> carelink_core::Result<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Store whose `append` blocks the calling thread, noting whether other
/// tasks kept running meanwhile.
#[derive(Default)]
struct BlockingStore {
    ticks: Arc<AtomicUsize>,
    others_ran: AtomicBool,
    inner: MemoryStore,
}

impl ReadingStore for BlockingStore {
    fn append(&self, reading: &Reading) -> carelink_core::Result<()> {
        let before = self.ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        let after = self.ticks.load(Ordering::SeqCst);
        self.others_ran.store(after > before, Ordering::SeqCst);
        self.inner.append(reading)
    }

    fn load_all(&self) -> carelink_core::Result<Vec<Reading>> {
        self.inner.load_all()
    }

    fn clear_all(&self) -> carelink_core::Result<()> {
        self.inner.clear_all()
    }
}

// --- connection lifecycle ---

#[tokio::test(start_paused = true)]
async fn test_scan_connects_to_advertising_cuff() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .name("KN-550BT 0A1B")
            .auto_advertise(true)
            .battery(Some(64))
            .build(),
    );
    let cuff = spawn(&transport);
    let mut events = cuff.subscribe();

    connect(&cuff).await;
    assert_eq!(cuff.connected_device_name().as_deref(), Some("KN-550BT 0A1B"));
    assert_eq!(cuff.status().state, ConnectionState::Ready);

    wait_until(&cuff, |s| s.battery_level == 64).await;
    settle().await;
    assert!(transport.is_connected());
    assert!(!transport.is_scanning());

    let events = drain(&mut events);
    assert!(events.contains(&CareEvent::DeviceConnected {
        name: Some("KN-550BT 0A1B".into())
    }));
    assert!(events.contains(&CareEvent::BatteryLevelUpdated { level: 64 }));
    assert!(events.contains(&CareEvent::StateChanged {
        from: ConnectionState::DiscoveringCharacteristics,
        to: ConnectionState::Ready,
    }));

    cuff.shutdown().await;
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_scan_times_out_without_cuff() {
    let transport = Arc::new(MockTransportBuilder::new().build());
    let cuff = spawn(&transport);
    cuff.initialize().await.unwrap();

    let result = cuff.scan(Some(Duration::from_secs(5))).await;
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert_eq!(cuff.status().state, ConnectionState::Idle);
    assert!(!cuff.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_non_matching_devices_are_ignored() {
    let transport = Arc::new(MockTransportBuilder::new().name("Fitness Band").build());
    let cuff = spawn(&transport);
    cuff.initialize().await.unwrap();

    let scan = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.scan(Some(Duration::from_secs(5))).await }
    });
    wait_until(&cuff, LinkStatus::is_scanning).await;
    transport.advertise();

    let result = scan.await.unwrap();
    assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_scan_before_initialize_fails() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    assert!(matches!(cuff.scan(None).await, Err(Error::NotInitialized)));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_waits_for_power_on() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .adapter_state(AdapterState::PoweredOff)
            .build(),
    );
    let cuff = spawn(&transport);

    let result = cuff.initialize().await;
    assert!(matches!(
        result,
        Err(Error::AdapterUnavailable(AdapterFailure::PoweredOff))
    ));
    assert_eq!(cuff.status().state, ConnectionState::Uninitialized);

    transport.set_adapter_state(AdapterState::PoweredOn);
    cuff.initialize().await.unwrap();
    assert_eq!(cuff.status().state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_returns_to_idle() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    transport.set_connect_failure(Some("peer busy"));
    let cuff = spawn(&transport);
    cuff.initialize().await.unwrap();

    assert!(matches!(
        cuff.scan(None).await,
        Err(Error::ConnectionFailed { .. })
    ));
    assert_eq!(cuff.status().state, ConnectionState::Idle);

    transport.set_connect_failure(None);
    cuff.scan(None).await.unwrap();
    assert!(cuff.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_missing_write_characteristic_never_becomes_ready() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .auto_advertise(true)
            .omit_write_characteristic(true)
            .build(),
    );
    let cuff = spawn(&transport);
    cuff.initialize().await.unwrap();

    assert!(cuff.scan(None).await.is_err());
    assert!(!cuff.is_ready());
    assert!(matches!(cuff.write(&START_COMMAND).await, Err(Error::NotReady)));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_reports_disconnect() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    transport.drop_link(Some("out of range"));
    wait_until(&cuff, |s| s.state == ConnectionState::Disconnected).await;
    assert!(cuff.connected_device_name().is_none());
    assert!(drain(&mut events).contains(&CareEvent::DeviceDisconnected {
        reason: Some("out of range".into())
    }));

    // A fresh scan reconnects.
    cuff.scan(None).await.unwrap();
    assert!(cuff.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_adapter_power_loss_resets_link() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;

    transport.set_adapter_state(AdapterState::PoweredOff);
    wait_until(&cuff, |s| s.state == ConnectionState::Uninitialized).await;
    assert!(!cuff.is_ready());
    assert!(matches!(cuff.scan(None).await, Err(Error::NotInitialized)));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_link() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;

    cuff.disconnect().await.unwrap();
    wait_until(&cuff, |s| s.state == ConnectionState::Disconnected).await;
    assert!(!transport.is_connected());
}

// --- measurements ---

#[tokio::test(start_paused = true)]
async fn test_measure_returns_cuff_reading() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .auto_advertise(true)
            .reply_to_start(120, 80, 72)
            .build(),
    );
    let store = Arc::new(MemoryStore::new());
    let cloud = Arc::new(CountingCloud::default());
    let cuff = CuffService::new(transport.clone())
        .store(Box::new(store.clone()))
        .cloud(cloud.clone())
        .spawn()
        .unwrap();
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    let reading = cuff.measure().await.unwrap();
    assert_eq!(
        (reading.systolic, reading.diastolic, reading.pulse),
        (120, 80, 72)
    );
    assert_eq!(reading.source, ReadingSource::Bluetooth);
    assert!(!cuff.is_measuring());

    settle().await;
    assert_eq!(transport.writes(), vec![START_COMMAND.to_vec()]);
    assert_eq!(store.load_all().unwrap(), vec![reading.clone()]);
    assert_eq!(cloud.uploads.load(Ordering::Relaxed), 1);

    let events = drain(&mut events);
    assert!(events.contains(&CareEvent::MeasurementStarted));
    assert!(events.contains(&CareEvent::MeasurementCompleted { reading }));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_upload_in_flight() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .auto_advertise(true)
            .reply_to_start(128, 84, 70)
            .build(),
    );
    let cloud = Arc::new(SlowCloud::default());
    let cuff = CuffService::new(transport.clone())
        .cloud(cloud.clone())
        .spawn()
        .unwrap();
    connect(&cuff).await;

    // No settling: the CLI shuts down right after the reading arrives.
    let reading = cuff.measure().await.unwrap();
    assert_eq!(reading.source, ReadingSource::Bluetooth);
    cuff.shutdown().await;
    assert_eq!(cloud.uploads.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_hung_upload() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .auto_advertise(true)
            .reply_to_start(128, 84, 70)
            .build(),
    );
    let cloud = Arc::new(SlowCloud {
        hang: true,
        ..SlowCloud::default()
    });
    let cuff = CuffService::new(transport.clone())
        .cloud(cloud.clone())
        .spawn()
        .unwrap();
    connect(&cuff).await;
    cuff.measure().await.unwrap();

    let started = tokio::time::Instant::now();
    cuff.shutdown().await;
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(cloud.uploads.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_slow_store_does_not_stall_runtime() {
    let transport = Arc::new(
        MockTransportBuilder::new()
            .auto_advertise(true)
            .reply_to_start(120, 80, 72)
            .build(),
    );
    let store = Arc::new(BlockingStore::default());
    let ticker = tokio::spawn({
        let ticks = store.ticks.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    });
    let cuff = CuffService::new(transport.clone())
        .store(Box::new(store.clone()))
        .spawn()
        .unwrap();
    connect(&cuff).await;

    cuff.measure().await.unwrap();
    cuff.shutdown().await;
    ticker.abort();

    assert_eq!(store.load_all().unwrap().len(), 1);
    assert!(store.others_ran.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_silent_cuff_yields_simulated_reading() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let store = Arc::new(MemoryStore::new());
    let cloud = Arc::new(CountingCloud::default());
    let cuff = CuffService::new(transport.clone())
        .config(CuffConfig::default().measurement_timeout(Duration::from_secs(30)))
        .store(Box::new(store.clone()))
        .cloud(cloud.clone())
        .spawn()
        .unwrap();
    connect(&cuff).await;

    let started = tokio::time::Instant::now();
    let reading = cuff.measure().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(reading.source, ReadingSource::Simulated);
    assert!((110..=140).contains(&reading.systolic));

    settle().await;
    assert_eq!(store.load_all().unwrap().len(), 1);
    assert_eq!(cloud.uploads.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn test_measure_requires_ready() {
    let transport = Arc::new(MockTransportBuilder::new().build());
    let cuff = spawn(&transport);
    assert!(matches!(cuff.measure().await, Err(Error::NotReady)));
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_measurement_is_rejected() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;

    let first = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;

    assert!(matches!(
        cuff.start_measurement(|_| {}).await,
        Err(Error::MeasurementInProgress)
    ));
    assert!(matches!(
        cuff.listen_for_measurement(|_| {}).await,
        Err(Error::MeasurementInProgress)
    ));

    transport.notify(&encode_measurement(131, 84, 77));
    let reading = first.await.unwrap().unwrap();
    assert_eq!(reading.systolic, 131);
}

#[tokio::test(start_paused = true)]
async fn test_stop_measurement_cancels_pending() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;

    cuff.stop_measurement().await.unwrap();
    assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
    assert!(!cuff.is_measuring());

    settle().await;
    assert_eq!(
        transport.writes(),
        vec![START_COMMAND.to_vec(), STOP_COMMAND.to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_listen_waits_for_button_measurement() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.listen().await }
    });
    wait_until(&cuff, |s| s.measuring).await;
    assert!(drain(&mut events).iter().all(|e| *e != CareEvent::MeasurementStarted));

    transport.notify(&[0xFE, 0x01]);
    transport.notify(&[0xFE, 0x03]);
    transport.notify(&encode_measurement(300, 80, 72));
    transport.notify(&encode_measurement(125, 82, 70));

    let reading = pending.await.unwrap().unwrap();
    assert_eq!(
        (reading.systolic, reading.diastolic, reading.pulse),
        (125, 82, 70)
    );
    settle().await;
    assert!(transport.writes().is_empty());

    let events = drain(&mut events);
    let started = events
        .iter()
        .filter(|e| **e == CareEvent::MeasurementStarted)
        .count();
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_button_reports_error_and_falls_back() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;
    transport.notify(&[0xFE, 0x02]);

    let reading = pending.await.unwrap().unwrap();
    assert_eq!(reading.source, ReadingSource::Simulated);
    assert!(drain(&mut events).contains(&CareEvent::MeasurementError {
        reason: "user stopped on device".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_measurement() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;
    transport.drop_link(None);

    let reading = pending.await.unwrap().unwrap();
    assert_eq!(reading.source, ReadingSource::Simulated);
    let events = drain(&mut events);
    assert!(events.contains(&CareEvent::DeviceDisconnected { reason: None }));
    assert!(events.contains(&CareEvent::MeasurementError {
        reason: "device disconnected".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_reading_is_stored() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let store = Arc::new(MemoryStore::new());
    let cuff = CuffService::new(transport.clone())
        .store(Box::new(store.clone()))
        .spawn()
        .unwrap();
    connect(&cuff).await;
    let mut events = cuff.subscribe();

    transport.notify(&encode_measurement(142, 91, 80));
    timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(CareEvent::MeasurementCompleted { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .unwrap();

    let stored = store.load_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].systolic, 142);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_does_not_break_session() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;
    transport.set_write_failure(true);

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;
    transport.notify(&encode_measurement(119, 79, 61));

    let reading = pending.await.unwrap().unwrap();
    assert_eq!(reading.source, ReadingSource::Bluetooth);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_pending_measurement() {
    let transport = Arc::new(MockTransportBuilder::new().auto_advertise(true).build());
    let cuff = spawn(&transport);
    connect(&cuff).await;

    let pending = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.measure().await }
    });
    wait_until(&cuff, |s| s.measuring).await;
    cuff.shutdown().await;

    assert!(matches!(pending.await.unwrap(), Err(Error::ServiceStopped)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_outstanding_requests() {
    let transport = Arc::new(MockTransportBuilder::new().build());
    let cuff = spawn(&transport);
    cuff.initialize().await.unwrap();

    let scan = tokio::spawn({
        let cuff = cuff.clone();
        async move { cuff.scan(None).await }
    });
    wait_until(&cuff, LinkStatus::is_scanning).await;
    cuff.shutdown().await;

    assert!(matches!(scan.await.unwrap(), Err(Error::ServiceStopped)));
    assert!(matches!(cuff.write(&[1]).await, Err(Error::ServiceStopped)));
}
