//! End-to-end tests: controller -> polling -> snapshot -> history.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use furnace_monitor::config::PointConfig;
use furnace_monitor::{
    open_store, Address, CellMonitor, ConnectionState, EventBus, Field, MonitorConfig,
    PollScheduler, RegisterClient, SimulatedTransport, Stores,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn addr(name: &str) -> Address {
    Address::parse(name).unwrap()
}

fn simulated_monitor() -> Arc<CellMonitor<SimulatedTransport>> {
    CellMonitor::new(cell_config(), SimulatedTransport::new(), Stores::memory()).unwrap()
}

fn cell_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.polling.default_interval_ms = 300;
    config.history.save_interval_ms = 1000;
    config.polling.points = vec![
        PointConfig::new(addr("M100"), Field::Door1Lock),
        PointConfig::new(addr("M101"), Field::Door2Lock),
        PointConfig::new(addr("M123"), Field::FurnaceStatus),
        PointConfig::new(addr("D200"), Field::FurnaceTemperature),
        PointConfig::new(addr("D201"), Field::FurnacePressure),
    ];
    config
}

#[tokio::test(start_paused = true)]
async fn test_polled_state_reaches_history() {
    let monitor = simulated_monitor();
    let sim = monitor.client().transport();
    sim.set_bool(&addr("M100"), true);
    sim.set_bool(&addr("M123"), true);
    sim.set(&addr("D200"), 930);
    sim.set(&addr("D201"), 12);

    assert!(monitor.connect().await.success);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let latest = monitor.persistence().latest(1).await.unwrap();
    assert_eq!(latest.len(), 1);
    let saved = &latest[0].snapshot;
    let live = monitor.snapshot();
    assert!(saved.door1_lock);
    assert!(!saved.door2_lock);
    assert!(saved.furnace.running);
    assert_eq!(saved.furnace.temperature, 930.0);
    assert_eq!(saved.furnace.pressure, 12.0);
    assert_eq!(saved.door1_lock, live.door1_lock);
    assert_eq!(saved.furnace, live.furnace);

    // Four polls per point in 1.2 s at 300 ms, first one immediate.
    assert!(sim.read_count(&addr("D200")) >= 4);
    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_nothing_saved_while_disconnected() {
    let monitor = simulated_monitor();
    monitor.client().transport().refuse_connections(true);

    let outcome = monitor.connect().await;
    assert!(!outcome.success);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(monitor.stores().history.count().await.unwrap(), 0);
    assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stopping_one_address_leaves_others_running() {
    let sim = SimulatedTransport::new();
    let client = Arc::new(RegisterClient::new(sim, EventBus::new(64)));
    client.connect().await;
    let scheduler = PollScheduler::new(Arc::clone(&client));

    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));
    let (a, b) = (Arc::clone(&hits_a), Arc::clone(&hits_b));
    scheduler
        .start(addr("D1"), Duration::from_millis(100), move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    scheduler
        .start(addr("D2"), Duration::from_millis(100), move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(scheduler.stop(&addr("D2")).await);
    assert!(!scheduler.stop(&addr("D2")).await);
    let frozen = hits_b.load(Ordering::SeqCst);
    let before = hits_a.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(hits_b.load(Ordering::SeqCst), frozen);
    assert!(hits_a.load(Ordering::SeqCst) >= before + 4);
    assert!(scheduler.is_polling(&addr("D1")).await);

    scheduler.stop_all().await;
    assert!(scheduler.active().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lost_point_disconnects_and_reconnect_resumes() {
    let monitor = simulated_monitor();
    let sim = monitor.client().transport();
    sim.fail_reads(&addr("D201"), true);

    monitor.connect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
    assert!(monitor.connection_status().message.starts_with("Connection lost"));
    assert!(monitor.scheduler().active().await.is_empty());

    sim.fail_reads(&addr("D201"), false);
    let reconnect = monitor.spawn_reconnect(Duration::from_millis(500));
    tokio::time::sleep(Duration::from_millis(1700)).await;

    assert_eq!(monitor.connection_state(), ConnectionState::Connected);
    assert_eq!(monitor.scheduler().active().await.len(), 5);
    assert!(monitor.stores().history.count().await.unwrap() >= 1);

    reconnect.abort();
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_file_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let connection = format!("file://{}", dir.path().display());

    {
        let stores = open_store(&connection).await.unwrap();
        let monitor = CellMonitor::new(cell_config(), SimulatedTransport::new(), stores).unwrap();
        monitor.client().transport().set(&addr("D200"), 700);
        monitor.connect().await;
        monitor.poll_once().await;
        assert!(monitor.persistence().save_tick().await);
        assert!(monitor.persistence().save_tick().await);
        monitor.shutdown().await;
    }

    let stores = open_store(&connection).await.unwrap();
    assert!(stores.history.count().await.unwrap() >= 2);
    let latest = stores.history.latest(1).await.unwrap();
    assert_eq!(latest[0].snapshot.furnace.temperature, 700.0);

    let stats = stores
        .history
        .statistics(Utc::now() - chrono::Duration::hours(1), Utc::now())
        .await
        .unwrap();
    assert_eq!(stats.temperature.unwrap().max, 700.0);
}

/// Loopback controller that answers one holding-register read with `word`,
/// then closes the socket.
async fn spawn_flaky_controller(word: u16) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 7];
        socket.read_exact(&mut header).await.unwrap();
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut request = vec![0u8; len - 1];
        socket.read_exact(&mut request).await.unwrap();

        let [hi, lo] = word.to_be_bytes();
        let mut reply = header[0..4].to_vec();
        reply.extend_from_slice(&[0x00, 0x05, header[6], 0x03, 0x02, hi, lo]);
        socket.write_all(&reply).await.unwrap();
    });
    port
}

#[tokio::test]
async fn test_tcp_link_drop_disconnects_without_escalation() {
    let mut config = MonitorConfig::default();
    config.plc.host = "127.0.0.1".to_string();
    config.plc.port = spawn_flaky_controller(640).await;
    config.polling.escalate_read_failures = false;
    config.polling.default_interval_ms = 100;
    config.history.save_interval_ms = 200;
    config.polling.points = vec![PointConfig::new(addr("D200"), Field::FurnaceTemperature)];

    let monitor = CellMonitor::tcp(config, Stores::memory()).unwrap();
    assert!(monitor.connect().await.success);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while monitor.connection_state() != ConnectionState::Disconnected
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
    assert!(!monitor.client().is_connected());
    assert!(monitor.scheduler().active().await.is_empty());
    assert_eq!(monitor.snapshot().furnace.temperature, 640.0);

    let saved = monitor.persistence().stats().saved;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(monitor.persistence().stats().saved, saved);
    monitor.shutdown().await;
}
