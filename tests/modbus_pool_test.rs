// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the device connection pool against the in-process counter simulator
//!
//! A simulator is started on an OS-assigned port for each test, then the pool
//! reads its counters through a real Modbus TCP connection.

use std::net::SocketAddr;
use std::time::Duration;

use rust_counter_logger::config::{
    AcquisitionConfig, ChannelConfig, DeviceConfig, RegisterType, WordOrder,
};
use rust_counter_logger::error::DeviceError;
use rust_counter_logger::modbus::{CounterSimulator, DeviceConnectionPool, DeviceEventKind};
use rust_counter_logger::utility::RetryPolicy;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn device(id: &str, addr: SocketAddr) -> DeviceConfig {
    DeviceConfig {
        id: id.to_string(),
        address: addr.ip().to_string(),
        port: addr.port(),
        timeout_ms: Some(500),
        channels: vec![ChannelConfig::counter32(0, 0), ChannelConfig::counter32(1, 2)],
        ..DeviceConfig::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(20), 0.0)
}

async fn start_simulator(
    counters: u16,
) -> Result<(CounterSimulator, SocketAddr, CancellationToken), Box<dyn std::error::Error>> {
    let simulator = CounterSimulator::new(counters);
    let token = CancellationToken::new();
    let (addr, _handle) = simulator.spawn("127.0.0.1:0", token.clone()).await?;
    Ok((simulator, addr, token))
}

#[tokio::test]
async fn test_read_32bit_counters() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (simulator, addr, token) = start_simulator(2).await?;
    simulator.set_counter(0, 123_456);
    simulator.set_counter(1, 0x0001_0002);

    let pool = DeviceConnectionPool::new(&[device("sim", addr)], &AcquisitionConfig::default());
    let first = pool.read_channel("sim", 0).await?;
    let second = pool.read_channel("sim", 1).await?;

    assert_eq!(first.raw_value, 123_456);
    assert_eq!(first.device_id, "sim");
    assert_eq!(second.raw_value, 0x0001_0002);
    assert!(second.timestamp >= first.timestamp);

    let stats = pool.stats("sim").ok_or("missing stats")?;
    assert!(stats.connected);
    assert_eq!(stats.total_success, 2);
    assert_eq!(stats.success_rate(), Some(1.0));

    token.cancel();
    Ok(())
}

#[tokio::test]
async fn test_input_table_and_high_word_first() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (simulator, addr, token) = start_simulator(1).await?;
    simulator.set_counter(0, 0x0001_0002);

    let mut config = device("sim", addr);
    config.channels = vec![ChannelConfig {
        register_type: RegisterType::Input,
        word_order: WordOrder::HighFirst,
        ..ChannelConfig::counter32(0, 0)
    }];
    let pool = DeviceConnectionPool::new(&[config], &AcquisitionConfig::default());

    // Registers hold [0x0002, 0x0001]; read high word first that is 0x0002_0001
    let reading = pool.read_channel("sim", 0).await?;
    assert_eq!(reading.raw_value, 0x0002_0001);

    token.cancel();
    Ok(())
}

#[tokio::test]
async fn test_exception_degrades_then_recovers() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (simulator, addr, token) = start_simulator(2).await?;
    let pool = DeviceConnectionPool::with_retry_policy(
        &[device("sim", addr)],
        &AcquisitionConfig::default(),
        fast_retry(),
    );
    let mut events = pool.subscribe();

    simulator.set_failing(true);
    let err = pool.read_channel("sim", 0).await.unwrap_err();
    assert!(matches!(err, DeviceError::Protocol { .. }));
    let stats = pool.stats("sim").ok_or("missing stats")?;
    assert!(stats.degraded);
    assert_eq!(stats.consecutive_failures, 1);
    // Protocol errors are not retried and keep the connection
    assert!(stats.connected);

    simulator.set_failing(false);
    pool.read_channel("sim", 0).await?;
    assert!(!pool.stats("sim").ok_or("missing stats")?.degraded);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            DeviceEventKind::Connected,
            DeviceEventKind::Degraded,
            DeviceEventKind::Recovered
        ]
    );

    token.cancel();
    Ok(())
}

#[tokio::test]
async fn test_unreachable_device_fails_after_retries() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    // Reserve a port, then free it so connections are refused
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let pool = DeviceConnectionPool::with_retry_policy(
        &[device("down", addr)],
        &AcquisitionConfig::default(),
        fast_retry(),
    );
    let err = pool.read_channel("down", 0).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error {:?}", err);

    let stats = pool.stats("down").ok_or("missing stats")?;
    assert!(stats.degraded);
    assert!(!stats.connected);
    assert_eq!(stats.total_failure, 1);
    assert!(stats.last_error.is_some());
    Ok(())
}

#[tokio::test]
async fn test_devices_are_independent() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (simulator, addr, token) = start_simulator(2).await?;
    simulator.set_counter(0, 42);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let dead = listener.local_addr()?;
    drop(listener);

    let pool = DeviceConnectionPool::with_retry_policy(
        &[device("up", addr), device("down", dead)],
        &AcquisitionConfig::default(),
        fast_retry(),
    );
    let (up, down) = tokio::join!(pool.read_channel("up", 0), pool.read_channel("down", 0));
    assert_eq!(up?.raw_value, 42);
    assert!(down.is_err());
    assert!(!pool.stats("up").ok_or("missing stats")?.degraded);

    pool.disconnect_all().await;
    assert!(!pool.stats("up").ok_or("missing stats")?.connected);

    token.cancel();
    Ok(())
}
