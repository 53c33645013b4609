// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Poll scheduler behaviour on misbehaving devices

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_counter_logger::acquisition::{DataQuality, PollScheduler};
use rust_counter_logger::config::{AcquisitionConfig, ChannelConfig, DeviceConfig, StorageConfig};
use rust_counter_logger::modbus::{CounterSimulator, DeviceConnectionPool};
use rust_counter_logger::processing::ProcessingStats;
use rust_counter_logger::storage::{MemoryStore, StorageWriter};
use rust_counter_logger::utility::RetryPolicy;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn device(addr: SocketAddr, poll_interval_ms: u64, timeout_ms: u64, channels: u16) -> DeviceConfig {
    DeviceConfig {
        id: "dev".to_string(),
        address: addr.ip().to_string(),
        port: addr.port(),
        poll_interval_ms,
        timeout_ms: Some(timeout_ms),
        channels: (0..channels)
            .map(|c| ChannelConfig::counter32(c, c * 2))
            .collect(),
        ..DeviceConfig::default()
    }
}

struct Harness {
    scheduler: PollScheduler,
    writer: Arc<StorageWriter>,
    store: Arc<MemoryStore>,
    processing: Arc<ProcessingStats>,
}

fn harness(device: DeviceConfig) -> Harness {
    let pool = Arc::new(DeviceConnectionPool::with_retry_policy(
        &[device],
        &AcquisitionConfig::default(),
        RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(10), 0.0),
    ));
    let store = Arc::new(MemoryStore::new());
    let writer = StorageWriter::from_config(
        store.clone(),
        &StorageConfig::default(),
        CancellationToken::new(),
    );
    let processing = Arc::new(ProcessingStats::default());
    let scheduler = PollScheduler::new(pool, writer.clone(), processing.clone(), 10, 64);
    Harness {
        scheduler,
        writer,
        store,
        processing,
    }
}

#[tokio::test]
async fn test_overrunning_cycle_skips_next_tick() -> Result<()> {
    init_logging();
    // Accepts connections but never answers, every read hits the timeout
    let silent = TcpListener::bind("127.0.0.1:0").await?;
    let h = harness(device(silent.local_addr()?, 100, 120, 1));

    let token = CancellationToken::new();
    assert_eq!(h.scheduler.start(token.clone()).await, 1);
    tokio::time::sleep(Duration::from_millis(1050)).await;
    token.cancel();
    h.scheduler.join().await;

    // Cycles of ~120ms on a 100ms interval start on 200ms boundaries.
    // Back-to-back polling would fit 9 of them.
    let stats = h.scheduler.stats();
    assert!(stats.cycles >= 4, "only {} cycles", stats.cycles);
    assert!(stats.cycles <= 6, "{} cycles, overruns were not skipped", stats.cycles);
    assert_eq!(stats.overruns, stats.cycles);
    assert_eq!(stats.read_failures, stats.cycles);
    assert!(h.store.readings().is_empty());

    drop(silent);
    Ok(())
}

#[tokio::test]
async fn test_protocol_errors_are_recorded_as_bad() -> Result<()> {
    init_logging();
    let simulator = CounterSimulator::new(2);
    simulator.set_counter(0, 500);
    simulator.set_counter(1, 700);
    let token = CancellationToken::new();
    let (addr, _server) = simulator.spawn("127.0.0.1:0", token.clone()).await?;
    let h = harness(device(addr, 1000, 500, 2));
    let mut live = h.scheduler.subscribe();

    simulator.set_failing(true);
    let reports = h.scheduler.run_once().await;
    h.writer.flush().await?;

    // Protocol errors do not stop the cycle, both channels are attempted
    assert_eq!(reports[0].read_failures, 2);
    assert_eq!(reports[0].skipped_channels, 0);
    assert_eq!(reports[0].bad_records, 2);
    assert_eq!(reports[0].readings, 0);

    let mut stored = h.store.readings();
    stored.sort_by_key(|r| r.channel);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].channel, 0);
    assert_eq!(stored[1].channel, 1);
    for reading in &stored {
        assert_eq!(reading.quality, DataQuality::Bad);
        assert_eq!(reading.device_id, "dev");
        assert_eq!(reading.rate, None);
        assert_eq!(reading.unit, "counts");
    }

    let mut published = Vec::new();
    while let Ok(reading) = live.try_recv() {
        published.push(reading.quality);
    }
    assert_eq!(published, vec![DataQuality::Bad, DataQuality::Bad]);

    // The device answers again, the same scheduler reads it normally
    simulator.set_failing(false);
    let reports = h.scheduler.run_once().await;
    h.writer.flush().await?;
    assert_eq!(reports[0].readings, 2);
    assert_eq!(reports[0].bad_records, 0);
    let mut raw: Vec<u64> = h
        .store
        .readings()
        .iter()
        .filter(|r| r.quality != DataQuality::Bad)
        .map(|r| r.raw_value)
        .collect();
    raw.sort();
    assert_eq!(raw, vec![500, 700]);

    assert_eq!(h.processing.snapshot().bad, 2);
    token.cancel();
    Ok(())
}
