// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-device poll scheduler
//!
//! Every enabled device gets its own task and timer. A cycle reads the
//! device channels one after the other, runs each reading through the
//! device's [`CounterProcessor`], publishes it on the live stream and hands it
//! to the [`StorageWriter`]. A channel answering with a protocol error is
//! recorded as a `Bad` reading and the cycle moves on to the next channel. A
//! cycle longer than the poll interval skips the tick that came due meanwhile,
//! so the next cycle starts on the following interval boundary.
//!
//! Cancellation is observed between cycles, so an in-flight read always
//! completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::reading::ProcessedReading;
use crate::config::DeviceConfig;
use crate::error::{DeviceError, StorageError};
use crate::modbus::DeviceConnectionPool;
use crate::processing::{CounterProcessor, ProcessingStats};
use crate::storage::StorageWriter;

/// Outcome of one poll cycle of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub device_id: String,
    /// Channels read successfully.
    pub readings: usize,
    pub read_failures: usize,
    /// `Bad` readings recorded for channels that answered with a protocol error.
    pub bad_records: usize,
    /// Channels not read because the device was unreachable.
    pub skipped_channels: usize,
    pub enqueue_failures: usize,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    overruns: AtomicU64,
    readings: AtomicU64,
    read_failures: AtomicU64,
    enqueue_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatsSnapshot {
    pub cycles: u64,
    pub overruns: u64,
    pub readings: u64,
    pub read_failures: u64,
    pub enqueue_failures: u64,
}

impl SchedulerStats {
    fn record(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.readings
            .fetch_add(report.readings as u64, Ordering::Relaxed);
        self.read_failures
            .fetch_add(report.read_failures as u64, Ordering::Relaxed);
        self.enqueue_failures
            .fetch_add(report.enqueue_failures as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
        }
    }
}

/// State owned by the task of one device.
struct DevicePoller {
    device: Arc<DeviceConfig>,
    processor: CounterProcessor,
    pool: Arc<DeviceConnectionPool>,
    writer: Arc<StorageWriter>,
    readings: broadcast::Sender<ProcessedReading>,
}

impl DevicePoller {
    async fn poll_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport {
            device_id: self.device.id.clone(),
            readings: 0,
            read_failures: 0,
            bad_records: 0,
            skipped_channels: 0,
            enqueue_failures: 0,
            duration: Duration::ZERO,
        };

        let channels: Vec<u16> = self.device.channels.iter().map(|c| c.channel).collect();
        let mut remaining = channels.len();
        for channel in channels {
            remaining -= 1;
            match self.pool.read_channel(&self.device.id, channel).await {
                Ok(raw) => {
                    let processed = self.processor.process(&raw);
                    report.readings += 1;
                    self.emit(processed, &mut report).await;
                }
                Err(err) => {
                    report.read_failures += 1;
                    warn!("Read of {}/{} failed: {}", self.device.id, channel, err);
                    if unreachable(&err) {
                        report.skipped_channels = remaining;
                        break;
                    }
                    if matches!(err, DeviceError::Protocol { .. }) {
                        let bad = self.processor.record_failure(&self.device.id, channel, &err);
                        report.bad_records += 1;
                        self.emit(bad, &mut report).await;
                    }
                }
            }
        }

        report.duration = started.elapsed();
        report
    }

    /// Publish a reading on the live stream and queue it for storage.
    async fn emit(&self, processed: ProcessedReading, report: &mut CycleReport) {
        debug!(
            "{}/{}: raw={} rate={:?} quality={}",
            processed.device_id,
            processed.channel,
            processed.raw_value,
            processed.rate,
            processed.quality
        );
        let channel = processed.channel;
        let _ = self.readings.send(processed.clone());
        match self.writer.enqueue(processed).await {
            Ok(()) => {}
            Err(StorageError::Closed) => {
                debug!("Writer closed, reading of {}/{} not stored", self.device.id, channel);
                report.enqueue_failures += 1;
            }
            Err(e) => {
                warn!("Could not enqueue {}/{}: {}", self.device.id, channel, e);
                report.enqueue_failures += 1;
            }
        }
    }

    async fn run(mut self, stats: Arc<SchedulerStats>, token: CancellationToken) {
        let period = self.device.poll_interval();
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Polling {} at {} every {:?} ({} channels)",
            self.device.id,
            self.device.endpoint(),
            period,
            self.device.channels.len()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.poll_cycle().await;
            stats.record(&report);
            if report.duration > period {
                stats.overruns.fetch_add(1, Ordering::Relaxed);
                // The tick missed during the overrun is due already, consume it
                let _ = ticker.tick().now_or_never();
                warn!(
                    "Poll cycle of {} took {:?}, longer than its {:?} interval; next cycle skipped",
                    self.device.id, report.duration, period
                );
            }
        }
        info!("Polling of {} stopped", self.device.id);
    }
}

/// Connection-level failures make the rest of the cycle pointless.
fn unreachable(err: &DeviceError) -> bool {
    matches!(
        err,
        DeviceError::Connection { .. } | DeviceError::Timeout { .. }
    )
}

pub struct PollScheduler {
    pool: Arc<DeviceConnectionPool>,
    writer: Arc<StorageWriter>,
    processing: Arc<ProcessingStats>,
    readings: broadcast::Sender<ProcessedReading>,
    default_window: usize,
    stats: Arc<SchedulerStats>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(
        pool: Arc<DeviceConnectionPool>,
        writer: Arc<StorageWriter>,
        processing: Arc<ProcessingStats>,
        default_window: usize,
        stream_capacity: usize,
    ) -> Self {
        let (readings, _) = broadcast::channel(stream_capacity.max(1));
        Self {
            pool,
            writer,
            processing,
            readings,
            default_window,
            stats: Arc::new(SchedulerStats::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Live stream of processed readings.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedReading> {
        self.readings.subscribe()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    fn pollers(&self) -> Vec<DevicePoller> {
        self.pool
            .device_ids()
            .into_iter()
            .filter_map(|id| self.pool.device(&id))
            .filter(|device| {
                if device.channels.is_empty() {
                    warn!("Device {} has no channels, not polled", device.id);
                }
                !device.channels.is_empty()
            })
            .map(|device| DevicePoller {
                processor: CounterProcessor::for_device(
                    &device,
                    self.default_window,
                    Arc::clone(&self.processing),
                ),
                device,
                pool: Arc::clone(&self.pool),
                writer: Arc::clone(&self.writer),
                readings: self.readings.clone(),
            })
            .collect()
    }

    /// Spawn one polling task per device.
    pub async fn start(&self, token: CancellationToken) -> usize {
        let mut tasks = self.tasks.lock().await;
        for poller in self.pollers() {
            tasks.push(tokio::spawn(
                poller.run(Arc::clone(&self.stats), token.clone()),
            ));
        }
        info!("Poll scheduler started with {} devices", tasks.len());
        tasks.len()
    }

    /// Run a single cycle on every device concurrently.
    pub async fn run_once(&self) -> Vec<CycleReport> {
        let mut pollers = self.pollers();
        let reports = join_all(pollers.iter_mut().map(|p| p.poll_cycle())).await;
        for report in &reports {
            self.stats.record(report);
        }
        reports
    }

    /// Wait for every polling task to exit.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Polling task ended abnormally: {}", e);
            }
        }
    }
}
