// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::acquisition::{CycleReport, PollScheduler, ProcessedReading};
use crate::config::Config;
use crate::health::{
    ApplicationCheck, DeviceCheck, HealthOrchestrator, LogErrorReporter, ProcessorCheck,
    StorageCheck, APPLICATION_COMPONENT, DEVICES_COMPONENT, PROCESSOR_COMPONENT,
    STORAGE_COMPONENT,
};
use crate::modbus::{DeviceConnectionPool, DeviceEvent};
use crate::processing::ProcessingStats;
use crate::storage::{create_store, StorageWriter, TimeSeriesStore, WriterHealth};

/// Components of the acquisition pipeline, wired together.
struct Pipeline {
    pool: Arc<DeviceConnectionPool>,
    writer: Arc<StorageWriter>,
    scheduler: Arc<PollScheduler>,
    health: Arc<HealthOrchestrator>,
}

impl Pipeline {
    fn build(config: &Config, store: Arc<dyn TimeSeriesStore>) -> Self {
        let pool = Arc::new(DeviceConnectionPool::new(
            &config.devices,
            &config.acquisition,
        ));
        let processing = Arc::new(ProcessingStats::default());
        let writer = StorageWriter::from_config(store, &config.storage, CancellationToken::new());
        let scheduler = Arc::new(PollScheduler::new(
            Arc::clone(&pool),
            Arc::clone(&writer),
            Arc::clone(&processing),
            config.acquisition.window_size,
            config.acquisition.stream_capacity,
        ));

        let health = Arc::new(HealthOrchestrator::new(
            &config.health,
            Arc::new(LogErrorReporter),
        ));
        health.register_builtin(
            APPLICATION_COMPONENT,
            Arc::new(ApplicationCheck::new(
                config.health.memory_warning_mb,
                config.health.memory_critical_mb,
            )),
        );
        health.register_builtin(
            DEVICES_COMPONENT,
            Arc::new(DeviceCheck::new(
                Arc::clone(&pool),
                config.acquisition.failure_threshold,
            )),
        );
        health.register_builtin(
            PROCESSOR_COMPONENT,
            Arc::new(ProcessorCheck::new(processing)),
        );
        health.register_builtin(
            STORAGE_COMPONENT,
            Arc::new(StorageCheck::new(
                Arc::clone(&writer),
                Duration::from_secs(config.health.stale_write_secs),
            )),
        );

        Self {
            pool,
            writer,
            scheduler,
            health,
        }
    }

    /// Drain the writer and close device connections.
    async fn close(&self) {
        if let Err(e) = self.writer.dispose().await {
            error!("Error while disposing storage writer: {}", e);
        }
        self.pool.disconnect_all().await;
    }
}

/// Result of a single-shot run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnceSummary {
    pub cycles: Vec<CycleReport>,
    pub writer: WriterHealth,
}

impl OnceSummary {
    pub fn readings(&self) -> usize {
        self.cycles.iter().map(|c| c.readings).sum()
    }

    pub fn failures(&self) -> usize {
        self.cycles.iter().map(|c| c.read_failures).sum()
    }
}

/// Long-running acquisition daemon.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    /// Stops the poll loops.
    poll_token: CancellationToken,
    /// Stops the health monitor and heartbeat, after the writer is drained.
    service_token: CancellationToken,
    pipeline: Option<Pipeline>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            poll_token: CancellationToken::new(),
            service_token: CancellationToken::new(),
            pipeline: None,
        }
    }

    /// Launch all configured tasks based on configuration
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let store = create_store(&config.storage).context("Failed to create storage backend")?;
        self.launch_with_store(config, store).await
    }

    /// Launch against an explicit store.
    pub async fn launch_with_store(
        &mut self,
        config: &Config,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Result<()> {
        if self.pipeline.is_some() {
            anyhow::bail!("Daemon already launched");
        }
        match store.ping().await {
            Ok(rtt) => info!("Storage backend {} reachable ({:?})", store.name(), rtt),
            Err(e) => warn!(
                "Storage backend {} not reachable yet, writes will be retried: {}",
                store.name(),
                e
            ),
        }

        let pipeline = Pipeline::build(config, store);

        if config.acquisition.enabled {
            let devices = pipeline.scheduler.start(self.poll_token.clone()).await;
            if devices == 0 {
                warn!("No device to poll");
            }
        } else {
            info!("Acquisition disabled by configuration");
        }

        if config.health.enabled {
            self.start_health_monitor(&pipeline, config.health.check_interval());
        }
        self.start_heartbeat(
            &pipeline,
            Duration::from_secs(config.health.heartbeat_interval_secs.max(1)),
        );

        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn start_health_monitor(&mut self, pipeline: &Pipeline, interval: Duration) {
        debug!("Starting health monitor");
        let monitor = Arc::clone(&pipeline.health).spawn_monitor(interval, self.service_token.clone());
        self.tasks.push(tokio::spawn(async move {
            monitor.await.context("Health monitor task failed")?;
            Ok(())
        }));
    }

    /// Start a heartbeat task that logs pipeline status periodically
    fn start_heartbeat(&mut self, pipeline: &Pipeline, interval: Duration) {
        debug!("Starting heartbeat monitor");
        let token = self.service_token.clone();
        let scheduler = Arc::clone(&pipeline.scheduler);
        let writer = Arc::clone(&pipeline.writer);
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let polls = scheduler.stats();
                        let storage = writer.health();
                        info!(
                            "Daemon heartbeat: {} cycles, {} readings, {} read failures, {} written, {} pending, {} dropped",
                            polls.cycles,
                            polls.readings,
                            polls.read_failures,
                            storage.total_written,
                            storage.pending_count,
                            storage.total_dropped
                        );
                    }
                }
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    pub fn health(&self) -> Option<Arc<HealthOrchestrator>> {
        self.pipeline.as_ref().map(|p| Arc::clone(&p.health))
    }

    pub fn writer(&self) -> Option<Arc<StorageWriter>> {
        self.pipeline.as_ref().map(|p| Arc::clone(&p.writer))
    }

    pub fn scheduler(&self) -> Option<Arc<PollScheduler>> {
        self.pipeline.as_ref().map(|p| Arc::clone(&p.scheduler))
    }

    /// Live stream of processed readings.
    pub fn readings(&self) -> Option<broadcast::Receiver<ProcessedReading>> {
        self.pipeline.as_ref().map(|p| p.scheduler.subscribe())
    }

    /// Live stream of device connectivity events.
    pub fn device_events(&self) -> Option<broadcast::Receiver<DeviceEvent>> {
        self.pipeline.as_ref().map(|p| p.pool.subscribe())
    }

    /// Stop polling. [`join`](Self::join) completes the shutdown.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.poll_token.cancel();
    }

    /// Wait for polling to stop, drain the writer, then stop the remaining tasks.
    pub async fn join(self) -> Result<()> {
        self.poll_token.cancel();
        if let Some(pipeline) = &self.pipeline {
            pipeline.scheduler.join().await;
            pipeline.close().await;
            let writer = pipeline.writer.health();
            info!(
                "Storage writer closed: {} written, {} dropped",
                writer.total_written, writer.total_dropped
            );
        }
        self.service_token.cancel();

        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
            }
        }
        info!("Daemon stopped");
        Ok(())
    }

    /// Poll every device once, flush and close.
    pub async fn run_once(config: &Config) -> Result<OnceSummary> {
        let store = create_store(&config.storage).context("Failed to create storage backend")?;
        Self::run_once_with_store(config, store).await
    }

    pub async fn run_once_with_store(
        config: &Config,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Result<OnceSummary> {
        let pipeline = Pipeline::build(config, store);
        let cycles = pipeline.scheduler.run_once().await;
        if let Err(e) = pipeline.writer.flush().await {
            warn!("Final flush failed: {}", e);
        }
        pipeline.close().await;
        Ok(OnceSummary {
            cycles,
            writer: pipeline.writer.health(),
        })
    }
}
