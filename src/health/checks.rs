// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Built-in component checks

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use log::warn;

use super::check::HealthCheck;
use super::{
    ComponentHealth, HealthStatus, APPLICATION_COMPONENT, DEVICES_COMPONENT, PROCESSOR_COMPONENT,
    STORAGE_COMPONENT,
};
use crate::modbus::DeviceConnectionPool;
use crate::processing::ProcessingStats;
use crate::storage::StorageWriter;
use crate::utility::{SystemStats, SystemStatsCollector};

/// Process resource usage against memory thresholds.
pub struct ApplicationCheck {
    collector: Arc<Mutex<Option<SystemStatsCollector>>>,
    memory_warning_mb: u64,
    memory_critical_mb: u64,
}

impl ApplicationCheck {
    pub fn new(memory_warning_mb: u64, memory_critical_mb: u64) -> Self {
        let collector = match SystemStatsCollector::new() {
            Ok(collector) => Some(collector),
            Err(e) => {
                warn!("Process statistics unavailable: {}", e);
                None
            }
        };
        Self {
            collector: Arc::new(Mutex::new(collector)),
            memory_warning_mb,
            memory_critical_mb,
        }
    }

    fn evaluate(&self, stats: &SystemStats) -> ComponentHealth {
        let mut health = if stats.memory_usage_mb >= self.memory_critical_mb {
            ComponentHealth::new(APPLICATION_COMPONENT, HealthStatus::Unhealthy, 40.0)
                .with_warning(format!(
                    "Resident memory {} MB above critical limit {} MB",
                    stats.memory_usage_mb, self.memory_critical_mb
                ))
                .with_recommendation("Restart the daemon and check for a leak")
        } else if stats.memory_usage_mb >= self.memory_warning_mb {
            ComponentHealth::new(APPLICATION_COMPONENT, HealthStatus::Degraded, 70.0).with_warning(
                format!(
                    "Resident memory {} MB above warning limit {} MB",
                    stats.memory_usage_mb, self.memory_warning_mb
                ),
            )
        } else {
            ComponentHealth::healthy(APPLICATION_COMPONENT)
        };
        health.message = Some(stats.format_for_logging());
        health
            .with_metric("memory_mb", stats.memory_usage_mb as f64)
            .with_metric("virtual_memory_mb", stats.virtual_memory_mb as f64)
            .with_metric("cpu_percent", stats.cpu_usage_percent as f64)
            .with_metric("uptime_secs", stats.process_uptime_seconds as f64)
    }
}

#[async_trait]
impl HealthCheck for ApplicationCheck {
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        let collector = Arc::clone(&self.collector);
        let stats = tokio::task::spawn_blocking(move || {
            let mut guard = collector.lock().unwrap_or_else(|p| p.into_inner());
            guard.as_mut().map(|c| c.collect_stats()).transpose()
        })
        .await
        .context("Statistics collection task failed")??;

        Ok(match stats {
            Some(stats) => self.evaluate(&stats),
            None => ComponentHealth::new(APPLICATION_COMPONENT, HealthStatus::Degraded, 70.0)
                .with_warning("Process statistics unavailable"),
        })
    }
}

/// Connectivity of the polled devices.
pub struct DeviceCheck {
    pool: Arc<DeviceConnectionPool>,
    failure_threshold: u32,
}

impl DeviceCheck {
    pub fn new(pool: Arc<DeviceConnectionPool>, failure_threshold: u32) -> Self {
        Self {
            pool,
            failure_threshold: failure_threshold.max(1),
        }
    }
}

#[async_trait]
impl HealthCheck for DeviceCheck {
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        let stats = self.pool.all_stats();
        if stats.is_empty() {
            return Ok(
                ComponentHealth::new(DEVICES_COMPONENT, HealthStatus::Degraded, 60.0)
                    .with_warning("No enabled devices")
                    .with_recommendation("Enable at least one device in the configuration"),
            );
        }

        let mut warnings = Vec::new();
        let mut unhealthy = 0usize;
        let mut degraded = 0usize;
        let mut total_score = 0.0;
        let mut health = ComponentHealth::new(DEVICES_COMPONENT, HealthStatus::Healthy, 100.0);

        for device in &stats {
            let mut score = device.success_rate().unwrap_or(1.0) * 100.0;
            if device.consecutive_failures >= self.failure_threshold {
                unhealthy += 1;
                score = 0.0;
                warnings.push(format!(
                    "{} ({}) failed {} consecutive reads: {}",
                    device.device_id,
                    device.endpoint,
                    device.consecutive_failures,
                    device.last_error.as_deref().unwrap_or("unknown error")
                ));
            } else if device.degraded {
                degraded += 1;
                score = score.min(50.0);
                warnings.push(format!("{} is degraded", device.device_id));
            }
            total_score += score;

            let key = format!("device.{}", device.device_id);
            health.metrics.insert(
                format!("{}.success_rate", key),
                device.success_rate().unwrap_or(1.0),
            );
            health.metrics.insert(
                format!("{}.consecutive_failures", key),
                device.consecutive_failures as f64,
            );
            health
                .metrics
                .insert(format!("{}.last_read_ms", key), device.last_read_ms as f64);
        }

        let score = total_score / stats.len() as f64;
        health.score = score;
        health.status = HealthStatus::from_score(score);
        if unhealthy == stats.len() {
            health.degrade_to(HealthStatus::Unhealthy);
            health
                .recommendations
                .push("Check network connectivity to the devices".to_string());
        } else if unhealthy > 0 || degraded > 0 {
            health.degrade_to(HealthStatus::Degraded);
        }
        health.warnings = warnings;
        health.message = Some(format!(
            "{} devices, {} degraded, {} unhealthy",
            stats.len(),
            degraded,
            unhealthy
        ));
        Ok(health
            .with_metric("devices_total", stats.len() as f64)
            .with_metric("devices_degraded", degraded as f64)
            .with_metric("devices_unhealthy", unhealthy as f64))
    }
}

/// Quality distribution of processed readings.
pub struct ProcessorCheck {
    stats: Arc<ProcessingStats>,
}

impl ProcessorCheck {
    pub fn new(stats: Arc<ProcessingStats>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl HealthCheck for ProcessorCheck {
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        let snapshot = self.stats.snapshot();
        let bad_ratio = snapshot.bad_ratio();
        let mut health = ComponentHealth::scored(PROCESSOR_COMPONENT, 100.0 * (1.0 - bad_ratio));
        if bad_ratio > 0.2 {
            health = health
                .with_warning(format!("{:.1}% of readings are Bad", bad_ratio * 100.0))
                .with_recommendation("Check max_rate and counter_bits of the affected channels");
        }
        Ok(health
            .with_metric("processed", snapshot.processed as f64)
            .with_metric("good", snapshot.good as f64)
            .with_metric("uncertain", snapshot.uncertain as f64)
            .with_metric("bad", snapshot.bad as f64)
            .with_metric("overflow_corrected", snapshot.overflow_corrected as f64)
            .with_metric("bad_ratio", bad_ratio))
    }
}

/// Writer liveness and store connectivity.
pub struct StorageCheck {
    writer: Arc<StorageWriter>,
    stale_after: Duration,
}

impl StorageCheck {
    pub fn new(writer: Arc<StorageWriter>, stale_after: Duration) -> Self {
        Self {
            writer,
            stale_after,
        }
    }
}

#[async_trait]
impl HealthCheck for StorageCheck {
    async fn check(&self) -> anyhow::Result<ComponentHealth> {
        let writer = self.writer.health();
        let mut score: f64 = 100.0;
        let mut health = ComponentHealth::new(STORAGE_COMPONENT, HealthStatus::Healthy, 100.0);

        match self.writer.store().ping().await {
            Ok(rtt) => {
                health
                    .metrics
                    .insert("ping_ms".to_string(), rtt.as_secs_f64() * 1000.0);
            }
            Err(e) => {
                score -= 40.0;
                health.warnings.push(format!("Store unreachable: {}", e));
            }
        }

        let fill = if writer.queue_capacity == 0 {
            0.0
        } else {
            writer.pending_count as f64 / writer.queue_capacity as f64
        };
        if fill > 0.8 {
            score -= 20.0;
            health
                .warnings
                .push(format!("Write queue {:.0}% full", fill * 100.0));
        }

        if writer.pending_count > 0 {
            let stale = match writer.last_successful_write {
                Some(last) => (Utc::now() - last)
                    .to_std()
                    .map(|age| age > self.stale_after)
                    .unwrap_or(false),
                None => false,
            };
            if stale {
                score -= 20.0;
                health.warnings.push(format!(
                    "No successful write for more than {}s",
                    self.stale_after.as_secs()
                ));
            }
        }

        if !writer.accepting {
            health.warnings.push("Writer intake is closed".to_string());
        }

        health.score = score.max(0.0);
        health.status = HealthStatus::from_score(health.score);
        if !writer.is_background_task_healthy {
            health.degrade_to(HealthStatus::Unhealthy);
            health
                .recommendations
                .push("Check the time-series store; batches are being dropped".to_string());
        }
        health.message = writer.last_error.clone();

        Ok(health
            .with_metric("pending", writer.pending_count as f64)
            .with_metric("written", writer.total_written as f64)
            .with_metric("dropped", writer.total_dropped as f64)
            .with_metric("batches_failed", writer.batches_failed as f64)
            .with_metric("queue_fill_ratio", fill))
    }
}
