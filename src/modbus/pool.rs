// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device connection pool
//!
//! One [`DeviceConnection`] per configured device. Reads to the same device are
//! serialized by its connection, reads to different devices are independent.
//!
//! Connection errors and timeouts are retried with exponential backoff and
//! jitter. Once retries are exhausted the error is returned and the device is
//! marked degraded until its next successful read. Every outcome feeds a
//! per-device rolling counter used by the device health check, and state
//! changes are published as [`DeviceEvent`]s.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;

use super::connection::DeviceConnection;
use super::register::decode_counter;
use crate::acquisition::reading::RawReading;
use crate::config::{AcquisitionConfig, DeviceConfig};
use crate::error::DeviceError;
use crate::utility::backoff::RetryPolicy;

/// Kind of device connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    Connected,
    Disconnected,
    /// Retries were exhausted.
    Degraded,
    /// First successful read after being degraded.
    Recovered,
}

/// Connectivity event published by the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub kind: DeviceEventKind,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Read statistics of one device.
pub struct DeviceStats {
    outcomes: Mutex<VecDeque<bool>>,
    capacity: usize,
    total_success: AtomicU64,
    total_failure: AtomicU64,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
    last_read_ms: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Copy of [`DeviceStats`] for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatsSnapshot {
    pub device_id: String,
    pub endpoint: String,
    pub connected: bool,
    pub degraded: bool,
    pub rolling_success: usize,
    pub rolling_failure: usize,
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_failures: u32,
    pub last_read_ms: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DeviceStatsSnapshot {
    /// Success ratio over the rolling window, `None` before the first read.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.rolling_success + self.rolling_failure;
        (total > 0).then(|| self.rolling_success as f64 / total as f64)
    }
}

impl DeviceStats {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_success: AtomicU64::new(0),
            total_failure: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
            last_read_ms: AtomicU64::new(0),
            last_success: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    fn push_outcome(&self, success: bool) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|p| p.into_inner());
        if outcomes.len() >= self.capacity {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    /// Returns true if the device was degraded before this success.
    fn record_success(&self, duration: Duration) -> bool {
        self.push_outcome(true);
        self.total_success.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_read_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
        *self.last_success.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
        self.degraded.swap(false, Ordering::SeqCst)
    }

    /// Returns true if the device just became degraded.
    fn record_failure(&self, error: &DeviceError) -> bool {
        self.push_outcome(false);
        self.total_failure.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error.to_string());
        !self.degraded.swap(true, Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

struct PooledDevice {
    config: Arc<DeviceConfig>,
    connection: DeviceConnection,
    stats: DeviceStats,
}

/// Pool of persistent device connections.
pub struct DeviceConnectionPool {
    devices: HashMap<String, Arc<PooledDevice>>,
    retry: RetryPolicy,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceConnectionPool {
    /// Build a pool for every enabled device of the configuration.
    pub fn new(devices: &[DeviceConfig], acquisition: &AcquisitionConfig) -> Self {
        Self::with_retry_policy(devices, acquisition, acquisition.retry.policy())
    }

    pub fn with_retry_policy(
        devices: &[DeviceConfig],
        acquisition: &AcquisitionConfig,
        retry: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(acquisition.stream_capacity.max(1));
        let devices = devices
            .iter()
            .filter(|d| d.enabled)
            .map(|d| {
                let config = Arc::new(d.clone());
                let timeout = d
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| acquisition.read_timeout());
                let pooled = PooledDevice {
                    connection: DeviceConnection::new(Arc::clone(&config), timeout),
                    stats: DeviceStats::new(acquisition.stats_window),
                    config,
                };
                (d.id.clone(), Arc::new(pooled))
            })
            .collect();

        Self {
            devices,
            retry,
            events,
        }
    }

    /// Subscribe to connectivity events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Ids of pooled devices, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceConfig>> {
        self.devices.get(device_id).map(|d| Arc::clone(&d.config))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Read one channel of a device, retrying connection errors and timeouts.
    pub async fn read_channel(
        &self,
        device_id: &str,
        channel: u16,
    ) -> Result<RawReading, DeviceError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| DeviceError::UnknownDevice(device_id.to_string()))?;
        let channel_config =
            device
                .config
                .channel(channel)
                .ok_or_else(|| DeviceError::UnknownChannel {
                    device: device_id.to_string(),
                    channel,
                })?;

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let was_connected = device.connection.is_connected();
            let result = device
                .connection
                .read_registers(
                    channel_config.register_type,
                    channel_config.start_address,
                    channel_config.register_count,
                )
                .await;
            self.publish_connectivity(device_id, was_connected, device.connection.is_connected());

            match result {
                Ok(words) => {
                    let read_duration = started.elapsed();
                    if device.stats.record_success(read_duration) {
                        info!("Device {} recovered", device_id);
                        self.publish(device_id, DeviceEventKind::Recovered, None);
                    }
                    return Ok(RawReading {
                        device_id: device_id.to_string(),
                        channel,
                        raw_value: decode_counter(&words, channel_config.word_order),
                        timestamp: Utc::now(),
                        read_duration,
                    });
                }
                Err(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        "Read {}/{} failed (attempt {}/{}), retrying in {:?}: {}",
                        device_id, channel, attempt, self.retry.max_attempts, delay, err
                    );
                    time::sleep(delay).await;
                }
                Err(err) => {
                    if device.stats.record_failure(&err) {
                        warn!("Device {} degraded: {}", device_id, err);
                        self.publish(
                            device_id,
                            DeviceEventKind::Degraded,
                            Some(err.to_string()),
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Statistics of one device.
    pub fn stats(&self, device_id: &str) -> Option<DeviceStatsSnapshot> {
        self.devices.get(device_id).map(|d| snapshot(d))
    }

    /// Statistics of all devices, sorted by id.
    pub fn all_stats(&self) -> Vec<DeviceStatsSnapshot> {
        let mut stats: Vec<DeviceStatsSnapshot> = self.devices.values().map(|d| snapshot(d)).collect();
        stats.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        stats
    }

    /// Close every connection.
    pub async fn disconnect_all(&self) {
        for (id, device) in &self.devices {
            if device.connection.is_connected() {
                device.connection.disconnect().await;
                self.publish(id, DeviceEventKind::Disconnected, None);
            }
        }
    }

    fn publish_connectivity(&self, device_id: &str, before: bool, after: bool) {
        match (before, after) {
            (false, true) => self.publish(device_id, DeviceEventKind::Connected, None),
            (true, false) => self.publish(device_id, DeviceEventKind::Disconnected, None),
            _ => {}
        }
    }

    fn publish(&self, device_id: &str, kind: DeviceEventKind, message: Option<String>) {
        // No subscriber is not an error
        let _ = self.events.send(DeviceEvent {
            device_id: device_id.to_string(),
            kind,
            message,
            timestamp: Utc::now(),
        });
    }
}

fn snapshot(device: &PooledDevice) -> DeviceStatsSnapshot {
    let stats = &device.stats;
    let (rolling_success, rolling_failure) = {
        let outcomes = stats.outcomes.lock().unwrap_or_else(|p| p.into_inner());
        let ok = outcomes.iter().filter(|o| **o).count();
        (ok, outcomes.len() - ok)
    };
    DeviceStatsSnapshot {
        device_id: device.config.id.clone(),
        endpoint: device.config.endpoint(),
        connected: device.connection.is_connected(),
        degraded: stats.is_degraded(),
        rolling_success,
        rolling_failure,
        total_success: stats.total_success.load(Ordering::Relaxed),
        total_failure: stats.total_failure.load(Ordering::Relaxed),
        consecutive_failures: stats.consecutive_failures(),
        last_read_ms: stats.last_read_ms.load(Ordering::Relaxed),
        last_success: *stats.last_success.lock().unwrap_or_else(|p| p.into_inner()),
        last_error: stats
            .last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone(),
    }
}
