// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Storage configuration
//!
//! Selects the time-series backend and tunes the batching writer: queue
//! capacity, batch size, flush interval, bulk threshold and retry bounds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utility::backoff::RetryPolicy;

/// Time-series backend used by the storage writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// InfluxDB 1.x compatible HTTP write API.
    #[default]
    InfluxDb,
    /// In-process store, useful for dry runs.
    Memory,
}

/// Configuration of the storage writer and its backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    #[serde(default)]
    pub influxdb: InfluxDbConfig,

    /// Readings per batch before a write is triggered.
    pub batch_size: usize,

    /// Maximum time a partial batch waits before being written, in milliseconds.
    pub flush_interval_ms: u64,

    /// Capacity of the bounded intake queue.
    pub queue_capacity: usize,

    /// Batches with at least this many readings use the bulk write path.
    pub bulk_threshold: usize,

    /// Retries after the first failed attempt of a batch.
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Maximum time an enqueue may wait for queue space, in milliseconds.
    pub enqueue_timeout_ms: u64,

    /// Maximum time dispose waits for the consumer to drain, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

/// InfluxDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxDbConfig {
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
    pub measurement: String,
    /// Static tags added to every point, e.g. `site: plant-a`.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub request_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InfluxDb,
            influxdb: InfluxDbConfig::default(),
            batch_size: 100,
            flush_interval_ms: 1000,
            queue_capacity: 10_000,
            bulk_threshold: 50,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            enqueue_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            database: "adam_counters".to_string(),
            username: None,
            password: None,
            retention_policy: None,
            measurement: "counter_data".to_string(),
            tags: BTreeMap::new(),
            request_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Retry policy for failed batches. Attempts include the first write.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            0.2,
        )
    }
}
