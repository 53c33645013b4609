// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Time-series storage
//!
//! - [`TimeSeriesStore`]: backend seam with a bulk path, a row path and a ping probe
//! - [`InfluxDbStore`]: InfluxDB line protocol over HTTP
//! - [`MemoryStore`]: in-process store for dry runs and tests
//! - [`StorageWriter`]: the bounded, batching, retrying writer in front of a store

pub mod influx;
pub mod line_protocol;
pub mod memory;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use crate::acquisition::reading::ProcessedReading;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;

pub use influx::InfluxDbStore;
pub use memory::{MemoryStore, WritePath};
pub use writer::{StorageWriter, WriterHealth, WriterSettings};

/// A time-series backend.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Short backend name for logs and health reports.
    fn name(&self) -> &'static str;

    /// Write a large batch in as few requests as possible.
    async fn write_bulk(&self, readings: &[ProcessedReading]) -> Result<(), StorageError>;

    /// Write readings one by one.
    async fn write_rows(&self, readings: &[ProcessedReading]) -> Result<(), StorageError>;

    /// Connectivity probe, returns the round-trip time.
    async fn ping(&self) -> Result<Duration, StorageError>;

    /// Release underlying connections.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Create the store selected by the configuration.
pub fn create_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn TimeSeriesStore>> {
    match config.backend {
        StorageBackend::InfluxDb => {
            info!(
                "Using InfluxDB store at {} (database {})",
                config.influxdb.url, config.influxdb.database
            );
            Ok(Arc::new(InfluxDbStore::new(&config.influxdb)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory store, readings will not be persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
