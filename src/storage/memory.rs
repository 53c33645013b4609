// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-process store
//!
//! Backs the `--dry-run` mode and the writer tests. Failures and stalls can be
//! injected to exercise retries and backpressure.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;

use super::TimeSeriesStore;
use crate::acquisition::reading::ProcessedReading;
use crate::error::StorageError;

/// Write path taken by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Bulk,
    Rows,
}

pub struct MemoryStore {
    readings: Mutex<Vec<ProcessedReading>>,
    calls: Mutex<Vec<(WritePath, usize)>>,
    attempts: AtomicU32,
    fail_next: AtomicU32,
    reject_next: AtomicU32,
    unavailable: AtomicBool,
    paused: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            readings: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            fail_next: AtomicU32::new(0),
            reject_next: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            paused,
        }
    }

    /// Persisted readings in write order.
    pub fn readings(&self) -> Vec<ProcessedReading> {
        self.readings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Successful write calls with their path and size.
    pub fn calls(&self) -> Vec<(WritePath, usize)> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Write attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `count` write attempts.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Refuse the next `count` writes as malformed.
    pub fn reject_next(&self, count: u32) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    /// Fail every write and ping until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every write until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    async fn write(&self, path: WritePath, readings: &[ProcessedReading]) -> Result<(), StorageError> {
        let mut paused = self.paused.subscribe();
        // Sender is owned by self, so the channel cannot close here
        let _ = paused.wait_for(|p| !*p).await;

        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Transient("memory store unavailable".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Transient("injected failure".to_string()));
        }
        if self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Rejected("injected rejection".to_string()));
        }

        debug!("Memory store {:?} write of {} readings", path, readings.len());
        self.readings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(readings);
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((path, readings.len()));
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_bulk(&self, readings: &[ProcessedReading]) -> Result<(), StorageError> {
        self.write(WritePath::Bulk, readings).await
    }

    async fn write_rows(&self, readings: &[ProcessedReading]) -> Result<(), StorageError> {
        self.write(WritePath::Rows, readings).await
    }

    async fn ping(&self) -> Result<Duration, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Transient("memory store unavailable".to_string()))
        } else {
            Ok(Duration::ZERO)
        }
    }
}
