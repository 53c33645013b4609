// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Batching storage writer
//!
//! Producers call [`StorageWriter::enqueue`], which waits for space in a bounded
//! queue instead of dropping readings. A single consumer task drains the queue
//! into a batch that is written when it reaches `batch_size` or when the flush
//! timer fires. Batches of at least `bulk_threshold` readings take the bulk
//! path of the store, smaller ones the row path.
//!
//! A failed batch is retried with backoff. Once retries are exhausted the batch
//! is dropped, the error is recorded in [`WriterHealth`] and a `DATA LOSS` line
//! is logged.
//!
//! ## Lifecycle
//!
//! - [`flush`](StorageWriter::flush) writes everything enqueued before the call.
//! - [`dispose`](StorageWriter::dispose) closes intake, waits (bounded) for the
//!   consumer to drain, then closes the store.
//! - Cancelling the writer token closes intake from the consumer side and
//!   performs a final flush.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::TimeSeriesStore;
use crate::acquisition::reading::ProcessedReading;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::utility::backoff::RetryPolicy;

/// Runtime parameters of the writer.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub bulk_threshold: usize,
    pub retry: RetryPolicy,
    pub enqueue_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&StorageConfig> for WriterSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            bulk_threshold: config.bulk_threshold.max(1),
            retry: config.retry_policy(),
            enqueue_timeout: config.enqueue_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Liveness report of the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterHealth {
    /// False after a dropped batch until the next successful write, or if
    /// the consumer stopped unexpectedly.
    pub is_background_task_healthy: bool,
    pub last_successful_write: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Readings accepted but not yet written or dropped.
    pub pending_count: u64,
    pub total_written: u64,
    pub total_dropped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
    pub queue_capacity: usize,
    pub accepting: bool,
}

enum WriterCommand {
    Reading(ProcessedReading),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct WriterState {
    healthy: AtomicBool,
    consumer_running: AtomicBool,
    closing: AtomicBool,
    pending: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl WriterState {
    fn record_written(&self, count: usize) {
        self.healthy.store(true, Ordering::SeqCst);
        self.release(count);
        self.written.fetch_add(count as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        *self.last_success.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
    }

    fn record_dropped(&self, count: usize, error: &StorageError) {
        self.healthy.store(false, Ordering::SeqCst);
        self.release(count);
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.set_error(error);
    }

    fn set_error(&self, error: &StorageError) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error.to_string());
    }

    fn release(&self, count: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                Some(p.saturating_sub(count as u64))
            });
    }
}

/// Bounded, batching, retrying writer in front of a [`TimeSeriesStore`].
pub struct StorageWriter {
    intake: RwLock<Option<mpsc::Sender<WriterCommand>>>,
    state: Arc<WriterState>,
    store: Arc<dyn TimeSeriesStore>,
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    token: CancellationToken,
    settings: WriterSettings,
}

impl StorageWriter {
    /// Start the writer and its consumer task.
    pub fn start(
        store: Arc<dyn TimeSeriesStore>,
        settings: WriterSettings,
        token: CancellationToken,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let state = Arc::new(WriterState::default());
        state.healthy.store(true, Ordering::SeqCst);
        state.consumer_running.store(true, Ordering::SeqCst);

        let consumer = BatchConsumer {
            receiver,
            batch: Vec::with_capacity(settings.batch_size),
            store: Arc::clone(&store),
            state: Arc::clone(&state),
            settings: settings.clone(),
        };
        info!(
            "Starting storage writer on {} store (queue {}, batch {}, bulk >= {})",
            store.name(),
            settings.queue_capacity,
            settings.batch_size,
            settings.bulk_threshold
        );
        let handle = tokio::spawn(consumer.run(token.clone()));

        Arc::new(Self {
            intake: RwLock::new(Some(sender)),
            state,
            store,
            consumer: tokio::sync::Mutex::new(Some(handle)),
            token,
            settings,
        })
    }

    pub fn from_config(
        store: Arc<dyn TimeSeriesStore>,
        config: &StorageConfig,
        token: CancellationToken,
    ) -> Arc<Self> {
        Self::start(store, WriterSettings::from(config), token)
    }

    pub fn store(&self) -> Arc<dyn TimeSeriesStore> {
        Arc::clone(&self.store)
    }

    fn sender(&self) -> Result<mpsc::Sender<WriterCommand>, StorageError> {
        self.intake
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(StorageError::Closed)
    }

    /// Queue a reading, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// * [`StorageError::Closed`] once the writer is disposed or cancelled
    /// * [`StorageError::BackpressureTimeout`] if no space frees up within the
    ///   enqueue timeout; the reading is logged as lost
    pub async fn enqueue(&self, reading: ProcessedReading) -> Result<(), StorageError> {
        let sender = self.sender()?;
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        match sender
            .send_timeout(WriterCommand::Reading(reading), self.settings.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(WriterCommand::Reading(reading))) => {
                self.state.release(1);
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
                let err = StorageError::BackpressureTimeout(self.settings.enqueue_timeout);
                self.state.set_error(&err);
                error!(
                    "DATA LOSS: reading {}/{} at {} rejected: {}",
                    reading.device_id, reading.channel, reading.timestamp, err
                );
                Err(err)
            }
            Err(_) => {
                self.state.release(1);
                Err(StorageError::Closed)
            }
        }
    }

    /// Write everything enqueued before this call.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let sender = self.sender()?;
        let (ack, done) = oneshot::channel();
        sender
            .send(WriterCommand::Flush(ack))
            .await
            .map_err(|_| StorageError::Closed)?;
        done.await.map_err(|_| StorageError::Closed)
    }

    /// Current liveness report.
    pub fn health(&self) -> WriterHealth {
        let state = &self.state;
        let consumer_ok = state.consumer_running.load(Ordering::SeqCst)
            || state.closing.load(Ordering::SeqCst);
        WriterHealth {
            is_background_task_healthy: state.healthy.load(Ordering::SeqCst) && consumer_ok,
            last_successful_write: *state.last_success.lock().unwrap_or_else(|p| p.into_inner()),
            last_error: state
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            pending_count: state.pending.load(Ordering::SeqCst),
            total_written: state.written.load(Ordering::Relaxed),
            total_dropped: state.dropped.load(Ordering::Relaxed),
            batches_written: state.batches_written.load(Ordering::Relaxed),
            batches_failed: state.batches_failed.load(Ordering::Relaxed),
            queue_capacity: self.settings.queue_capacity,
            accepting: self
                .intake
                .read()
                .map(|intake| intake.is_some())
                .unwrap_or(false)
                && !self.token.is_cancelled(),
        }
    }

    /// Close intake, wait for the consumer to drain, then close the store.
    ///
    /// Waiting is bounded by the shutdown timeout; past it the consumer is
    /// cancelled and finally aborted.
    pub async fn dispose(&self) -> Result<(), StorageError> {
        info!("Disposing storage writer");
        self.state.closing.store(true, Ordering::SeqCst);
        let sender = self
            .intake
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        drop(sender);

        let handle = self.consumer.lock().await.take();
        if let Some(mut handle) = handle {
            match time::timeout(self.settings.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Storage consumer finished"),
                Ok(Err(e)) => error!("Storage consumer panicked: {}", e),
                Err(_) => {
                    warn!(
                        "Storage consumer did not finish within {:?}, cancelling",
                        self.settings.shutdown_timeout
                    );
                    self.token.cancel();
                    if time::timeout(Duration::from_secs(1), &mut handle)
                        .await
                        .is_err()
                    {
                        let pending = self.state.pending.load(Ordering::SeqCst);
                        error!(
                            "DATA LOSS: aborting storage consumer with {} pending readings",
                            pending
                        );
                        handle.abort();
                    }
                }
            }
        }

        self.store.close().await
    }
}

struct BatchConsumer {
    receiver: mpsc::Receiver<WriterCommand>,
    batch: Vec<ProcessedReading>,
    store: Arc<dyn TimeSeriesStore>,
    state: Arc<WriterState>,
    settings: WriterSettings,
}

impl BatchConsumer {
    async fn run(mut self, token: CancellationToken) {
        let mut ticker = time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Storage writer cancelled, draining queue");
                    self.receiver.close();
                    while let Some(command) = self.receiver.recv().await {
                        self.handle(command).await;
                    }
                    self.write_batch().await;
                    break;
                }
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("Storage intake closed, final flush");
                        self.write_batch().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.write_batch().await;
                    }
                }
            }
        }

        self.state.consumer_running.store(false, Ordering::SeqCst);
        info!("Storage writer stopped");
    }

    async fn handle(&mut self, command: WriterCommand) {
        match command {
            WriterCommand::Reading(reading) => {
                self.batch.push(reading);
                if self.batch.len() >= self.settings.batch_size {
                    self.write_batch().await;
                }
            }
            WriterCommand::Flush(ack) => {
                self.write_batch().await;
                let _ = ack.send(());
            }
        }
    }

    async fn write_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.settings.batch_size));
        let count = batch.len();
        let bulk = count >= self.settings.bulk_threshold;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = if bulk {
                self.store.write_bulk(&batch).await
            } else {
                self.store.write_rows(&batch).await
            };

            match result {
                Ok(()) => {
                    debug!(
                        "Wrote batch of {} readings ({} path, attempt {})",
                        count,
                        if bulk { "bulk" } else { "row" },
                        attempt
                    );
                    self.state.record_written(count);
                    return;
                }
                Err(err) if err.is_retryable() && self.settings.retry.should_retry(attempt) => {
                    let delay = self.settings.retry.delay_for(attempt);
                    warn!(
                        "Batch write failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.settings.retry.max_attempts, delay, err
                    );
                    self.state.set_error(&err);
                    time::sleep(delay).await;
                }
                Err(err) => {
                    let exhausted = StorageError::Exhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    };
                    let first = batch.first().map(|r| r.timestamp);
                    let last = batch.last().map(|r| r.timestamp);
                    error!(
                        "DATA LOSS: dropped batch of {} readings ({:?} .. {:?}): {}",
                        count, first, last, exhausted
                    );
                    self.state.record_dropped(count, &exhausted);
                    return;
                }
            }
        }
    }
}
