// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types for the acquisition pipeline
//!
//! Configuration and orchestration code uses `anyhow::Result`. The types in this
//! module describe the failures the pipeline must classify and recover from:
//!
//! - [`DeviceError`]: failures talking to a field device
//! - [`ProcessingError`]: readings whose rate cannot be trusted
//! - [`StorageError`]: time-series write failures
//!
//! Connection and storage errors are retried with backoff. Protocol and
//! processing errors are never retried.

use std::time::Duration;

use thiserror::Error;

/// Failure while reading registers from a field device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Device unreachable, connection refused or reset.
    #[error("connection error on device '{device}': {reason}")]
    Connection { device: String, reason: String },

    /// Malformed or unexpected response, including Modbus exception codes.
    #[error("protocol error on device '{device}': {reason}")]
    Protocol { device: String, reason: String },

    /// No response within the configured timeout.
    #[error("timeout on device '{device}' after {after:?}")]
    Timeout { device: String, after: Duration },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{device}' has no channel {channel}")]
    UnknownChannel { device: String, channel: u16 },
}

impl DeviceError {
    /// Whether the pool should retry the read after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::Connection { .. } | DeviceError::Timeout { .. }
        )
    }
}

/// Reason a reading was classified as `Bad`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// Counter delta cannot be explained by a single wraparound.
    #[error("ambiguous counter overflow: previous={previous}, current={current}, max={max}")]
    OverflowAmbiguous { previous: u64, current: u64, max: u64 },

    #[error("timestamps are not increasing ({elapsed_secs}s elapsed)")]
    NonIncreasingTimestamp { elapsed_secs: f64 },

    /// Delta exceeds the configured plausible rate for the elapsed time.
    #[error("implausible rate {rate:.3}/s exceeds ceiling {ceiling:.3}/s")]
    ImplausibleRate { rate: f64, ceiling: f64 },
}

/// Failure while persisting readings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// A write failed but may succeed if retried.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// The store refused the data itself, retrying cannot help.
    #[error("storage rejected the write: {0}")]
    Rejected(String),

    /// All retry attempts failed; the batch has been dropped.
    #[error("storage write failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The writer no longer accepts readings.
    #[error("storage writer is closed")]
    Closed,

    #[error("enqueue timed out after {0:?} waiting for queue space")]
    BackpressureTimeout(Duration),
}

impl StorageError {
    /// Whether the writer should try the same batch again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Transient(err.to_string())
    }
}
