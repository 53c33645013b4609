// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acquisition configuration
//!
//! Global settings for device polling: read timeout, retry policy, rolling
//! window size and the consecutive failure threshold used by health checks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utility::backoff::RetryPolicy;

/// Settings shared by every device poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Flag to enable or disable polling altogether.
    pub enabled: bool,

    /// Default read timeout in milliseconds.
    pub read_timeout_ms: u64,

    /// Retry policy for connection errors and timeouts.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Default number of samples kept per channel window.
    pub window_size: usize,

    /// Consecutive failed reads after which a device is reported unhealthy.
    pub failure_threshold: u32,

    /// Number of outcomes tracked by the per-device rolling success counter.
    pub stats_window: usize,

    /// Buffer size of the live reading and device event streams.
    pub stream_capacity: usize,
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter in `[0, 1]` applied to each delay.
    pub jitter: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read_timeout_ms: 3000,
            retry: RetryConfig::default(),
            window_size: 60,
            failure_threshold: 5,
            stats_window: 100,
            stream_capacity: 1024,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl AcquisitionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl RetryConfig {
    /// Build the runtime retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter,
        )
    }
}
