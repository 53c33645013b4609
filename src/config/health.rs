// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health monitoring configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the health orchestrator and its built-in checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the periodic health monitor.
    pub enabled: bool,

    /// Interval between two full health checks, in seconds.
    pub check_interval_secs: u64,

    /// Maximum duration of a single component check, in milliseconds.
    pub check_timeout_ms: u64,

    /// Score delta that counts as a change even without a status change.
    pub score_change_threshold: f64,

    /// Process resident memory above which the application is degraded.
    pub memory_warning_mb: u64,

    /// Process resident memory above which the application is unhealthy.
    pub memory_critical_mb: u64,

    /// Seconds without a successful write (with pending data) before storage is degraded.
    pub stale_write_secs: u64,

    /// Environment label reported in snapshots.
    pub environment: String,

    /// Buffer size of the health event channel.
    pub event_capacity: usize,

    /// Interval of the daemon heartbeat log, in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            check_timeout_ms: 5000,
            score_change_threshold: 10.0,
            memory_warning_mb: 512,
            memory_critical_mb: 1024,
            stale_write_secs: 300,
            environment: "production".to_string(),
            event_capacity: 64,
            heartbeat_interval_secs: 60,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}
