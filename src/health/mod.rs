// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health monitoring
//!
//! The [`HealthOrchestrator`] runs every registered [`HealthCheck`] concurrently
//! and aggregates their [`ComponentHealth`] into a [`SystemHealthSnapshot`].
//! Status transitions are published as [`HealthEvent`]s on a broadcast channel.
//!
//! Built-in components:
//!
//! | Name          | Source                                         |
//! |---------------|------------------------------------------------|
//! | `Application` | process memory and CPU                         |
//! | `Devices`     | connection pool statistics                     |
//! | `Processor`   | quality distribution of processed readings     |
//! | `Storage`     | writer health and store connectivity           |
//!
//! Additional checks can be registered at runtime by name.

pub mod check;
pub mod checks;
pub mod orchestrator;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use check::{FnHealthCheck, HealthCheck};
pub use checks::{ApplicationCheck, DeviceCheck, ProcessorCheck, StorageCheck};
pub use orchestrator::{ErrorReporter, HealthOrchestrator, LogErrorReporter};

/// Name of the core component whose failure invalidates every other signal.
pub const APPLICATION_COMPONENT: &str = "Application";
pub const DEVICES_COMPONENT: &str = "Devices";
pub const PROCESSOR_COMPONENT: &str = "Processor";
pub const STORAGE_COMPONENT: &str = "Storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    /// Ordering used for worst-of aggregation.
    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
            HealthStatus::Critical => 4,
        }
    }

    pub fn is_at_least(&self, other: HealthStatus) -> bool {
        self.severity() >= other.severity()
    }

    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Status tier of a 0-100 score.
    pub fn from_score(score: f64) -> HealthStatus {
        if score >= 80.0 {
            HealthStatus::Healthy
        } else if score >= 60.0 {
            HealthStatus::Degraded
        } else if score >= 30.0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Critical
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "Unknown",
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Result of one component check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    /// 0 to 100.
    pub score: f64,
    pub check_duration: Duration,
    pub checked_at: DateTime<Utc>,
    pub message: Option<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub dependencies: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus, score: f64) -> Self {
        Self {
            name: name.into(),
            status,
            score: score.clamp(0.0, 100.0),
            check_duration: Duration::ZERO,
            checked_at: Utc::now(),
            message: None,
            warnings: Vec::new(),
            recommendations: Vec::new(),
            dependencies: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Status derived from the score.
    pub fn scored(name: impl Into<String>, score: f64) -> Self {
        Self::new(name, HealthStatus::from_score(score), score)
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy, 100.0)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Unhealthy, 30.0).with_message(message)
    }

    pub fn critical(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Critical, 0.0).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Raise the status to at least `floor`, lowering the score to match.
    pub fn degrade_to(&mut self, floor: HealthStatus) {
        if floor.severity() > self.status.severity() {
            self.status = floor;
            let ceiling = match floor {
                HealthStatus::Degraded => 79.0,
                HealthStatus::Unhealthy => 59.0,
                HealthStatus::Critical => 29.0,
                _ => 100.0,
            };
            self.score = self.score.min(ceiling);
        }
    }
}

/// Aggregated result of a full check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthSnapshot {
    pub instance_id: String,
    pub status: HealthStatus,
    pub score: f64,
    pub components: BTreeMap<String, ComponentHealth>,
    pub uptime: Duration,
    pub version: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealthSnapshot {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }
}

/// Transition notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthEvent {
    ComponentHealthChanged {
        name: String,
        previous: HealthStatus,
        current: HealthStatus,
        previous_score: f64,
        score: f64,
    },
    SystemHealthChanged {
        previous: HealthStatus,
        current: HealthStatus,
        previous_score: f64,
        score: f64,
    },
}

/// Liveness answer that skips the expensive checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickHealthStatus {
    pub status: HealthStatus,
    pub is_alive: bool,
    pub application: HealthStatus,
    pub last_snapshot_status: Option<HealthStatus>,
    pub last_check: Option<DateTime<Utc>>,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_score_tiers() {
        assert_eq!(HealthStatus::from_score(100.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(80.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(79.9), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(45.0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_score(10.0), HealthStatus::Critical);
    }

    #[test]
    fn test_worst_ordering() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Unknown),
            HealthStatus::Unknown
        );
        assert_eq!(
            HealthStatus::Critical.worst(HealthStatus::Degraded),
            HealthStatus::Critical
        );
        assert!(HealthStatus::Critical.is_at_least(HealthStatus::Unhealthy));
        assert!(!HealthStatus::Degraded.is_at_least(HealthStatus::Unhealthy));
    }

    #[test]
    fn test_degrade_to_only_raises() {
        let mut health = ComponentHealth::healthy("Foo");
        health.degrade_to(HealthStatus::Degraded);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.score, 79.0);

        let mut critical = ComponentHealth::critical("Bar", "down");
        critical.degrade_to(HealthStatus::Degraded);
        assert_eq!(critical.status, HealthStatus::Critical);
    }
}
