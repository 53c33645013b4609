// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health orchestrator
//!
//! Keeps a registry of named checks, runs them concurrently and aggregates the
//! results. Only the most recent snapshot is retained; each new snapshot is
//! compared with it to publish [`HealthEvent`]s.
//!
//! ## Aggregation
//!
//! - Overall status is the worst component status.
//! - If `Application` is `Unhealthy` or worse, the overall status is `Critical`.
//! - Overall score is the arithmetic mean of the component scores.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_counter_logger::config::HealthConfig;
//! use rust_counter_logger::health::{ComponentHealth, HealthOrchestrator, LogErrorReporter};
//!
//! # async fn example() {
//! let orchestrator = HealthOrchestrator::new(&HealthConfig::default(), Arc::new(LogErrorReporter));
//! orchestrator.register_fn(
//!     "Foo",
//!     || async { Ok::<_, anyhow::Error>(ComponentHealth::healthy("Foo")) },
//!     vec![],
//! );
//! let snapshot = orchestrator.check_all().await;
//! println!("{} ({:.0})", snapshot.status, snapshot.score);
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::check::{FnHealthCheck, HealthCheck};
use super::{
    ComponentHealth, HealthEvent, HealthStatus, QuickHealthStatus, SystemHealthSnapshot,
    APPLICATION_COMPONENT,
};
use crate::config::HealthConfig;

/// Collaborator notified of failing checks.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn report(&self, component: &str, error: &str);
}

/// Reports check failures to the log.
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, component: &str, error: &str) {
        error!("Health check '{}' failed: {}", component, error);
    }
}

#[derive(Clone)]
struct RegisteredCheck {
    check: Arc<dyn HealthCheck>,
    dependencies: Vec<String>,
    builtin: bool,
}

pub struct HealthOrchestrator {
    instance_id: Uuid,
    started: Instant,
    version: String,
    environment: String,
    check_timeout: Duration,
    score_change_threshold: f64,
    registry: DashMap<String, RegisteredCheck>,
    last_known: DashMap<String, ComponentHealth>,
    last_snapshot: RwLock<Option<SystemHealthSnapshot>>,
    events: broadcast::Sender<HealthEvent>,
    reporter: Arc<dyn ErrorReporter>,
}

impl HealthOrchestrator {
    pub fn new(config: &HealthConfig, reporter: Arc<dyn ErrorReporter>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let instance_id = Uuid::new_v4();
        debug!("Health orchestrator instance {}", instance_id);
        Self {
            instance_id,
            started: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: config.environment.clone(),
            check_timeout: config.check_timeout(),
            score_change_threshold: config.score_change_threshold,
            registry: DashMap::new(),
            last_known: DashMap::new(),
            last_snapshot: RwLock::new(None),
            events,
            reporter,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Register a component that cannot be unregistered.
    pub fn register_builtin(&self, name: &str, check: Arc<dyn HealthCheck>) {
        self.registry.insert(
            name.to_string(),
            RegisteredCheck {
                check,
                dependencies: Vec::new(),
                builtin: true,
            },
        );
    }

    /// Register or replace a custom check.
    ///
    /// Returns false if `name` belongs to a built-in component.
    pub fn register_component(
        &self,
        name: impl Into<String>,
        check: Arc<dyn HealthCheck>,
        dependencies: Vec<String>,
    ) -> bool {
        let name = name.into();
        if self.registry.get(&name).is_some_and(|entry| entry.builtin) {
            warn!("Refusing to replace built-in health check '{}'", name);
            return false;
        }
        let replaced = self
            .registry
            .insert(
                name.clone(),
                RegisteredCheck {
                    check,
                    dependencies,
                    builtin: false,
                },
            )
            .is_some();
        if replaced {
            info!("Replaced health check '{}'", name);
        } else {
            info!("Registered health check '{}'", name);
        }
        true
    }

    pub fn register_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        check: F,
        dependencies: Vec<String>,
    ) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ComponentHealth>> + Send + 'static,
    {
        self.register_component(name, Arc::new(FnHealthCheck::new(check)), dependencies)
    }

    /// Remove a custom check. Unknown names are a no-op.
    pub fn unregister_component(&self, name: &str) {
        match self.registry.get(name).map(|entry| entry.builtin) {
            Some(true) => warn!("Built-in health check '{}' cannot be unregistered", name),
            Some(false) => {
                self.registry.remove(name);
                self.last_known.remove(name);
                info!("Unregistered health check '{}'", name);
            }
            None => debug!("Health check '{}' is not registered, nothing to remove", name),
        }
    }

    /// Registered component names, sorted.
    pub fn available_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn last_known(&self, name: &str) -> Option<ComponentHealth> {
        self.last_known.get(name).map(|e| e.value().clone())
    }

    pub fn last_snapshot(&self) -> Option<SystemHealthSnapshot> {
        self.last_snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn run_check(&self, name: String, check: Arc<dyn HealthCheck>) -> ComponentHealth {
        let started = Instant::now();
        let mut task = tokio::spawn(async move { check.check().await });

        let mut health = match time::timeout(self.check_timeout, &mut task).await {
            Ok(Ok(Ok(health))) => health,
            Ok(Ok(Err(e))) => {
                let message = format!("{:#}", e);
                self.reporter.report(&name, &message);
                ComponentHealth::critical(&name, format!("Health check failed: {}", message))
            }
            Ok(Err(e)) => {
                let message = format!("check task aborted: {}", e);
                self.reporter.report(&name, &message);
                ComponentHealth::critical(&name, format!("Health check failed: {}", message))
            }
            Err(_) => {
                task.abort();
                let message = format!("timed out after {:?}", self.check_timeout);
                self.reporter.report(&name, &message);
                ComponentHealth::critical(&name, format!("Health check {}", message))
            }
        };
        health.name = name;
        health.check_duration = started.elapsed();
        health.checked_at = Utc::now();
        health
    }

    fn registered(&self) -> Vec<(String, RegisteredCheck)> {
        self.registry
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Run every registered check concurrently and aggregate.
    pub async fn check_all(&self) -> SystemHealthSnapshot {
        let entries = self.registered();
        let results = join_all(
            entries
                .iter()
                .map(|(name, entry)| self.run_check(name.clone(), Arc::clone(&entry.check))),
        )
        .await;

        let mut components: BTreeMap<String, ComponentHealth> = results
            .into_iter()
            .map(|health| (health.name.clone(), health))
            .collect();
        apply_dependencies(&entries, &mut components);

        for (name, health) in &components {
            self.last_known.insert(name.clone(), health.clone());
        }

        let (status, score) = aggregate(&components);
        let snapshot = SystemHealthSnapshot {
            instance_id: self.instance_id.to_string(),
            status,
            score,
            components,
            uptime: self.started.elapsed(),
            version: self.version.clone(),
            environment: self.environment.clone(),
            timestamp: Utc::now(),
        };

        let previous = self
            .last_snapshot
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .replace(snapshot.clone());
        self.publish_changes(previous.as_ref(), &snapshot);
        snapshot
    }

    /// Run a single component check by name.
    ///
    /// Unknown names yield an `Unhealthy` result describing the problem.
    pub async fn check_one(&self, name: &str) -> ComponentHealth {
        let entry = self.registry.get(name).map(|e| e.value().clone());
        let Some(entry) = entry else {
            return ComponentHealth::unhealthy(
                name,
                format!(
                    "Unknown component '{}', available: {}",
                    name,
                    self.available_components().join(", ")
                ),
            );
        };
        let mut health = self.run_check(name.to_string(), entry.check).await;
        health.dependencies = entry.dependencies;
        self.last_known.insert(name.to_string(), health.clone());
        health
    }

    /// Liveness based on the `Application` check and the last snapshot.
    pub async fn quick_status(&self) -> QuickHealthStatus {
        let application = match self.registry.get(APPLICATION_COMPONENT).map(|e| e.check.clone()) {
            Some(check) => {
                self.run_check(APPLICATION_COMPONENT.to_string(), check)
                    .await
                    .status
            }
            None => HealthStatus::Unknown,
        };
        let last = self.last_snapshot();
        let status = if application.is_at_least(HealthStatus::Unhealthy) {
            HealthStatus::Critical
        } else {
            last.as_ref()
                .map(|s| s.status.worst(application))
                .unwrap_or(application)
        };
        QuickHealthStatus {
            status,
            is_alive: !application.is_at_least(HealthStatus::Unhealthy),
            application,
            last_snapshot_status: last.as_ref().map(|s| s.status),
            last_check: last.as_ref().map(|s| s.timestamp),
            uptime: self.started.elapsed(),
        }
    }

    /// Flat metric map of the last snapshot, running a check if none exists.
    pub async fn metrics(&self) -> BTreeMap<String, f64> {
        let snapshot = match self.last_snapshot() {
            Some(snapshot) => snapshot,
            None => self.check_all().await,
        };

        let mut metrics = BTreeMap::new();
        metrics.insert("system.score".to_string(), snapshot.score);
        metrics.insert(
            "system.status".to_string(),
            snapshot.status.severity() as f64,
        );
        metrics.insert(
            "system.uptime_secs".to_string(),
            snapshot.uptime.as_secs_f64(),
        );
        for (name, health) in &snapshot.components {
            let prefix = format!("component.{}", name);
            metrics.insert(format!("{}.score", prefix), health.score);
            metrics.insert(format!("{}.status", prefix), health.status.severity() as f64);
            metrics.insert(
                format!("{}.check_ms", prefix),
                health.check_duration.as_secs_f64() * 1000.0,
            );
            for (key, value) in &health.metrics {
                metrics.insert(format!("{}.{}", prefix, key), *value);
            }
        }
        metrics
    }

    fn changed(&self, previous: HealthStatus, previous_score: f64, current: HealthStatus, score: f64) -> bool {
        previous != current || (score - previous_score).abs() >= self.score_change_threshold
    }

    fn publish_changes(
        &self,
        previous: Option<&SystemHealthSnapshot>,
        snapshot: &SystemHealthSnapshot,
    ) {
        for (name, health) in &snapshot.components {
            let (prev_status, prev_score) = previous
                .and_then(|p| p.components.get(name))
                .map(|h| (h.status, h.score))
                .unwrap_or((HealthStatus::Unknown, 0.0));
            if self.changed(prev_status, prev_score, health.status, health.score) {
                if health.status != prev_status {
                    info!(
                        "Component '{}' health {} -> {} (score {:.0})",
                        name, prev_status, health.status, health.score
                    );
                }
                let _ = self.events.send(HealthEvent::ComponentHealthChanged {
                    name: name.clone(),
                    previous: prev_status,
                    current: health.status,
                    previous_score: prev_score,
                    score: health.score,
                });
            }
        }

        let (prev_status, prev_score) = previous
            .map(|p| (p.status, p.score))
            .unwrap_or((HealthStatus::Unknown, 0.0));
        if self.changed(prev_status, prev_score, snapshot.status, snapshot.score) {
            if snapshot.status.is_at_least(HealthStatus::Unhealthy) {
                warn!(
                    "System health {} -> {} (score {:.0})",
                    prev_status, snapshot.status, snapshot.score
                );
            } else {
                info!(
                    "System health {} -> {} (score {:.0})",
                    prev_status, snapshot.status, snapshot.score
                );
            }
            let _ = self.events.send(HealthEvent::SystemHealthChanged {
                previous: prev_status,
                current: snapshot.status,
                previous_score: prev_score,
                score: snapshot.score,
            });
        }
    }

    /// Run [`check_all`](Self::check_all) periodically until cancelled.
    pub fn spawn_monitor(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Health monitor started (every {:?})", interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = self.check_all().await;
                        debug!(
                            "Health check: {} (score {:.1}, {} components)",
                            snapshot.status,
                            snapshot.score,
                            snapshot.components.len()
                        );
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}

/// A dependent component is at least `Degraded` while a dependency is
/// `Unhealthy` or worse.
fn apply_dependencies(
    entries: &[(String, RegisteredCheck)],
    components: &mut BTreeMap<String, ComponentHealth>,
) {
    for (name, entry) in entries {
        if entry.dependencies.is_empty() {
            continue;
        }
        let failing: Vec<String> = entry
            .dependencies
            .iter()
            .filter(|dep| {
                components
                    .get(dep.as_str())
                    .is_some_and(|h| h.status.is_at_least(HealthStatus::Unhealthy))
            })
            .cloned()
            .collect();
        if let Some(health) = components.get_mut(name) {
            health.dependencies = entry.dependencies.clone();
            for dep in failing {
                health
                    .warnings
                    .push(format!("Dependency '{}' is unhealthy", dep));
                health.degrade_to(HealthStatus::Degraded);
            }
        }
    }
}

fn aggregate(components: &BTreeMap<String, ComponentHealth>) -> (HealthStatus, f64) {
    if components.is_empty() {
        return (HealthStatus::Unknown, 0.0);
    }
    let mut status = components
        .values()
        .fold(HealthStatus::Healthy, |acc, h| acc.worst(h.status));
    if components
        .get(APPLICATION_COMPONENT)
        .is_some_and(|h| h.status.is_at_least(HealthStatus::Unhealthy))
    {
        status = HealthStatus::Critical;
    }
    let score = components.values().map(|h| h.score).sum::<f64>() / components.len() as f64;
    (status, score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn orchestrator(reporter: impl ErrorReporter + 'static) -> HealthOrchestrator {
        let config = HealthConfig {
            check_timeout_ms: 200,
            ..HealthConfig::default()
        };
        HealthOrchestrator::new(&config, Arc::new(reporter))
    }

    fn fixed(name: &'static str, status: HealthStatus, score: f64) -> Arc<dyn HealthCheck> {
        Arc::new(FnHealthCheck::new(move || async move {
            Ok::<_, anyhow::Error>(ComponentHealth::new(name, status, score))
        }))
    }

    #[tokio::test]
    async fn test_failing_check_is_critical_and_reported() {
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|component, _| component.to_string() == "Broken")
            .times(1)
            .return_const(());
        let orchestrator = orchestrator(reporter);
        orchestrator.register_component("Ok", fixed("Ok", HealthStatus::Healthy, 100.0), vec![]);
        orchestrator.register_fn("Broken", || async { Err::<ComponentHealth, _>(anyhow!("boom")) }, vec![]);

        let snapshot = orchestrator.check_all().await;
        assert_eq!(snapshot.components.len(), 2);
        assert_eq!(snapshot.components["Broken"].status, HealthStatus::Critical);
        assert_eq!(snapshot.components["Ok"].status, HealthStatus::Healthy);
        assert_eq!(snapshot.status, HealthStatus::Critical);
        assert_eq!(snapshot.score, 50.0);
    }

    #[tokio::test]
    async fn test_slow_check_times_out() {
        let mut reporter = MockErrorReporter::new();
        reporter.expect_report().times(1).return_const(());
        let orchestrator = orchestrator(reporter);
        orchestrator.register_fn(
            "Slow",
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(ComponentHealth::healthy("Slow"))
            },
            vec![],
        );
        let health = orchestrator.check_one("Slow").await;
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(health.message.unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unhealthy_application_forces_critical() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_builtin(
            APPLICATION_COMPONENT,
            fixed(APPLICATION_COMPONENT, HealthStatus::Unhealthy, 40.0),
        );
        orchestrator.register_component("A", fixed("A", HealthStatus::Healthy, 100.0), vec![]);
        orchestrator.register_component("B", fixed("B", HealthStatus::Healthy, 100.0), vec![]);

        let snapshot = orchestrator.check_all().await;
        assert_eq!(snapshot.status, HealthStatus::Critical);
        assert_eq!(snapshot.score, 80.0);
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_builtin(
            APPLICATION_COMPONENT,
            fixed(APPLICATION_COMPONENT, HealthStatus::Healthy, 100.0),
        );
        orchestrator.register_component("A", fixed("A", HealthStatus::Degraded, 70.0), vec![]);
        let snapshot = orchestrator.check_all().await;
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.score, 85.0);
    }

    #[tokio::test]
    async fn test_empty_registry_is_unknown() {
        let orchestrator = orchestrator(LogErrorReporter);
        let snapshot = orchestrator.check_all().await;
        assert_eq!(snapshot.status, HealthStatus::Unknown);
        assert_eq!(snapshot.score, 0.0);
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_component("Foo", fixed("Foo", HealthStatus::Healthy, 100.0), vec![]);
        assert!(orchestrator
            .available_components()
            .contains(&"Foo".to_string()));

        orchestrator.unregister_component("Foo");
        assert!(!orchestrator
            .available_components()
            .contains(&"Foo".to_string()));
        orchestrator.unregister_component("Foo");
        assert!(orchestrator.available_components().is_empty());
    }

    #[tokio::test]
    async fn test_builtin_is_protected() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_builtin(
            APPLICATION_COMPONENT,
            fixed(APPLICATION_COMPONENT, HealthStatus::Healthy, 100.0),
        );
        assert!(!orchestrator.register_component(
            APPLICATION_COMPONENT,
            fixed(APPLICATION_COMPONENT, HealthStatus::Critical, 0.0),
            vec![]
        ));
        orchestrator.unregister_component(APPLICATION_COMPONENT);
        assert_eq!(orchestrator.available_components(), vec![APPLICATION_COMPONENT]);
    }

    #[tokio::test]
    async fn test_unknown_component_is_unhealthy() {
        let orchestrator = orchestrator(LogErrorReporter);
        let health = orchestrator.check_one("Nope").await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.message.unwrap_or_default().contains("Unknown component"));
    }

    #[tokio::test]
    async fn test_unhealthy_dependency_degrades_dependent() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_component("Db", fixed("Db", HealthStatus::Unhealthy, 40.0), vec![]);
        orchestrator.register_component(
            "Api",
            fixed("Api", HealthStatus::Healthy, 100.0),
            vec!["Db".to_string()],
        );
        let snapshot = orchestrator.check_all().await;
        let api = &snapshot.components["Api"];
        assert_eq!(api.status, HealthStatus::Degraded);
        assert_eq!(api.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_events_on_status_and_score_change() {
        let orchestrator = orchestrator(LogErrorReporter);
        let mut events = orchestrator.subscribe();
        let score = Arc::new(std::sync::Mutex::new(100.0));
        let shared = Arc::clone(&score);
        orchestrator.register_fn(
            "Foo",
            move || {
                let score = *shared.lock().unwrap();
                async move {
                    Ok::<_, anyhow::Error>(ComponentHealth::new("Foo", HealthStatus::Healthy, score))
                }
            },
            vec![],
        );

        orchestrator.check_all().await;
        assert!(matches!(
            events.try_recv(),
            Ok(HealthEvent::ComponentHealthChanged { previous: HealthStatus::Unknown, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(HealthEvent::SystemHealthChanged { .. })
        ));

        // Same result: no event
        orchestrator.check_all().await;
        assert!(events.try_recv().is_err());

        // Score drop above the threshold without a status change
        *score.lock().unwrap() = 85.0;
        orchestrator.check_all().await;
        match events.try_recv() {
            Ok(HealthEvent::ComponentHealthChanged {
                previous, current, score, ..
            }) => {
                assert_eq!(previous, HealthStatus::Healthy);
                assert_eq!(current, HealthStatus::Healthy);
                assert_eq!(score, 85.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv(),
            Ok(HealthEvent::SystemHealthChanged { .. })
        ));

        // Below the threshold: no event
        *score.lock().unwrap() = 80.0;
        orchestrator.check_all().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_metrics_and_quick_status() {
        let orchestrator = orchestrator(LogErrorReporter);
        orchestrator.register_builtin(
            APPLICATION_COMPONENT,
            Arc::new(FnHealthCheck::new(|| async {
                Ok::<_, anyhow::Error>(
                    ComponentHealth::healthy(APPLICATION_COMPONENT).with_metric("memory_mb", 12.0),
                )
            })),
        );
        let metrics = orchestrator.metrics().await;
        assert_eq!(metrics["system.score"], 100.0);
        assert_eq!(metrics["component.Application.memory_mb"], 12.0);

        let quick = orchestrator.quick_status().await;
        assert!(quick.is_alive);
        assert_eq!(quick.status, HealthStatus::Healthy);
        assert_eq!(quick.last_snapshot_status, Some(HealthStatus::Healthy));
    }
}
