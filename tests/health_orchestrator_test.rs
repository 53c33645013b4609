// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Health orchestrator scenarios through the public API

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use rust_counter_logger::config::HealthConfig;
use rust_counter_logger::health::{
    ApplicationCheck, ComponentHealth, ErrorReporter, FnHealthCheck, HealthEvent,
    HealthOrchestrator, HealthStatus, APPLICATION_COMPONENT,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingReporter {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, component: &str, error: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((component.to_string(), error.to_string()));
    }
}

fn orchestrator_with_timeout(
    check_timeout_ms: u64,
) -> (HealthOrchestrator, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let config = HealthConfig {
        check_timeout_ms,
        ..HealthConfig::default()
    };
    (HealthOrchestrator::new(&config, reporter.clone()), reporter)
}

fn orchestrator() -> (HealthOrchestrator, Arc<RecordingReporter>) {
    orchestrator_with_timeout(5000)
}

#[tokio::test]
async fn test_register_and_unregister_custom_component() {
    let (orchestrator, _) = orchestrator();
    orchestrator.register_builtin(
        APPLICATION_COMPONENT,
        Arc::new(ApplicationCheck::new(1 << 20, 1 << 21)),
    );

    assert!(orchestrator.register_fn(
        "Foo",
        || async { Ok::<_, anyhow::Error>(ComponentHealth::healthy("Foo")) },
        vec![],
    ));
    assert_eq!(
        orchestrator.available_components(),
        vec![APPLICATION_COMPONENT.to_string(), "Foo".to_string()]
    );

    let snapshot = orchestrator.check_all().await;
    assert_eq!(snapshot.components.len(), 2);
    assert_eq!(snapshot.components["Foo"].status, HealthStatus::Healthy);
    assert!(!snapshot.status.is_at_least(HealthStatus::Unhealthy));

    orchestrator.unregister_component("Foo");
    // Second removal is a no-op
    orchestrator.unregister_component("Foo");
    assert!(orchestrator.last_known("Foo").is_none());

    let snapshot = orchestrator.check_all().await;
    assert_eq!(snapshot.components.len(), 1);
    assert!(!snapshot.components.contains_key("Foo"));

    let unknown = orchestrator.check_one("Foo").await;
    assert_eq!(unknown.status, HealthStatus::Unhealthy);
    assert!(unknown
        .message
        .unwrap_or_default()
        .contains(APPLICATION_COMPONENT));
}

#[tokio::test]
async fn test_builtin_cannot_be_removed_or_replaced() {
    let (orchestrator, _) = orchestrator();
    orchestrator.register_builtin(
        APPLICATION_COMPONENT,
        Arc::new(ApplicationCheck::new(1 << 20, 1 << 21)),
    );

    orchestrator.unregister_component(APPLICATION_COMPONENT);
    assert!(!orchestrator.register_fn(
        APPLICATION_COMPONENT,
        || async { Ok::<_, anyhow::Error>(ComponentHealth::healthy(APPLICATION_COMPONENT)) },
        vec![],
    ));
    assert_eq!(
        orchestrator.available_components(),
        vec![APPLICATION_COMPONENT.to_string()]
    );
}

#[tokio::test]
async fn test_failing_and_slow_checks_are_critical() {
    let (orchestrator, reporter) = orchestrator_with_timeout(300);
    orchestrator.register_fn(
        "Broken",
        || async { Err::<ComponentHealth, _>(anyhow!("sensor bus offline")) },
        vec![],
    );
    orchestrator.register_fn(
        "Slow",
        || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(ComponentHealth::healthy("Slow"))
        },
        vec![],
    );

    let snapshot = orchestrator.check_all().await;
    assert_eq!(snapshot.components["Broken"].status, HealthStatus::Critical);
    assert_eq!(snapshot.components["Broken"].score, 0.0);
    assert_eq!(snapshot.components["Slow"].status, HealthStatus::Critical);
    assert_eq!(snapshot.status, HealthStatus::Critical);

    let mut reported: Vec<String> = reporter.reports().into_iter().map(|(c, _)| c).collect();
    reported.sort();
    assert_eq!(reported, vec!["Broken".to_string(), "Slow".to_string()]);
}

#[tokio::test]
async fn test_unhealthy_application_forces_critical() {
    let (orchestrator, _) = orchestrator();
    orchestrator.register_builtin(
        APPLICATION_COMPONENT,
        Arc::new(FnHealthCheck::new(|| async {
            Ok::<_, anyhow::Error>(ComponentHealth::unhealthy(
                APPLICATION_COMPONENT,
                "memory exhausted",
            ))
        })),
    );
    orchestrator.register_fn(
        "Foo",
        || async { Ok::<_, anyhow::Error>(ComponentHealth::healthy("Foo")) },
        vec![],
    );

    let snapshot = orchestrator.check_all().await;
    assert_eq!(snapshot.status, HealthStatus::Critical);
    assert_eq!(snapshot.score, (30.0 + 100.0) / 2.0);

    let quick = orchestrator.quick_status().await;
    assert!(!quick.is_alive);
    assert_eq!(quick.status, HealthStatus::Critical);
    assert_eq!(quick.last_snapshot_status, Some(HealthStatus::Critical));
}

#[tokio::test]
async fn test_failing_dependency_degrades_dependent() {
    let (orchestrator, _) = orchestrator();
    orchestrator.register_fn(
        "Database",
        || async { Ok::<_, anyhow::Error>(ComponentHealth::unhealthy("Database", "refused")) },
        vec![],
    );
    orchestrator.register_fn(
        "Reports",
        || async { Ok::<_, anyhow::Error>(ComponentHealth::healthy("Reports")) },
        vec!["Database".to_string()],
    );

    let snapshot = orchestrator.check_all().await;
    let reports = &snapshot.components["Reports"];
    assert_eq!(reports.status, HealthStatus::Degraded);
    assert_eq!(reports.dependencies, vec!["Database".to_string()]);
    assert!(reports.warnings.iter().any(|w| w.contains("Database")));
}

#[tokio::test]
async fn test_monitor_publishes_first_snapshot_and_metrics() {
    let (orchestrator, _) = orchestrator();
    orchestrator.register_fn(
        "Foo",
        || async {
            Ok::<_, anyhow::Error>(ComponentHealth::healthy("Foo").with_metric("queue", 3.0))
        },
        vec![],
    );
    let orchestrator = Arc::new(orchestrator);
    let mut events = orchestrator.subscribe();

    let token = CancellationToken::new();
    let monitor = Arc::clone(&orchestrator).spawn_monitor(Duration::from_secs(60), token.clone());

    // The first tick fires immediately
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("health event")
        .expect("open channel");
    match event {
        HealthEvent::ComponentHealthChanged { name, current, .. } => {
            assert_eq!(name, "Foo");
            assert_eq!(current, HealthStatus::Healthy);
        }
        other => panic!("unexpected event {:?}", other),
    }

    token.cancel();
    monitor.await.expect("monitor task");

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics["system.score"], 100.0);
    assert_eq!(metrics["component.Foo.queue"], 3.0);
    assert_eq!(
        metrics["component.Foo.status"],
        f64::from(HealthStatus::Healthy.severity())
    );
}
