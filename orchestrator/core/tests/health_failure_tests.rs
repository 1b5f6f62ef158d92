// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use aegis_fleet_core::domain::component::{ComponentId, DependencyRef};
use aegis_fleet_core::domain::config::FleetConfig;
use aegis_fleet_core::domain::events::FleetEventKind;
use aegis_fleet_core::domain::failure::FailureAction;
use aegis_fleet_core::domain::health::{HealthMetrics, HealthStatus};
use aegis_fleet_core::domain::lifecycle::LifecycleState;
use aegis_fleet_core::FleetOrchestrator;
use common::{count_kind, drain_events, spec, test_config, FakeProbe, FakeRuntime};
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct Harness {
    fleet: Arc<FleetOrchestrator>,
    runtime: Arc<FakeRuntime>,
    probe: Arc<FakeProbe>,
}

fn harness(config: FleetConfig) -> Harness {
    let runtime = Arc::new(FakeRuntime::new());
    let probe = Arc::new(FakeProbe::new());
    let fleet = FleetOrchestrator::builder(config)
        .runtime(runtime.clone())
        .probe(probe.clone())
        .build()
        .unwrap();
    Harness {
        fleet: Arc::new(fleet),
        runtime,
        probe,
    }
}

async fn running(h: &Harness, name: &str) -> ComponentId {
    let id = ComponentId::from(name);
    if !h.fleet.controller().contains(&id) {
        h.fleet.register_component(spec(name), vec![]).unwrap();
    }
    h.fleet.start_component(&id).await.unwrap();
    assert!(h.fleet.monitor().is_watching(&id));
    id
}

fn metrics_with(f: impl FnOnce(&mut HealthMetrics)) -> HealthMetrics {
    let mut metrics = HealthMetrics::nominal();
    f(&mut metrics);
    metrics
}

#[tokio::test]
async fn test_missed_heartbeats_restart_exactly_once() {
    let h = harness(test_config());
    let db = running(&h, "db").await;
    let mut events = h.fleet.subscribe();
    h.probe.set_alive("db", false);

    let monitor = h.fleet.monitor().clone();
    assert_eq!(monitor.poll_heartbeat(&db).await, Some(false));
    assert_eq!(monitor.poll_heartbeat(&db).await, Some(false));
    assert_eq!(h.fleet.get_component(&db).unwrap().restart_count(), 0);

    // Overlapping ticks around the third miss
    tokio::join!(
        monitor.poll_heartbeat(&db),
        monitor.poll_heartbeat(&db),
        monitor.poll_heartbeat(&db),
    );

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::Restarted), 1);
    assert_eq!(h.fleet.get_component(&db).unwrap().restart_count(), 1);
    assert_eq!(h.runtime.starts_of("db"), 2);
    assert_eq!(h.fleet.controller().state(&db), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_restart_follows_configured_retry_attempts() {
    let mut config = test_config();
    config.heartbeat.retry_attempts = 5;
    config.failure_detection.circuit_breaker.failure_threshold = 10;
    let h = harness(config);
    let db = running(&h, "db").await;
    h.probe.set_alive("db", false);

    for _ in 0..4 {
        h.fleet.monitor().poll_heartbeat(&db).await;
    }
    assert_eq!(h.fleet.get_component(&db).unwrap().restart_count(), 0);
    assert_eq!(h.runtime.starts_of("db"), 1);

    h.fleet.monitor().poll_heartbeat(&db).await;
    assert_eq!(h.fleet.get_component(&db).unwrap().restart_count(), 1);
    assert_eq!(h.runtime.starts_of("db"), 2);
}

#[tokio::test]
async fn test_heartbeat_recovery_clears_miss_count() {
    let h = harness(test_config());
    let db = running(&h, "db").await;
    h.probe.set_alive("db", false);
    h.fleet.monitor().poll_heartbeat(&db).await;
    h.fleet.monitor().poll_heartbeat(&db).await;
    assert_eq!(h.fleet.get_health(&db).unwrap().status, HealthStatus::Degraded);

    h.probe.set_alive("db", true);
    assert_eq!(h.fleet.monitor().poll_heartbeat(&db).await, Some(true));
    h.probe.set_alive("db", false);
    h.fleet.monitor().poll_heartbeat(&db).await;
    h.fleet.monitor().poll_heartbeat(&db).await;

    let health = h.fleet.get_health(&db).unwrap();
    assert_eq!(health.consecutive_heartbeat_failures, 2);
    assert_eq!(health.restart_count, 0);
}

#[tokio::test]
async fn test_health_status_is_monotone_in_error_rate() {
    let h = harness(test_config());
    let api = running(&h, "api").await;

    let mut previous = HealthStatus::Healthy;
    for rate in [0.0, 1.0, 4.9, 5.0, 5.1, 7.5, 20.0, 60.0] {
        h.probe
            .set_metrics("api", metrics_with(|m| m.error_rate_percent = rate));
        let status = h.fleet.monitor().poll_health(&api).await.unwrap();
        assert!(
            !previous.is_worse_than(status),
            "error rate {} improved status from {} to {}",
            rate,
            previous,
            status
        );
        if rate > 5.0 {
            assert!(status >= HealthStatus::Degraded);
        }
        previous = status;
    }
}

#[tokio::test]
async fn test_recovery_needs_success_threshold() {
    let h = harness(test_config());
    let api = running(&h, "api").await;

    h.probe
        .set_metrics("api", metrics_with(|m| m.error_rate_percent = 10.0));
    assert_eq!(h.fleet.monitor().poll_health(&api).await, Some(HealthStatus::Degraded));

    h.probe.set_metrics("api", HealthMetrics::nominal());
    assert_eq!(h.fleet.monitor().poll_health(&api).await, Some(HealthStatus::Degraded));
    assert_eq!(h.fleet.monitor().poll_health(&api).await, Some(HealthStatus::Healthy));
}

#[tokio::test]
async fn test_unavailable_hard_dependency_isolates_dependent() {
    let h = harness(test_config());
    h.fleet
        .register_component(spec("api"), vec![DependencyRef::hard("db")])
        .unwrap();
    h.fleet.register_component(spec("db"), vec![]).unwrap();
    let api = running(&h, "api").await;
    let db = ComponentId::from("db");

    h.fleet.stop_component(&db, false).await.unwrap();
    assert!(!h.fleet.monitor().is_watching(&db));

    h.fleet.monitor().poll_heartbeat(&api).await;
    assert_eq!(h.fleet.controller().state(&api), Some(LifecycleState::Suspended));

    // Suspended components are not probed
    assert_eq!(h.fleet.monitor().poll_heartbeat(&api).await, None);
}

#[tokio::test]
async fn test_dependency_mid_operation_does_not_isolate_dependent() {
    let h = harness(test_config());
    h.fleet
        .register_component(spec("api"), vec![DependencyRef::hard("db")])
        .unwrap();
    h.fleet.register_component(spec("db"), vec![]).unwrap();
    let api = running(&h, "api").await;
    let db = ComponentId::from("db");

    {
        let _guard = h.fleet.controller().begin_operation(&db).unwrap();
        h.fleet
            .controller()
            .transition(&db, LifecycleState::Stopping, Some("restarting".to_string()))
            .unwrap();
        h.fleet.monitor().poll_heartbeat(&api).await;
        assert_eq!(h.fleet.controller().state(&api), Some(LifecycleState::Running));
    }

    h.fleet.monitor().poll_heartbeat(&api).await;
    assert_eq!(h.fleet.controller().state(&api), Some(LifecycleState::Suspended));
}

#[tokio::test]
async fn test_resource_tier_outranks_health_check_tier() {
    let h = harness(test_config());
    let api = running(&h, "api").await;
    let mut events = h.fleet.subscribe();

    h.probe
        .set_metrics("api", metrics_with(|m| m.cpu_percent = 97.0));
    h.fleet.monitor().poll_health(&api).await;

    let events = drain_events(&mut events);
    let detected: Vec<_> = events
        .iter()
        .filter(|e| e.kind == FleetEventKind::FailureDetected)
        .collect();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].payload["tier"], "resource");
    assert_eq!(h.fleet.get_component(&api).unwrap().restart_count(), 1);
}

#[tokio::test]
async fn test_slow_responses_escalate_once_per_window() {
    let h = harness(test_config());
    let api = running(&h, "api").await;
    let mut events = h.fleet.subscribe();

    h.probe
        .set_metrics("api", metrics_with(|m| m.response_time_ms = 8000.0));
    h.fleet.monitor().poll_health(&api).await;
    h.fleet.monitor().poll_health(&api).await;

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::FailureDetected), 2);
    assert_eq!(count_kind(&events, FleetEventKind::FailureEscalated), 1);
    assert_eq!(h.fleet.controller().state(&api), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_circuit_opens_and_applies_its_action_once() {
    let mut config = test_config();
    config.failure_detection.heartbeat.action = FailureAction::Ignore;
    config.failure_detection.circuit_breaker.failure_threshold = 4;
    let h = harness(config);
    let db = running(&h, "db").await;
    let mut events = h.fleet.subscribe();
    h.probe.set_alive("db", false);

    for _ in 0..4 {
        h.fleet.monitor().poll_heartbeat(&db).await;
    }

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::CircuitOpened), 1);
    assert_eq!(h.fleet.controller().state(&db), Some(LifecycleState::Suspended));
    assert_eq!(h.fleet.get_component(&db).unwrap().restart_count(), 0);
    assert_eq!(h.probe.heartbeats.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_unreachable_health_checks_reach_unhealthy() {
    let mut config = test_config();
    config.failure_detection.health_check.action = FailureAction::Escalate;
    let h = harness(config);
    let api = running(&h, "api").await;
    let mut events = h.fleet.subscribe();
    h.probe.set_unreachable("api", true);

    for _ in 0..3 {
        h.fleet.monitor().poll_health(&api).await;
    }

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::HealthCheckFailed), 3);
    assert_eq!(count_kind(&events, FleetEventKind::FailureEscalated), 1);
    let health = h.fleet.get_health(&api).unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.consecutive_health_check_failures, 3);
}
