// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use aegis_fleet_core::domain::component::{ComponentId, DependencyRef};
use aegis_fleet_core::domain::config::{FleetConfig, FleetManifest};
use aegis_fleet_core::domain::events::FleetEventKind;
use aegis_fleet_core::domain::failure::FailureAction;
use aegis_fleet_core::domain::health::{HealthMetrics, HealthStatus};
use aegis_fleet_core::domain::lifecycle::LifecycleState;
use aegis_fleet_core::{FleetError, FleetOrchestrator};
use common::{count_kind, drain_events, spec, test_config, FakeProbe, FakeRuntime};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const MANIFEST: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: Fleet
metadata:
  name: storefront
spec:
  config:
    heartbeat:
      interval: 1h
      timeout: 1s
    health_check:
      interval: 1h
      timeout: 1s
    dependency:
      resolution_strategy: parallel
      backoff_delay: 1ms
  components:
    - id: web
      version: 2.1.0
      depends_on: [api]
      dependencies:
        - id: cdn
          type: soft
    - id: api
      version: 1.4.0
      hot_swap_capable: true
      depends_on: [db, queue]
    - id: db
      version: 15.2.0
      metadata:
        criticality: critical
    - id: queue
      version: 3.0.0
"#;

fn build(config: FleetConfig, probe: Arc<FakeProbe>) -> (Arc<FleetOrchestrator>, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::new());
    let fleet = FleetOrchestrator::builder(config)
        .runtime(runtime.clone())
        .probe(probe)
        .build()
        .unwrap();
    (Arc::new(fleet), runtime)
}

fn id(s: &str) -> ComponentId {
    ComponentId::from(s)
}

#[tokio::test]
async fn test_fleet_from_manifest_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();

    let manifest = FleetManifest::from_yaml_file(file.path()).unwrap();
    manifest.validate().unwrap();
    let (fleet, runtime) = build(manifest.spec.config.clone(), Arc::new(FakeProbe::new()));
    assert_eq!(fleet.register_manifest(&manifest).unwrap(), 4);

    let order = fleet.get_startup_order(&id("web")).unwrap();
    assert_eq!(order.last(), Some(&id("web")));
    assert!(order.iter().position(|c| c == &id("api")) > order.iter().position(|c| c == &id("db")));

    let result = fleet.start_component(&id("web")).await.unwrap();
    assert!(result.is_success());
    assert_eq!(runtime.start_log.lock().len(), 4);
    assert!(!fleet.controller().contains(&id("cdn")));

    let health = fleet.get_system_health();
    assert_eq!(health.total, 4);
    assert_eq!(health.running, 4);
}

#[test]
fn test_builder_requires_collaborators() {
    let err = FleetOrchestrator::builder(test_config())
        .runtime(Arc::new(FakeRuntime::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, FleetError::Configuration(_)));

    let mut config = test_config();
    config.heartbeat.timeout = config.heartbeat.interval;
    let err = FleetOrchestrator::builder(config)
        .runtime(Arc::new(FakeRuntime::new()))
        .probe(Arc::new(FakeProbe::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, FleetError::Configuration(_)));
}

#[tokio::test]
async fn test_deregister_requires_stop() {
    let (fleet, _) = build(test_config(), Arc::new(FakeProbe::new()));
    fleet.register_component(spec("db"), vec![]).unwrap();
    fleet.start_component(&id("db")).await.unwrap();

    assert!(matches!(
        fleet.deregister(&id("db")),
        Err(FleetError::ComponentActive { .. })
    ));

    fleet.stop_component(&id("db"), false).await.unwrap();
    fleet.deregister(&id("db")).unwrap();
    assert!(matches!(fleet.get_health(&id("db")), Err(FleetError::ComponentNotFound(_))));
}

#[tokio::test]
async fn test_supervision_reports_critical_fleet_once() {
    let mut config = test_config();
    config.failure_detection.resource.action = FailureAction::Ignore;
    let probe = Arc::new(FakeProbe::new());
    let (fleet, _) = build(config, probe.clone());
    fleet.register_component(spec("db"), vec![]).unwrap();
    fleet.start_component(&id("db")).await.unwrap();
    let mut events = fleet.subscribe();

    let mut hot = HealthMetrics::nominal();
    hot.cpu_percent = 99.0;
    probe.set_metrics("db", hot);
    fleet.monitor().poll_health(&id("db")).await;

    let first = fleet.supervise_once().await;
    let second = fleet.supervise_once().await;

    assert_eq!(first.health.status, HealthStatus::Critical);
    assert_eq!(first.escalated, vec![id("db")]);
    assert!(second.escalated.is_empty());

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::SystemHealthCritical), 1);
    assert_eq!(count_kind(&events, FleetEventKind::FailureEscalated), 1);

    // Recovery closes the episode
    probe.set_metrics("db", HealthMetrics::nominal());
    fleet.monitor().poll_health(&id("db")).await;
    fleet.monitor().poll_health(&id("db")).await;
    let recovered = fleet.supervise_once().await;
    assert_eq!(recovered.health.status, HealthStatus::Healthy);
    assert!(recovered.escalated.is_empty());
}

#[tokio::test]
async fn test_unhealthy_component_is_escalated_once_per_episode() {
    let probe = Arc::new(FakeProbe::new());
    let (fleet, _) = build(test_config(), probe.clone());
    fleet.register_component(spec("db"), vec![]).unwrap();
    fleet.start_component(&id("db")).await.unwrap();
    let mut events = fleet.subscribe();

    let mut flaky = HealthMetrics::nominal();
    flaky.availability_percent = 90.0;
    probe.set_metrics("db", flaky.clone());
    fleet.monitor().poll_health(&id("db")).await;

    let first = fleet.supervise_once().await;
    let second = fleet.supervise_once().await;

    assert_eq!(first.health.status, HealthStatus::Unhealthy);
    assert_eq!(fleet.controller().state(&id("db")), Some(LifecycleState::Running));
    assert_eq!(first.escalated, vec![id("db")]);
    assert!(second.escalated.is_empty());
    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::FailureEscalated), 1);

    probe.set_metrics("db", HealthMetrics::nominal());
    fleet.monitor().poll_health(&id("db")).await;
    fleet.monitor().poll_health(&id("db")).await;
    assert!(fleet.supervise_once().await.escalated.is_empty());

    // A second episode escalates again
    probe.set_metrics("db", flaky);
    fleet.monitor().poll_health(&id("db")).await;
    assert_eq!(fleet.supervise_once().await.escalated, vec![id("db")]);
}

#[tokio::test]
async fn test_supervision_reports_new_cycles_once() {
    let (fleet, _) = build(test_config(), Arc::new(FakeProbe::new()));
    fleet.register_component(spec("a"), vec![DependencyRef::soft("b")]).unwrap();
    assert!(fleet.supervise_once().await.new_cycles.is_empty());

    let mut events = fleet.subscribe();
    fleet.register_component(spec("b"), vec![DependencyRef::soft("a")]).unwrap();

    let report = fleet.supervise_once().await;
    assert_eq!(report.new_cycles.len(), 1);
    assert!(fleet.supervise_once().await.new_cycles.is_empty());

    let events = drain_events(&mut events);
    assert_eq!(count_kind(&events, FleetEventKind::CircularDependencyDetected), 1);
}

#[tokio::test]
async fn test_failed_component_is_escalated_by_supervision() {
    let runtime = Arc::new(FakeRuntime::new());
    let fleet = Arc::new(
        FleetOrchestrator::builder(test_config())
            .runtime(runtime.clone())
            .probe(Arc::new(FakeProbe::new()))
            .build()
            .unwrap(),
    );
    fleet.register_component(spec("db"), vec![]).unwrap();
    runtime.fail_starts("db", 100);
    assert!(fleet.start_component(&id("db")).await.is_err());
    assert_eq!(fleet.controller().state(&id("db")), Some(LifecycleState::Failed));

    let report = fleet.supervise_once().await;
    assert_eq!(report.escalated, vec![id("db")]);
    assert_eq!(report.health.failed, 1);
}

#[tokio::test]
async fn test_supervision_task_stops_on_shutdown() {
    let (fleet, _) = build(test_config(), Arc::new(FakeProbe::new()));
    fleet.register_component(spec("db"), vec![]).unwrap();
    fleet.start_component(&id("db")).await.unwrap();

    let handle = fleet.start_supervision();
    fleet.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("supervision task did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_component_event_stream() {
    let (fleet, _) = build(test_config(), Arc::new(FakeProbe::new()));
    fleet.register_component(spec("api"), vec![DependencyRef::hard("db")]).unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();
    let mut api_events = fleet.subscribe_component(id("api"));

    fleet.start_component(&id("api")).await.unwrap();

    let mut kinds = Vec::new();
    while kinds.last() != Some(&FleetEventKind::Started) {
        let event = tokio::time::timeout(Duration::from_secs(1), api_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.concerns(&id("api")));
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&FleetEventKind::Starting));
}
