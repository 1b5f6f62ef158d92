// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use aegis_fleet_core::domain::component::{ComponentId, DependencyRef};
use aegis_fleet_core::domain::cycle::CycleSeverity;
use aegis_fleet_core::domain::events::FleetEventKind;
use aegis_fleet_core::domain::graph::NodeState;
use aegis_fleet_core::domain::lifecycle::LifecycleState;
use aegis_fleet_core::domain::planning::ResolutionStrategy;
use aegis_fleet_core::{FleetError, FleetOrchestrator};
use common::{drain_events, spec, test_config, FakeProbe, FakeRuntime};
use std::sync::Arc;
use std::time::Duration;

fn orchestrator() -> (Arc<FleetOrchestrator>, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::new());
    let orchestrator = FleetOrchestrator::builder(test_config())
        .runtime(runtime.clone())
        .probe(Arc::new(FakeProbe::new()))
        .build()
        .unwrap();
    (Arc::new(orchestrator), runtime)
}

fn id(s: &str) -> ComponentId {
    ComponentId::from(s)
}

#[tokio::test]
async fn test_soft_only_cycle_resolves() {
    let (fleet, runtime) = orchestrator();
    fleet
        .register_component(spec("cache"), vec![DependencyRef::soft("search")])
        .unwrap();
    fleet
        .register_component(spec("search"), vec![DependencyRef::soft("cache")])
        .unwrap();

    let cycles = fleet.get_circular_dependencies(&id("cache")).unwrap();
    assert_eq!(cycles.len(), 1);
    assert!(!cycles[0].fatal);
    assert_eq!(cycles[0].severity, CycleSeverity::Warning);

    let result = fleet.start_component(&id("cache")).await.unwrap();
    assert!(result.is_success());
    assert_eq!(runtime.starts_of("cache"), 1);
    assert_eq!(runtime.starts_of("search"), 1);
    assert_eq!(fleet.controller().state(&id("search")), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_hard_dependency_resolves_before_dependent_starts() {
    let (fleet, runtime) = orchestrator();
    let mut events = fleet.subscribe();
    fleet
        .register_component(
            spec("api"),
            vec![DependencyRef::hard("auth"), DependencyRef::hard("db")],
        )
        .unwrap();
    fleet
        .register_component(spec("auth"), vec![DependencyRef::hard("db")])
        .unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();

    let result = fleet.start_component(&id("api")).await.unwrap();

    let resolved_at = |name: &str| result.outcome(&id(name)).and_then(|o| o.resolved_at).unwrap();
    assert!(resolved_at("db") <= resolved_at("auth"));
    assert!(resolved_at("auth") <= resolved_at("api"));
    assert!(runtime.start_position("db") < runtime.start_position("auth"));
    assert!(runtime.start_position("auth") < runtime.start_position("api"));

    // Every hard dependency's NodeResolved precedes the dependent's Starting
    let events = drain_events(&mut events);
    let position = |kind: FleetEventKind, name: &str| {
        events
            .iter()
            .position(|e| e.kind == kind && e.component_id.as_ref() == Some(&id(name)))
            .unwrap()
    };
    for (dependent, dependency) in [("api", "auth"), ("api", "db"), ("auth", "db")] {
        assert!(
            position(FleetEventKind::NodeResolved, dependency)
                < position(FleetEventKind::Starting, dependent),
            "{} resolved after {} started",
            dependency,
            dependent
        );
    }
}

#[tokio::test]
async fn test_startup_order_is_idempotent() {
    let (fleet, _) = orchestrator();
    fleet
        .register_component(spec("web"), vec![DependencyRef::hard("api"), DependencyRef::soft("cdn")])
        .unwrap();
    fleet
        .register_component(spec("api"), vec![DependencyRef::hard("db"), DependencyRef::hard("queue")])
        .unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();
    fleet.register_component(spec("queue"), vec![]).unwrap();
    fleet.register_component(spec("cdn"), vec![]).unwrap();

    let first = fleet.get_startup_order(&id("web")).unwrap();
    let second = fleet.get_startup_order(&id("web")).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
    assert_eq!(first.last(), Some(&id("web")));

    let mut reversed = fleet.get_shutdown_order(&id("web")).unwrap();
    reversed.reverse();
    assert_eq!(reversed, first);
}

#[tokio::test]
async fn test_missing_soft_dependency_is_skipped() {
    let (fleet, runtime) = orchestrator();
    fleet
        .register_component(spec("a"), vec![DependencyRef::hard("b")])
        .unwrap();
    fleet
        .register_component(spec("b"), vec![DependencyRef::soft("c")])
        .unwrap();

    let result = fleet.start_component(&id("a")).await.unwrap();

    assert!(result.failed.is_empty());
    assert_eq!(result.resolved, vec![id("b"), id("a")]);
    assert!(runtime.start_position("b") < runtime.start_position("a"));
    assert!(!fleet.controller().contains(&id("c")));
    assert_eq!(fleet.controller().state(&id("a")), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_hard_cycle_aborts_before_any_start() {
    let (fleet, runtime) = orchestrator();
    fleet.register_component(spec("a"), vec![DependencyRef::hard("b")]).unwrap();
    fleet.register_component(spec("b"), vec![DependencyRef::hard("c")]).unwrap();
    fleet.register_component(spec("c"), vec![DependencyRef::hard("a")]).unwrap();

    let cycles = fleet.get_circular_dependencies(&id("a")).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].cycle, vec![id("a"), id("b"), id("c")]);
    assert_eq!(cycles[0].severity, CycleSeverity::Error);

    let err = fleet.start_component(&id("a")).await.unwrap_err();
    assert!(matches!(err, FleetError::CircularDependency { .. }));
    assert_eq!(runtime.starts.load(std::sync::atomic::Ordering::SeqCst), 0);
    for name in ["a", "b", "c"] {
        assert_eq!(fleet.controller().state(&id(name)), Some(LifecycleState::Initializing));
    }
}

#[tokio::test]
async fn test_start_retries_within_budget() {
    let (fleet, runtime) = orchestrator();
    fleet.register_component(spec("api"), vec![DependencyRef::hard("db")]).unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();
    runtime.fail_starts("db", 2);

    let result = fleet.start_component(&id("api")).await.unwrap();

    let db = result.outcome(&id("db")).unwrap();
    assert_eq!(db.state, NodeState::Resolved);
    assert_eq!(db.attempts, 3);
    assert_eq!(fleet.controller().state(&id("db")), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_exhausted_hard_dependency_blocks_dependent() {
    let (fleet, runtime) = orchestrator();
    fleet.register_component(spec("api"), vec![DependencyRef::hard("db")]).unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();
    runtime.fail_starts("db", 100);

    let err = fleet.start_component(&id("api")).await.unwrap_err();

    assert!(matches!(err, FleetError::ResolutionFailure { ref component, .. } if component == &id("api")));
    assert_eq!(runtime.starts_of("api"), 0);
    assert_eq!(fleet.controller().state(&id("db")), Some(LifecycleState::Failed));
    assert_eq!(fleet.controller().state(&id("api")), Some(LifecycleState::Initializing));
}

#[tokio::test]
async fn test_startup_order_timeout_marks_starting_members_failed() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut config = test_config();
    config.dependency.startup_order_timeout = Duration::from_millis(50);
    let fleet = Arc::new(
        FleetOrchestrator::builder(config)
            .runtime(runtime.clone())
            .probe(Arc::new(FakeProbe::new()))
            .build()
            .unwrap(),
    );
    fleet.register_component(spec("api"), vec![DependencyRef::hard("db")]).unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();
    runtime.hang_starts("db");

    let err = fleet.start_component(&id("api")).await.unwrap_err();

    assert!(matches!(err, FleetError::ResolutionTimeout(limit) if limit == Duration::from_millis(50)));
    assert_eq!(fleet.controller().state(&id("db")), Some(LifecycleState::Failed));
    assert_eq!(fleet.controller().state(&id("api")), Some(LifecycleState::Initializing));
}

#[tokio::test]
async fn test_soft_dependency_failure_does_not_abort_dependent() {
    let (fleet, runtime) = orchestrator();
    fleet.register_component(spec("api"), vec![DependencyRef::soft("metrics")]).unwrap();
    fleet.register_component(spec("metrics"), vec![]).unwrap();
    runtime.fail_starts("metrics", 100);

    let result = fleet.start_component(&id("api")).await.unwrap();

    assert_eq!(result.failed, vec![id("metrics")]);
    assert_eq!(fleet.controller().state(&id("api")), Some(LifecycleState::Running));
}

#[tokio::test]
async fn test_every_strategy_respects_hard_order() {
    let (fleet, _) = orchestrator();
    fleet.register_component(spec("web"), vec![DependencyRef::hard("api")]).unwrap();
    fleet.register_component(spec("api"), vec![DependencyRef::hard("db")]).unwrap();
    fleet.register_component(spec("db"), vec![]).unwrap();

    for strategy in [
        ResolutionStrategy::Topological,
        ResolutionStrategy::BreadthFirst,
        ResolutionStrategy::DepthFirst,
        ResolutionStrategy::PriorityBased,
        ResolutionStrategy::Parallel,
    ] {
        let plan = fleet.get_startup_plan(&id("web"), strategy).unwrap();
        let phase = |name: &str| plan.phase_of(&id(name)).unwrap();
        assert!(phase("db") < phase("api"), "{} put api before db", strategy);
        assert!(phase("api") < phase("web"), "{} put web before api", strategy);
    }
}
