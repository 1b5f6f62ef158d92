// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Fleet Orchestrator
//!
//! Public facade over the supervisor: registration, control and query APIs,
//! the event stream, and the system-wide supervision task.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wires the lifecycle controller, health monitor, failure
//!   detector, hot-swap and shutdown coordinators around one event bus

use crate::application::failure_detector::FailureDetector;
use crate::application::health_monitor::HealthMonitor;
use crate::application::hot_swap::HotSwapCoordinator;
use crate::application::lifecycle::LifecycleController;
use crate::application::resolution::ResolutionResult;
use crate::application::shutdown::{ComponentStopReport, ShutdownCoordinator, ShutdownReport};
use crate::domain::component::{ComponentConfig, ComponentId, ComponentSpec, DependencyRef};
use crate::domain::config::{FleetConfig, FleetManifest};
use crate::domain::cycle::CircularDependency;
use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::events::{EventSeverity, FleetEvent, FleetEventKind};
use crate::domain::health::{ComponentHealth, HealthStatus, SystemHealth};
use crate::domain::hot_swap::HotSwapOperation;
use crate::domain::lifecycle::{LifecycleComponent, LifecycleState};
use crate::domain::planning::{ResolutionPlan, ResolutionStrategy};
use crate::domain::probe::Probe;
use crate::domain::runtime::ComponentRuntime;
use crate::domain::snapshot::StateSnapshotter;
use crate::infrastructure::event_bus::{ComponentEventReceiver, EventBus, EventReceiver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one supervision tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionReport {
    pub health: SystemHealth,
    pub pruned_operations: usize,
    pub new_cycles: Vec<CircularDependency>,
    pub escalated: Vec<ComponentId>,
}

pub struct FleetOrchestratorBuilder {
    config: FleetConfig,
    runtime: Option<Arc<dyn ComponentRuntime>>,
    probe: Option<Arc<dyn Probe>>,
    snapshotter: Option<Arc<dyn StateSnapshotter>>,
    event_bus: Option<EventBus>,
}

impl FleetOrchestratorBuilder {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            runtime: None,
            probe: None,
            snapshotter: None,
            event_bus: None,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ComponentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn snapshotter(mut self, snapshotter: Arc<dyn StateSnapshotter>) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> FleetResult<FleetOrchestrator> {
        self.config.validate()?;
        let runtime = self
            .runtime
            .ok_or_else(|| FleetError::Configuration("a component runtime is required".to_string()))?;
        let probe = self
            .probe
            .ok_or_else(|| FleetError::Configuration("a probe is required".to_string()))?;
        let event_bus = self.event_bus.unwrap_or_else(EventBus::with_default_capacity);
        let config = self.config;

        let controller = Arc::new(LifecycleController::new(
            config.clone(),
            runtime,
            event_bus.clone(),
        ));
        let hot_swap = Arc::new(HotSwapCoordinator::new(
            controller.clone(),
            probe.clone(),
            config.hot_swap.clone(),
            config.health_thresholds(),
        ));
        let detector = Arc::new(FailureDetector::new(
            config.failure_policy(),
            controller.clone(),
            hot_swap.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            controller.clone(),
            probe,
            detector.clone(),
            &config,
        ));
        let shutdown = ShutdownCoordinator::new(controller.clone(), self.snapshotter);

        Ok(FleetOrchestrator {
            config,
            event_bus,
            controller,
            hot_swap,
            detector,
            monitor,
            shutdown,
            supervision_token: CancellationToken::new(),
            known_cycles: Mutex::new(Vec::new()),
            escalated: Mutex::new(BTreeSet::new()),
            last_system_status: Mutex::new(HealthStatus::Unknown),
            shutting_down: AtomicBool::new(false),
        })
    }
}

pub struct FleetOrchestrator {
    config: FleetConfig,
    event_bus: EventBus,
    controller: Arc<LifecycleController>,
    hot_swap: Arc<HotSwapCoordinator>,
    detector: Arc<FailureDetector>,
    monitor: Arc<HealthMonitor>,
    shutdown: ShutdownCoordinator,
    supervision_token: CancellationToken,
    known_cycles: Mutex<Vec<Vec<ComponentId>>>,
    escalated: Mutex<BTreeSet<ComponentId>>,
    last_system_status: Mutex<HealthStatus>,
    shutting_down: AtomicBool,
}

impl FleetOrchestrator {
    pub fn builder(config: FleetConfig) -> FleetOrchestratorBuilder {
        FleetOrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn failure_detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn hot_swap_coordinator(&self) -> &Arc<HotSwapCoordinator> {
        &self.hot_swap
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_accepting(&self) -> FleetResult<()> {
        if self.is_shutting_down() {
            return Err(FleetError::ShuttingDown);
        }
        Ok(())
    }

    // ---- registration ----

    /// Register `spec`, adding `dependencies` to the ones it already declares.
    pub fn register_component(
        &self,
        spec: ComponentSpec,
        dependencies: Vec<DependencyRef>,
    ) -> FleetResult<()> {
        self.ensure_accepting()?;
        let spec = dependencies
            .into_iter()
            .fold(spec, |spec, dependency| spec.with_dependency(dependency));
        self.controller.register(spec)
    }

    /// Register every component of a loaded manifest.
    pub fn register_manifest(&self, manifest: &FleetManifest) -> FleetResult<usize> {
        manifest.validate()?;
        for spec in &manifest.spec.components {
            self.register_component(spec.clone(), Vec::new())?;
        }
        info!(
            fleet = %manifest.metadata.name,
            components = manifest.spec.components.len(),
            "Fleet manifest registered"
        );
        Ok(manifest.spec.components.len())
    }

    pub fn deregister(&self, id: &ComponentId) -> FleetResult<LifecycleComponent> {
        let removed = self.controller.deregister(id)?;
        self.monitor.unwatch(id);
        self.detector.forget(id);
        self.escalated.lock().remove(id);
        Ok(removed)
    }

    // ---- control ----

    /// Start `id` and everything it depends on, then watch whatever is
    /// running afterwards.
    pub async fn start_component(self: &Arc<Self>, id: &ComponentId) -> FleetResult<ResolutionResult> {
        self.ensure_accepting()?;
        let result = self.controller.start_component(id).await;
        for running in self.controller.ids_in_state(LifecycleState::Running) {
            self.monitor.watch(&running);
        }
        result
    }

    pub async fn stop_component(&self, id: &ComponentId, force: bool) -> FleetResult<ComponentStopReport> {
        self.monitor.unwatch(id);
        self.shutdown.stop_component(id, force).await
    }

    pub async fn hot_swap(&self, id: &ComponentId, new_config: ComponentConfig) -> FleetResult<HotSwapOperation> {
        self.ensure_accepting()?;
        let operation = self.hot_swap.swap(id, new_config).await?;
        self.monitor.reset(id);
        Ok(operation)
    }

    pub async fn restart(&self, id: &ComponentId, reason: &str) -> FleetResult<u32> {
        self.ensure_accepting()?;
        let count = self.controller.restart(id, reason).await?;
        self.monitor.reset(id);
        Ok(count)
    }

    pub fn isolate(&self, id: &ComponentId, reason: &str) -> FleetResult<()> {
        self.controller.isolate(id, reason)
    }

    pub fn resume(&self, id: &ComponentId) -> FleetResult<()> {
        self.ensure_accepting()?;
        self.controller.resume(id)?;
        self.monitor.reset(id);
        Ok(())
    }

    pub fn enter_maintenance(&self, id: &ComponentId) -> FleetResult<()> {
        self.controller.enter_maintenance(id)
    }

    pub fn exit_maintenance(&self, id: &ComponentId) -> FleetResult<()> {
        self.ensure_accepting()?;
        self.controller.exit_maintenance(id)?;
        self.monitor.reset(id);
        Ok(())
    }

    /// Stop the whole fleet: polling first, then components in reverse
    /// start order. Every later control call fails with `ShuttingDown`.
    pub async fn shutdown(&self) -> FleetResult<ShutdownReport> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(FleetError::ShuttingDown);
        }
        info!(components = self.controller.ids().len(), "Fleet shutdown started");
        self.event_bus
            .publish(FleetEvent::system(FleetEventKind::ShutdownStarted));

        self.supervision_token.cancel();
        self.monitor.stop_all().await;

        let order = self.shutdown.shutdown_order();
        let report = self.shutdown.stop_in_order(order).await;

        if report.is_clean() {
            info!(duration = ?report.duration, "Fleet shutdown completed");
        } else {
            warn!(
                failed = ?report.failed,
                duration = ?report.duration,
                "Fleet shutdown completed with failures"
            );
        }
        self.event_bus.publish(
            FleetEvent::system(FleetEventKind::ShutdownCompleted).with_payload(json!({
                "stopped": report.components.len() - report.failed.len(),
                "failed": report.failed,
                "deadline_exceeded": report.deadline_exceeded,
            })),
        );
        Ok(report)
    }

    // ---- queries ----

    pub fn get_health(&self, id: &ComponentId) -> FleetResult<ComponentHealth> {
        self.monitor
            .component_health(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))
    }

    pub fn get_system_health(&self) -> SystemHealth {
        self.monitor.system_health()
    }

    /// Start order for `id` and its dependencies under the configured strategy.
    pub fn get_startup_order(&self, id: &ComponentId) -> FleetResult<Vec<ComponentId>> {
        Ok(self.get_startup_plan(id, self.config.dependency.resolution_strategy)?.ordered_nodes())
    }

    pub fn get_startup_plan(&self, id: &ComponentId, strategy: ResolutionStrategy) -> FleetResult<ResolutionPlan> {
        self.controller.startup_plan(id, strategy)
    }

    /// Exact reverse of [`Self::get_startup_order`].
    pub fn get_shutdown_order(&self, id: &ComponentId) -> FleetResult<Vec<ComponentId>> {
        let mut order = self.get_startup_order(id)?;
        order.reverse();
        Ok(order)
    }

    pub fn get_circular_dependencies(&self, id: &ComponentId) -> FleetResult<Vec<CircularDependency>> {
        if !self.controller.contains(id) {
            return Err(FleetError::ComponentNotFound(id.clone()));
        }
        Ok(self.controller.circular_dependencies(Some(id)))
    }

    pub fn get_component(&self, id: &ComponentId) -> FleetResult<LifecycleComponent> {
        self.controller
            .get(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))
    }

    pub fn list_components(&self) -> Vec<LifecycleComponent> {
        self.controller.list()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    pub fn subscribe_component(&self, id: ComponentId) -> ComponentEventReceiver {
        self.event_bus.subscribe_component(id)
    }

    // ---- supervision ----

    /// Get a handle to stop the supervision task
    pub fn supervision_token(&self) -> CancellationToken {
        self.supervision_token.clone()
    }

    /// Start the supervision background task
    /// Returns a handle that can be used to await its exit
    pub fn start_supervision(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run_supervision().await;
        })
    }

    async fn run_supervision(&self) {
        let period = self.config.supervision.interval;
        info!(interval = ?period, "Starting fleet supervision task");

        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running supervision cycle");
                    let report = self.supervise_once().await;
                    debug!(
                        status = %report.health.status,
                        pruned = report.pruned_operations,
                        new_cycles = report.new_cycles.len(),
                        escalated = report.escalated.len(),
                        "Supervision cycle completed"
                    );
                }
                _ = self.supervision_token.cancelled() => {
                    info!("Shutdown signal received, stopping fleet supervision");
                    break;
                }
            }
        }

        info!("Fleet supervision task stopped");
    }

    /// One supervision pass: aggregate health, prune finished hot-swap
    /// records, revalidate cycles and escalate failed or critical components.
    pub async fn supervise_once(&self) -> SupervisionReport {
        let health = self.monitor.system_health();
        {
            let mut last = self.last_system_status.lock();
            if health.status == HealthStatus::Critical && *last != HealthStatus::Critical {
                error!(
                    critical = health.critical,
                    failed = health.failed,
                    "System health is critical"
                );
                self.event_bus.publish(
                    FleetEvent::system(FleetEventKind::SystemHealthCritical).with_payload(json!({
                        "critical": health.critical,
                        "unhealthy": health.unhealthy,
                        "failed": health.failed,
                        "total": health.total,
                    })),
                );
            }
            *last = health.status;
        }

        let pruned_operations = self
            .hot_swap
            .prune_finished(self.config.supervision.stale_operation_ttl);
        if pruned_operations > 0 {
            debug!(pruned = pruned_operations, "Pruned finished hot-swap records");
        }

        let new_cycles = self.revalidate_cycles();
        let escalated = self.escalate_unresolved(&health);

        SupervisionReport {
            health,
            pruned_operations,
            new_cycles,
            escalated,
        }
    }

    fn revalidate_cycles(&self) -> Vec<CircularDependency> {
        let current = self.controller.circular_dependencies(None);
        let mut known = self.known_cycles.lock();
        let new_cycles: Vec<CircularDependency> = current
            .iter()
            .filter(|c| !known.contains(&c.cycle))
            .cloned()
            .collect();
        for cycle in &new_cycles {
            warn!(cycle = ?cycle.cycle, severity = ?cycle.severity, "Circular dependency detected");
            let severity = if cycle.fatal {
                EventSeverity::Error
            } else {
                EventSeverity::Warning
            };
            self.event_bus.publish(
                FleetEvent::system(FleetEventKind::CircularDependencyDetected)
                    .with_severity(severity)
                    .with_payload(json!({
                        "cycle": cycle.cycle,
                        "severity": cycle.severity,
                        "fatal": cycle.fatal,
                    })),
            );
        }
        *known = current.into_iter().map(|c| c.cycle).collect();
        new_cycles
    }

    // Once per episode; a component leaves the set when it recovers.
    fn escalate_unresolved(&self, health: &SystemHealth) -> Vec<ComponentId> {
        let mut escalated = self.escalated.lock();
        let mut fresh = Vec::new();
        for component in &health.components {
            let id = &component.component_id;
            let unresolved = component.lifecycle_state == LifecycleState::Failed
                || component.status.is_escalation_worthy();
            if !unresolved {
                escalated.remove(id);
                continue;
            }
            if escalated.insert(id.clone()) {
                let reason = format!(
                    "component is {} with health {}",
                    component.lifecycle_state, component.status
                );
                self.detector.escalate(id, None, &reason);
                fresh.push(id.clone());
            }
        }
        fresh
    }
}
