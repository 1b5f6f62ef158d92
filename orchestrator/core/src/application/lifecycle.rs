// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Controller
//!
//! Owns the arena of registered components and the registry-wide dependency
//! graph. Every lifecycle transition in the fleet goes through this type;
//! monitors, the hot-swap coordinator and the shutdown coordinator only ever
//! ask it to move a component.
//!
//! Locking: the graph lock is always taken before the component lock, and
//! neither is held across an `.await`.

use crate::application::resolution::{
    ExecutorSettings, NodeStarter, ResolutionExecutor, ResolutionResult,
};
use crate::domain::component::{ComponentConfig, ComponentId, ComponentSpec};
use crate::domain::config::FleetConfig;
use crate::domain::cycle::CircularDependency;
use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::events::{FleetEvent, FleetEventKind};
use crate::domain::graph::{DependencyGraph, GraphBuilder, NodeState};
use crate::domain::health::HealthStatus;
use crate::domain::lifecycle::{LifecycleComponent, LifecycleError, LifecycleState};
use crate::domain::planning::{ResolutionPlan, ResolutionPlanner, ResolutionStrategy};
use crate::domain::runtime::ComponentRuntime;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// States in which a component can serve its dependents.
fn is_available(state: LifecycleState) -> bool {
    matches!(
        state,
        LifecycleState::Running | LifecycleState::Swapping | LifecycleState::Maintenance
    )
}

pub struct LifecycleController {
    config: FleetConfig,
    runtime: Arc<dyn ComponentRuntime>,
    event_bus: EventBus,
    graph: RwLock<DependencyGraph>,
    components: RwLock<BTreeMap<ComponentId, LifecycleComponent>>,
    in_flight: Mutex<HashSet<ComponentId>>,
}

/// Removes the component from the in-flight set when dropped.
pub struct OperationGuard<'a> {
    in_flight: &'a Mutex<HashSet<ComponentId>>,
    id: ComponentId,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.id);
    }
}

impl LifecycleController {
    pub fn new(config: FleetConfig, runtime: Arc<dyn ComponentRuntime>, event_bus: EventBus) -> Self {
        let graph = DependencyGraph::new(
            config.activation.clone(),
            config.dependency.circular_detection,
        );
        Self {
            config,
            runtime,
            event_bus,
            graph: RwLock::new(graph),
            components: RwLock::new(BTreeMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ComponentRuntime> {
        &self.runtime
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // ---- registration ----

    /// Register a component. A fresh registration always starts with a zero
    /// restart count.
    pub fn register(&self, spec: ComponentSpec) -> FleetResult<()> {
        spec.validate()?;
        let id = spec.id.clone();
        {
            let mut graph = self.graph.write();
            let mut components = self.components.write();
            if components.contains_key(&id) {
                return Err(FleetError::AlreadyRegistered(id));
            }
            graph.insert_node(spec.clone());
            components.insert(id.clone(), LifecycleComponent::new(spec));
            Self::sync_relations(&graph, &mut components);
        }

        info!(component_id = %id, "Component registered");
        self.event_bus
            .publish(FleetEvent::component(FleetEventKind::Registered, &id));
        Ok(())
    }

    /// Remove a component that is not holding resources.
    pub fn deregister(&self, id: &ComponentId) -> FleetResult<LifecycleComponent> {
        let removed = {
            let mut graph = self.graph.write();
            let mut components = self.components.write();
            let component = components
                .get(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            if component.state().is_active() || component.state() == LifecycleState::Stopping {
                return Err(FleetError::ComponentActive {
                    component: id.clone(),
                    state: component.state(),
                });
            }
            graph.remove_node(id);
            let removed = components.remove(id);
            Self::sync_relations(&graph, &mut components);
            removed
        };

        info!(component_id = %id, "Component deregistered");
        self.event_bus
            .publish(FleetEvent::component(FleetEventKind::Deregistered, id));
        removed.ok_or_else(|| FleetError::ComponentNotFound(id.clone()))
    }

    fn sync_relations(
        graph: &DependencyGraph,
        components: &mut BTreeMap<ComponentId, LifecycleComponent>,
    ) {
        for (id, component) in components.iter_mut() {
            if let Some(node) = graph.node(id) {
                component.dependents = node.dependents.clone();
            }
        }
    }

    // ---- queries ----

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.components.read().contains_key(id)
    }

    pub fn get(&self, id: &ComponentId) -> Option<LifecycleComponent> {
        self.components.read().get(id).cloned()
    }

    pub fn state(&self, id: &ComponentId) -> Option<LifecycleState> {
        self.components.read().get(id).map(|c| c.state())
    }

    pub fn list(&self) -> Vec<LifecycleComponent> {
        self.components.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.read().keys().cloned().collect()
    }

    pub fn ids_in_state(&self, state: LifecycleState) -> Vec<ComponentId> {
        self.components
            .read()
            .values()
            .filter(|c| c.state() == state)
            .map(|c| c.id().clone())
            .collect()
    }

    pub fn catalog(&self) -> BTreeMap<ComponentId, ComponentSpec> {
        self.components
            .read()
            .iter()
            .map(|(id, c)| (id.clone(), c.spec.clone()))
            .collect()
    }

    /// Snapshot of the registry-wide graph.
    pub fn graph(&self) -> DependencyGraph {
        self.graph.read().clone()
    }

    pub fn config_of(&self, id: &ComponentId) -> FleetResult<ComponentConfig> {
        self.components
            .read()
            .get(id)
            .map(|c| c.config.clone())
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))
    }

    /// Cycles in the registry graph, or only those through `id`.
    pub fn circular_dependencies(&self, id: Option<&ComponentId>) -> Vec<CircularDependency> {
        self.graph
            .read()
            .cycles()
            .iter()
            .filter(|c| id.map_or(true, |id| c.contains(id)))
            .cloned()
            .collect()
    }

    /// Blocking dependencies of `id` that cannot serve it right now. A target
    /// whose own activation conditions do not hold counts as available.
    pub fn unavailable_hard_dependencies(&self, id: &ComponentId) -> Vec<ComponentId> {
        let graph = self.graph.read();
        let components = self.components.read();
        let mut unavailable: Vec<ComponentId> = graph
            .missing()
            .iter()
            .filter(|m| &m.from == id && !m.tolerated)
            .map(|m| m.to.clone())
            .collect();
        for edge in graph.edges_from(id).filter(|e| e.blocking) {
            let Some(target) = components.get(&edge.to) else {
                unavailable.push(edge.to.clone());
                continue;
            };
            if !target.spec.conditions_met(graph.activation()) {
                continue;
            }
            if !is_available(target.state()) {
                unavailable.push(edge.to.clone());
            }
        }
        unavailable
    }

    /// Dependency subgraph of `id`, discovered from the registry.
    pub fn subgraph(&self, id: &ComponentId) -> FleetResult<DependencyGraph> {
        let catalog = self.catalog();
        let seed = catalog
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
        Ok(GraphBuilder::new(self.config.dependency.max_dependency_depth)
            .with_activation(self.config.activation.clone())
            .with_circular_detection(self.config.dependency.circular_detection)
            .build([seed], &catalog))
    }

    /// Plan for starting `id` together with everything it depends on.
    pub fn startup_plan(
        &self,
        id: &ComponentId,
        strategy: ResolutionStrategy,
    ) -> FleetResult<ResolutionPlan> {
        let graph = self.subgraph(id)?;
        graph.validate()?;
        Ok(ResolutionPlanner::plan(&graph, strategy)?)
    }

    /// Topological start order for the full registry.
    pub fn fleet_startup_order(&self) -> FleetResult<Vec<ComponentId>> {
        let graph = self.graph.read();
        Ok(ResolutionPlanner::plan(&graph, ResolutionStrategy::Topological)?.ordered_nodes())
    }

    // ---- transitions ----

    /// Apply a transition and publish the matching event.
    pub fn transition(
        &self,
        id: &ComponentId,
        next: LifecycleState,
        reason: Option<String>,
    ) -> FleetResult<LifecycleState> {
        let (previous, running) = {
            let mut components = self.components.write();
            let component = components
                .get_mut(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            let previous = component.transition_to(next, reason.clone())?;
            let running = components
                .values()
                .filter(|c| c.state() == LifecycleState::Running)
                .count();
            (previous, running)
        };
        metrics::gauge!("aegis_fleet_components_running").set(running as f64);

        debug!(component_id = %id, from = %previous, to = %next, "Lifecycle transition");

        let kind = match (previous, next) {
            (_, LifecycleState::Starting) => Some(FleetEventKind::Starting),
            (LifecycleState::Starting, LifecycleState::Running) => Some(FleetEventKind::Started),
            (LifecycleState::Suspended, LifecycleState::Running) => Some(FleetEventKind::Resumed),
            (LifecycleState::Maintenance, LifecycleState::Running) => {
                Some(FleetEventKind::MaintenanceExited)
            }
            (_, LifecycleState::Stopping) => Some(FleetEventKind::Stopping),
            (_, LifecycleState::Stopped) => Some(FleetEventKind::Stopped),
            (_, LifecycleState::Failed) => Some(FleetEventKind::ComponentFailed),
            (_, LifecycleState::Suspended) => Some(FleetEventKind::Isolated),
            (_, LifecycleState::Maintenance) => Some(FleetEventKind::MaintenanceEntered),
            _ => None,
        };
        if let Some(kind) = kind {
            let mut event = FleetEvent::component(kind, id).with_payload(json!({
                "from": previous,
                "to": next,
            }));
            if let Some(reason) = reason {
                event.payload["reason"] = json!(reason);
            }
            self.event_bus.publish(event);
        }

        let node_state = match next {
            LifecycleState::Running => Some(NodeState::Resolved),
            LifecycleState::Failed => Some(NodeState::Failed),
            LifecycleState::Stopped => Some(NodeState::Unresolved),
            _ => None,
        };
        if let Some(state) = node_state {
            self.graph.write().set_state(id, state);
        }
        Ok(previous)
    }

    /// Record a new health status, publishing `HealthChanged` when it moves.
    pub fn set_health(&self, id: &ComponentId, status: HealthStatus) -> Option<HealthStatus> {
        let previous = {
            let mut components = self.components.write();
            let component = components.get_mut(id)?;
            let previous = component.health_status;
            component.health_status = status;
            previous
        };
        if previous != status {
            debug!(component_id = %id, from = %previous, to = %status, "Health status changed");
            self.event_bus.publish(
                FleetEvent::component(FleetEventKind::HealthChanged, id)
                    .with_payload(json!({ "from": previous, "to": status })),
            );
        }
        Some(previous)
    }

    pub fn set_config(&self, id: &ComponentId, config: ComponentConfig) -> FleetResult<()> {
        let mut components = self.components.write();
        let component = components
            .get_mut(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
        component.config = config;
        Ok(())
    }

    /// Claim exclusive use of `id` for a multi-step operation.
    pub fn begin_operation(&self, id: &ComponentId) -> FleetResult<OperationGuard<'_>> {
        if !self.in_flight.lock().insert(id.clone()) {
            return Err(FleetError::OperationInProgress(id.clone()));
        }
        Ok(OperationGuard {
            in_flight: &self.in_flight,
            id: id.clone(),
        })
    }

    pub fn is_busy(&self, id: &ComponentId) -> bool {
        self.in_flight.lock().contains(id)
    }

    // ---- control ----

    /// Resolve the dependency subgraph of `id` and bring every node in it
    /// to RUNNING, dependencies first.
    pub async fn start_component(self: &Arc<Self>, id: &ComponentId) -> FleetResult<ResolutionResult> {
        let graph = self.subgraph(id)?;
        let members: Vec<ComponentId> = graph.node_ids().cloned().collect();
        let strategy = self.config.dependency.resolution_strategy;
        let settings = ExecutorSettings {
            node_timeout: None,
            ..ExecutorSettings::from(&self.config.dependency)
        };
        let executor = ResolutionExecutor::new(
            self.clone() as Arc<dyn NodeStarter>,
            settings,
            self.event_bus.clone(),
        );

        info!(
            component_id = %id,
            strategy = %strategy,
            nodes = members.len(),
            "Starting component with its dependencies"
        );

        let limit = self.config.dependency.startup_order_timeout;
        let result = match tokio::time::timeout(limit, executor.resolve(graph, strategy)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(component_id = %id, timeout = ?limit, "Startup order timed out");
                for member in &members {
                    if self.state(member) == Some(LifecycleState::Starting) {
                        if let Err(e) = self.transition(
                            member,
                            LifecycleState::Failed,
                            Some("startup order timed out".to_string()),
                        ) {
                            error!(component_id = %member, "Failed to mark timed-out start as FAILED: {}", e);
                        }
                    }
                }
                return Err(FleetError::ResolutionTimeout(limit));
            }
        };

        match result.outcome(id) {
            Some(outcome) if outcome.state == NodeState::Resolved => Ok(result),
            Some(outcome) => Err(FleetError::ResolutionFailure {
                component: id.clone(),
                reason: outcome.error.clone().unwrap_or_else(|| "start failed".to_string()),
            }),
            None => Err(FleetError::ResolutionFailure {
                component: id.clone(),
                reason: match &result.aborted_by {
                    Some(culprit) => format!("resolution aborted by critical component {}", culprit),
                    None => "not attempted".to_string(),
                },
            }),
        }
    }

    /// Start `id` alone. Already-available components are left as they are.
    pub async fn start_single(&self, id: &ComponentId) -> FleetResult<()> {
        let (spec, config, state) = {
            let components = self.components.read();
            let component = components
                .get(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            (component.spec.clone(), component.config.clone(), component.state())
        };
        if is_available(state) {
            debug!(component_id = %id, state = %state, "Already running, nothing to start");
            return Ok(());
        }
        self.launch(&spec, &config).await
    }

    async fn launch(&self, spec: &ComponentSpec, config: &ComponentConfig) -> FleetResult<()> {
        let id = &spec.id;
        spec.check_constraints(config, &self.config.activation)?;

        let blocked = self.unavailable_hard_dependencies(id);
        if !blocked.is_empty() {
            return Err(FleetError::ResolutionFailure {
                component: id.clone(),
                reason: format!(
                    "hard dependencies not running: {}",
                    blocked
                        .iter()
                        .map(|d| d.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }

        self.transition(id, LifecycleState::Starting, None)?;
        let limit = self.config.dependency.component_start_timeout;
        let outcome = match tokio::time::timeout(limit, self.runtime.start(spec, config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("start timed out after {:?}", limit)),
        };

        match outcome {
            Ok(()) => {
                self.transition(id, LifecycleState::Running, None)?;
                metrics::counter!("aegis_fleet_component_starts_total").increment(1);
                info!(component_id = %id, version = %config.version, "Component started");
                Ok(())
            }
            Err(reason) => {
                warn!(component_id = %id, "Component failed to start: {}", reason);
                self.transition(id, LifecycleState::Failed, Some(reason.clone()))?;
                Err(FleetError::Runtime {
                    component: id.clone(),
                    reason,
                })
            }
        }
    }

    /// Stop and start `id` again, counting exactly one restart.
    pub async fn restart(&self, id: &ComponentId, reason: &str) -> FleetResult<u32> {
        let _guard = self.begin_operation(id)?;
        let (spec, config, state) = {
            let components = self.components.read();
            let component = components
                .get(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            (component.spec.clone(), component.config.clone(), component.state())
        };

        info!(component_id = %id, state = %state, reason, "Restarting component");
        self.event_bus.publish(
            FleetEvent::component(FleetEventKind::Restarting, id)
                .with_payload(json!({ "reason": reason })),
        );

        match state {
            LifecycleState::Running | LifecycleState::Suspended | LifecycleState::Maintenance => {
                self.transition(id, LifecycleState::Stopping, Some(reason.to_string()))?;
                self.force_stop(id).await;
                self.transition(id, LifecycleState::Stopped, None)?;
            }
            LifecycleState::Failed | LifecycleState::Stopped | LifecycleState::Initializing => {
                self.force_stop(id).await;
            }
            other => {
                return Err(FleetError::ComponentActive {
                    component: id.clone(),
                    state: other,
                })
            }
        }

        let count = {
            let mut components = self.components.write();
            components
                .get_mut(id)
                .map(|c| c.record_restart())
                .unwrap_or_default()
        };
        metrics::counter!("aegis_fleet_component_restarts_total").increment(1);

        self.launch(&spec, &config).await?;
        self.event_bus.publish(
            FleetEvent::component(FleetEventKind::Restarted, id)
                .with_payload(json!({ "restart_count": count })),
        );
        Ok(count)
    }

    // Errors are logged; the caller proceeds as if the instance is gone.
    async fn force_stop(&self, id: &ComponentId) {
        let limit = self.config.shutdown.force_timeout;
        match tokio::time::timeout(limit, self.runtime.stop(id, true)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(component_id = %id, "Force stop failed: {}", e),
            Err(_) => warn!(component_id = %id, timeout = ?limit, "Force stop timed out"),
        }
    }

    /// RUNNING -> SUSPENDED. Stays there until `resume`.
    pub fn isolate(&self, id: &ComponentId, reason: &str) -> FleetResult<()> {
        warn!(component_id = %id, reason, "Isolating component");
        self.transition(id, LifecycleState::Suspended, Some(reason.to_string()))?;
        Ok(())
    }

    pub fn resume(&self, id: &ComponentId) -> FleetResult<()> {
        if self.state(id) != Some(LifecycleState::Suspended) {
            let state = self
                .state(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            return Err(LifecycleError::InvalidTransition {
                component: id.clone(),
                from: state,
                to: LifecycleState::Running,
            }
            .into());
        }
        info!(component_id = %id, "Resuming isolated component");
        self.transition(id, LifecycleState::Running, Some("resumed".to_string()))?;
        Ok(())
    }

    pub fn enter_maintenance(&self, id: &ComponentId) -> FleetResult<()> {
        self.transition(id, LifecycleState::Maintenance, None)?;
        Ok(())
    }

    pub fn exit_maintenance(&self, id: &ComponentId) -> FleetResult<()> {
        if self.state(id) != Some(LifecycleState::Maintenance) {
            let state = self
                .state(id)
                .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
            return Err(LifecycleError::InvalidTransition {
                component: id.clone(),
                from: state,
                to: LifecycleState::Running,
            }
            .into());
        }
        self.transition(id, LifecycleState::Running, None)?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &ComponentId, reason: impl Into<String>) -> FleetResult<()> {
        let reason = reason.into();
        error!(component_id = %id, "Component failed: {}", reason);
        self.transition(id, LifecycleState::Failed, Some(reason))?;
        Ok(())
    }
}

#[async_trait]
impl NodeStarter for LifecycleController {
    async fn start_node(&self, spec: &ComponentSpec) -> Result<(), String> {
        self.start_single(&spec.id).await.map_err(|e| e.to_string())
    }
}
