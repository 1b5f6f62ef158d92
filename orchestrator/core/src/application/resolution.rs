// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolution Executor
//!
//! Runs a `ResolutionPlan` phase by phase against a `NodeStarter`.
//!
//! - Phase N+1 is not admitted until every node of phase N is terminal.
//! - Parallel phases resolve through a bounded pool; sequential phases one
//!   node at a time.
//! - A node whose blocking dependencies are not `Resolved` fails without its
//!   start hook being called.
//! - A node whose activation conditions do not hold is marked `Resolved`
//!   with no side effects.
//! - A failed start is retried `retry_attempts` times, sleeping
//!   `backoff_delay * retry` between attempts.
//! - A critical node that fails in a sequential phase abandons the rest of
//!   that phase. Later phases still run; their nodes that depend on the
//!   failed node fail at the dependency gate.
//!
//! Before planning, a conflict pass looks for duplicate names and version
//! mismatches and applies the auto-resolvable ones.

use crate::domain::component::{ActivationContext, ComponentId, ComponentSpec};
use crate::domain::config::DependencyConfig;
use crate::domain::cycle::display_path;
use crate::domain::errors::FleetError;
use crate::domain::events::{FleetEvent, FleetEventKind};
use crate::domain::graph::{DependencyGraph, NodeState};
use crate::domain::planning::{PhaseMode, ResolutionPlan, ResolutionPlanner, ResolutionStrategy};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Start hook invoked for each node whose conditions hold.
#[async_trait]
pub trait NodeStarter: Send + Sync {
    async fn start_node(&self, spec: &ComponentSpec) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub retry_attempts: u32,
    pub backoff_delay: Duration,
    pub max_parallelism: usize,
    /// `None` when the starter bounds its own calls
    pub node_timeout: Option<Duration>,
}

impl From<&DependencyConfig> for ExecutorSettings {
    fn from(config: &DependencyConfig) -> Self {
        Self {
            retry_attempts: config.retry_attempts,
            backoff_delay: config.backoff_delay,
            max_parallelism: config.max_parallelism.max(1),
            node_timeout: Some(config.component_start_timeout),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&DependencyConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub id: ComponentId,
    pub state: NodeState,
    pub attempts: u32,
    /// Conditions did not hold; nothing was started
    pub skipped: bool,
    pub error: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl NodeOutcome {
    fn failed(id: ComponentId, attempts: u32, error: String) -> Self {
        Self {
            id,
            state: NodeState::Failed,
            attempts,
            skipped: false,
            error: Some(error),
            resolved_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DuplicateName,
    VersionMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retarget {
    pub dependent: ComponentId,
    pub from: ComponentId,
    pub to: ComponentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConflict {
    pub kind: ConflictKind,
    pub components: Vec<ComponentId>,
    pub description: String,
    pub auto_resolvable: bool,
    pub resolution: Option<Retarget>,
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub plan: ResolutionPlan,
    pub graph: DependencyGraph,
    pub outcomes: BTreeMap<ComponentId, NodeOutcome>,
    /// In the order nodes reached `Resolved`
    pub resolved: Vec<ComponentId>,
    pub failed: Vec<ComponentId>,
    pub skipped: Vec<ComponentId>,
    pub not_attempted: Vec<ComponentId>,
    pub aborted_by: Option<ComponentId>,
    pub conflicts: Vec<DependencyConflict>,
    pub duration: Duration,
}

impl ResolutionResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted_by.is_none()
    }

    pub fn outcome(&self, id: &ComponentId) -> Option<&NodeOutcome> {
        self.outcomes.get(id)
    }
}

pub struct ResolutionExecutor {
    starter: Arc<dyn NodeStarter>,
    settings: ExecutorSettings,
    event_bus: EventBus,
}

impl ResolutionExecutor {
    pub fn new(starter: Arc<dyn NodeStarter>, settings: ExecutorSettings, event_bus: EventBus) -> Self {
        Self {
            starter,
            settings,
            event_bus,
        }
    }

    /// Duplicate display names and version requirements the current target
    /// does not meet. A mismatch is auto-resolvable when a same-named node
    /// satisfies the requirement; the highest such version is chosen.
    pub fn detect_conflicts(graph: &DependencyGraph) -> Vec<DependencyConflict> {
        let mut by_name: BTreeMap<&str, Vec<(&ComponentId, &Version)>> = BTreeMap::new();
        for node in graph.nodes() {
            by_name
                .entry(node.spec.display_name())
                .or_default()
                .push((node.id(), &node.spec.version));
        }

        let mut conflicts: Vec<DependencyConflict> = by_name
            .iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(name, members)| DependencyConflict {
                kind: ConflictKind::DuplicateName,
                components: members.iter().map(|(id, _)| (*id).clone()).collect(),
                description: format!(
                    "name '{}' is used by {}",
                    name,
                    members
                        .iter()
                        .map(|(id, v)| format!("{}@{}", id, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                auto_resolvable: false,
                resolution: None,
            })
            .collect();

        for edge in graph.version_violations() {
            let (Some(requirement), Some(target)) = (&edge.version_requirement, graph.node(&edge.to))
            else {
                continue;
            };
            let candidate = by_name
                .get(target.spec.display_name())
                .into_iter()
                .flatten()
                .filter(|(id, version)| *id != &edge.to && requirement.matches(version))
                .max_by(|a, b| a.1.cmp(b.1));

            conflicts.push(DependencyConflict {
                kind: ConflictKind::VersionMismatch,
                components: vec![edge.from.clone(), edge.to.clone()],
                description: format!(
                    "{} requires {} {}, found {}",
                    edge.from, edge.to, requirement, target.spec.version
                ),
                auto_resolvable: candidate.is_some(),
                resolution: candidate.map(|(id, _)| Retarget {
                    dependent: edge.from.clone(),
                    from: edge.to.clone(),
                    to: (*id).clone(),
                }),
            });
        }

        conflicts
    }

    /// Apply every auto-resolvable conflict to `graph`, returning the ones applied.
    pub fn apply_auto_resolutions(
        &self,
        graph: &mut DependencyGraph,
        conflicts: &[DependencyConflict],
    ) -> Vec<DependencyConflict> {
        let mut applied = Vec::new();
        for conflict in conflicts.iter().filter(|c| c.auto_resolvable) {
            let Some(retarget) = &conflict.resolution else {
                continue;
            };
            match graph.retarget(&retarget.dependent, &retarget.from, &retarget.to) {
                Ok(()) => {
                    info!(
                        component_id = %retarget.dependent,
                        from = %retarget.from,
                        to = %retarget.to,
                        "Auto-resolved version conflict"
                    );
                    self.event_bus.publish(
                        FleetEvent::component(FleetEventKind::ConflictResolved, &retarget.dependent)
                            .with_payload(json!({
                                "from": retarget.from,
                                "to": retarget.to,
                                "description": conflict.description,
                            })),
                    );
                    applied.push(conflict.clone());
                }
                Err(e) => warn!("Failed to apply conflict resolution: {}", e),
            }
        }
        applied
    }

    /// Conflict pass, structural validation and planning.
    pub fn prepare_plan(
        &self,
        graph: &mut DependencyGraph,
        strategy: ResolutionStrategy,
    ) -> Result<(ResolutionPlan, Vec<DependencyConflict>), FleetError> {
        let conflicts = Self::detect_conflicts(graph);
        for conflict in conflicts.iter().filter(|c| !c.auto_resolvable) {
            warn!(kind = ?conflict.kind, "Dependency conflict: {}", conflict.description);
        }
        let applied = self.apply_auto_resolutions(graph, &conflicts);

        if let Err(e) = graph.validate() {
            if let Some(cycle) = graph.cycles().iter().find(|c| c.fatal) {
                error!(cycle = %display_path(&cycle.cycle), "Fatal circular dependency");
                self.event_bus.publish(
                    FleetEvent::system(FleetEventKind::CircularDependencyDetected).with_payload(
                        json!({
                            "cycle": cycle.cycle,
                            "severity": cycle.severity,
                            "suggestions": cycle.suggestions,
                        }),
                    ),
                );
                graph.mark_circular();
            }
            return Err(e.into());
        }

        let plan = ResolutionPlanner::plan(graph, strategy)?;
        debug!(
            strategy = %strategy,
            phases = plan.phases.len(),
            risk = ?plan.risk.level,
            "Resolution plan prepared"
        );
        Ok((plan, applied))
    }

    /// Prepare a plan for `graph` and execute it.
    pub async fn resolve(
        &self,
        mut graph: DependencyGraph,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionResult, FleetError> {
        let (plan, conflicts) = self.prepare_plan(&mut graph, strategy)?;
        let mut result = self.execute(graph, plan).await;
        result.conflicts = conflicts;
        Ok(result)
    }

    pub async fn execute(&self, mut graph: DependencyGraph, plan: ResolutionPlan) -> ResolutionResult {
        let started = Instant::now();
        let activation = graph.activation().clone();
        let mut outcomes: BTreeMap<ComponentId, NodeOutcome> = BTreeMap::new();
        let mut resolved = Vec::new();
        let mut aborted_by = None;

        for phase in &plan.phases {
            debug!(
                phase = phase.index,
                mode = ?phase.mode,
                nodes = phase.nodes.len(),
                "Resolving phase"
            );
            match phase.mode {
                PhaseMode::Parallel => {
                    let mut runnable = Vec::new();
                    for id in &phase.nodes {
                        match Self::gate(&graph, id) {
                            Ok(spec) => {
                                graph.set_state(id, NodeState::Resolving);
                                runnable.push(spec);
                            }
                            Err(reason) => {
                                let outcome = NodeOutcome::failed(id.clone(), 0, reason);
                                self.record(&mut graph, &outcome, &mut resolved);
                                outcomes.insert(id.clone(), outcome);
                            }
                        }
                    }

                    let finished: Vec<NodeOutcome> = stream::iter(runnable)
                        .map(|spec| {
                            let activation = &activation;
                            async move { self.resolve_node(spec, activation).await }
                        })
                        .buffer_unordered(self.settings.max_parallelism.max(1))
                        .collect()
                        .await;

                    // Record in the order nodes finished
                    let mut finished = finished;
                    finished.sort_by_key(|o| o.resolved_at);
                    for outcome in finished {
                        self.record(&mut graph, &outcome, &mut resolved);
                        outcomes.insert(outcome.id.clone(), outcome);
                    }
                }
                PhaseMode::Sequential => {
                    for id in &phase.nodes {
                        let outcome = match Self::gate(&graph, id) {
                            Ok(spec) => {
                                graph.set_state(id, NodeState::Resolving);
                                self.resolve_node(spec, &activation).await
                            }
                            Err(reason) => NodeOutcome::failed(id.clone(), 0, reason),
                        };
                        self.record(&mut graph, &outcome, &mut resolved);
                        let critical_failure = outcome.state == NodeState::Failed
                            && graph.node(id).is_some_and(|n| n.spec.is_critical());
                        outcomes.insert(id.clone(), outcome);
                        if critical_failure {
                            error!(
                                phase = phase.index,
                                component_id = %id,
                                "Critical component failed, abandoning the rest of its phase"
                            );
                            aborted_by.get_or_insert_with(|| id.clone());
                            break;
                        }
                    }
                }
            }
        }

        let failed = outcomes
            .values()
            .filter(|o| o.state == NodeState::Failed)
            .map(|o| o.id.clone())
            .collect();
        let skipped = outcomes
            .values()
            .filter(|o| o.skipped)
            .map(|o| o.id.clone())
            .collect();
        let not_attempted = plan
            .ordered_nodes()
            .into_iter()
            .filter(|id| !outcomes.contains_key(id))
            .collect();

        ResolutionResult {
            plan,
            graph,
            outcomes,
            resolved,
            failed,
            skipped,
            not_attempted,
            aborted_by,
            conflicts: Vec::new(),
            duration: started.elapsed(),
        }
    }

    // Blocking dependencies must already be resolved.
    fn gate(graph: &DependencyGraph, id: &ComponentId) -> Result<ComponentSpec, String> {
        let node = graph
            .node(id)
            .ok_or_else(|| format!("{} is not in the graph", id))?;
        let blocked: BTreeSet<&ComponentId> = graph
            .edges_from(id)
            .filter(|e| e.blocking)
            .filter(|e| graph.node(&e.to).map(|n| n.state) != Some(NodeState::Resolved))
            .map(|e| &e.to)
            .collect();
        if blocked.is_empty() {
            Ok(node.spec.clone())
        } else {
            Err(format!(
                "hard dependencies not resolved: {}",
                blocked
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }

    async fn resolve_node(&self, spec: ComponentSpec, activation: &ActivationContext) -> NodeOutcome {
        let id = spec.id.clone();
        if !spec.conditions_met(activation) {
            debug!(component_id = %id, "Activation conditions unmet, skipping");
            return NodeOutcome {
                id,
                state: NodeState::Resolved,
                attempts: 0,
                skipped: true,
                error: None,
                resolved_at: Some(Utc::now()),
            };
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let started = match self.settings.node_timeout {
                Some(limit) => tokio::time::timeout(limit, self.starter.start_node(&spec))
                    .await
                    .unwrap_or_else(|_| Err(format!("start timed out after {:?}", limit))),
                None => self.starter.start_node(&spec).await,
            };
            let error = match started {
                Ok(()) => {
                    return NodeOutcome {
                        id,
                        state: NodeState::Resolved,
                        attempts,
                        skipped: false,
                        error: None,
                        resolved_at: Some(Utc::now()),
                    }
                }
                Err(e) => e,
            };

            let retry = attempts;
            if retry > self.settings.retry_attempts {
                return NodeOutcome::failed(id, attempts, error);
            }
            let backoff = self.settings.backoff_delay * retry;
            warn!(
                component_id = %id,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Start failed, retrying: {}",
                error
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn record(&self, graph: &mut DependencyGraph, outcome: &NodeOutcome, resolved: &mut Vec<ComponentId>) {
        graph.add_retries(&outcome.id, outcome.attempts.saturating_sub(1));
        match outcome.state {
            NodeState::Resolved => {
                graph.record_resolved(&outcome.id, outcome.resolved_at.unwrap_or_else(Utc::now));
                resolved.push(outcome.id.clone());
                let kind = if outcome.skipped {
                    FleetEventKind::NodeSkipped
                } else {
                    FleetEventKind::NodeResolved
                };
                self.event_bus.publish(
                    FleetEvent::component(kind, &outcome.id)
                        .with_payload(json!({ "attempts": outcome.attempts })),
                );
            }
            _ => {
                let reason = outcome.error.clone().unwrap_or_default();
                graph.record_failure(&outcome.id, reason.clone());
                metrics::counter!("aegis_fleet_resolution_node_failures_total").increment(1);
                warn!(component_id = %outcome.id, attempts = outcome.attempts, "Node failed: {}", reason);
                self.event_bus.publish(
                    FleetEvent::component(FleetEventKind::NodeFailed, &outcome.id).with_payload(
                        json!({ "attempts": outcome.attempts, "error": reason }),
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::{ActivationCondition, Criticality, DependencyRef};
    use parking_lot::Mutex;
    use semver::VersionReq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct ScriptedStarter {
        calls: Mutex<Vec<ComponentId>>,
        failures: Mutex<HashMap<ComponentId, u32>>,
    }

    impl ScriptedStarter {
        fn failing(id: &str, times: u32) -> Self {
            let starter = Self::default();
            starter.failures.lock().insert(id.into(), times);
            starter
        }

        fn calls(&self) -> Vec<ComponentId> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl NodeStarter for ScriptedStarter {
        async fn start_node(&self, spec: &ComponentSpec) -> Result<(), String> {
            self.calls.lock().push(spec.id.clone());
            let mut failures = self.failures.lock();
            match failures.get_mut(&spec.id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(format!("{} refused to start", spec.id))
                }
                _ => Ok(()),
            }
        }
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            retry_attempts: 2,
            backoff_delay: Duration::from_millis(1),
            max_parallelism: 4,
            node_timeout: Some(Duration::from_secs(1)),
        }
    }

    fn spec(id: &str) -> ComponentSpec {
        ComponentSpec::new(id, Version::new(1, 0, 0))
    }

    fn graph(specs: Vec<ComponentSpec>) -> DependencyGraph {
        DependencyGraph::from_specs(specs, ActivationContext::default(), true)
    }

    fn executor(starter: Arc<ScriptedStarter>) -> ResolutionExecutor {
        ResolutionExecutor::new(starter, settings(), EventBus::new(64))
    }

    #[tokio::test]
    async fn test_resolves_in_dependency_order() {
        let starter = Arc::new(ScriptedStarter::default());
        let result = executor(starter.clone())
            .resolve(
                graph(vec![spec("api").depends_on("db"), spec("db")]),
                ResolutionStrategy::Topological,
            )
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(starter.calls(), vec!["db".into(), "api".into()]);
        let db = result.graph.node(&"db".into()).unwrap().resolved_at.unwrap();
        let api = result.graph.node(&"api".into()).unwrap().resolved_at.unwrap();
        assert!(db <= api);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let starter = Arc::new(ScriptedStarter::failing("db", 2));
        let result = executor(starter.clone())
            .resolve(graph(vec![spec("db")]), ResolutionStrategy::Topological)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.outcome(&"db".into()).unwrap().attempts, 3);
        assert_eq!(result.graph.node(&"db".into()).unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_node_and_block_dependents() {
        let starter = Arc::new(ScriptedStarter::failing("db", 10));
        let result = executor(starter.clone())
            .resolve(
                graph(vec![spec("api").depends_on("db"), spec("db"), spec("cache")]),
                ResolutionStrategy::Topological,
            )
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.failed, vec![ComponentId::from("api"), ComponentId::from("db")]);
        assert_eq!(result.outcome(&"db".into()).unwrap().attempts, 3);
        // api never reached its start hook
        assert!(!starter.calls().contains(&"api".into()));
        // sibling in the parallel phase was not blocked
        assert!(result.resolved.contains(&"cache".into()));
    }

    #[tokio::test]
    async fn test_critical_failure_abandons_only_its_phase() {
        let starter = Arc::new(ScriptedStarter::failing("a", 10));
        let result = executor(starter.clone())
            .resolve(
                graph(vec![
                    spec("a").with_criticality(Criticality::Critical),
                    spec("b").depends_on("a"),
                    spec("z"),
                ]),
                ResolutionStrategy::DepthFirst,
            )
            .await
            .unwrap();

        assert_eq!(result.plan.phases[0].nodes, vec![ComponentId::from("a"), "b".into()]);
        assert_eq!(result.aborted_by, Some("a".into()));
        assert_eq!(result.not_attempted, vec![ComponentId::from("b")]);
        assert!(!starter.calls().contains(&"b".into()));

        // Independent root in a later phase still comes up
        assert_eq!(result.resolved, vec![ComponentId::from("z")]);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_dependent_of_failed_critical_fails_in_later_phase() {
        let starter = Arc::new(ScriptedStarter::failing("core", 10));
        let result = executor(starter.clone())
            .resolve(
                graph(vec![
                    spec("core").with_priority(10).with_criticality(Criticality::Critical),
                    spec("later").with_priority(1),
                    spec("api").with_priority(1).depends_on("core"),
                ]),
                ResolutionStrategy::PriorityBased,
            )
            .await
            .unwrap();

        assert_eq!(result.aborted_by, Some("core".into()));
        assert!(result.not_attempted.is_empty());
        assert_eq!(result.resolved, vec![ComponentId::from("later")]);
        assert_eq!(
            result.outcome(&"api".into()).map(|o| o.state),
            Some(NodeState::Failed)
        );
        assert!(!starter.calls().contains(&"api".into()));
    }

    #[tokio::test]
    async fn test_unmet_conditions_skip_without_side_effects() {
        let starter = Arc::new(ScriptedStarter::default());
        let result = executor(starter.clone())
            .resolve(
                graph(vec![spec("beta").with_condition(ActivationCondition::FeatureFlag {
                    flag: "beta".to_string(),
                })]),
                ResolutionStrategy::Topological,
            )
            .await
            .unwrap();

        assert_eq!(result.skipped, vec![ComponentId::from("beta")]);
        assert_eq!(
            result.graph.node(&"beta".into()).unwrap().state,
            NodeState::Resolved
        );
        assert!(starter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_hard_cycle_aborts_before_any_start() {
        let starter = Arc::new(ScriptedStarter::default());
        let err = executor(starter.clone())
            .resolve(
                graph(vec![
                    spec("A").depends_on("B"),
                    spec("B").depends_on("C"),
                    spec("C").depends_on("A"),
                ]),
                ResolutionStrategy::Topological,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::CircularDependency { .. }));
        assert!(starter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_auto_resolved() {
        let starter = Arc::new(ScriptedStarter::default());
        let g = graph(vec![
            spec("api").with_dependency(
                DependencyRef::hard("db-v1").with_version(VersionReq::parse("^2").unwrap()),
            ),
            ComponentSpec::new("db-v1", Version::new(1, 4, 0)).with_name("db"),
            ComponentSpec::new("db-v2", Version::new(2, 1, 0)).with_name("db"),
        ]);

        let conflicts = ResolutionExecutor::detect_conflicts(&g);
        assert!(conflicts.iter().any(|c| c.kind == ConflictKind::DuplicateName));
        let mismatch = conflicts
            .iter()
            .find(|c| c.kind == ConflictKind::VersionMismatch)
            .unwrap();
        assert!(mismatch.auto_resolvable);

        let result = executor(starter)
            .resolve(g, ResolutionStrategy::Topological)
            .await
            .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.graph.edge(&"api".into(), &"db-v2".into()).is_some());
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_unresolvable_version_mismatch_fails_validation() {
        let starter = Arc::new(ScriptedStarter::default());
        let g = graph(vec![
            spec("api").with_dependency(
                DependencyRef::hard("db").with_version(VersionReq::parse("^2").unwrap()),
            ),
            spec("db"),
        ]);
        let err = executor(starter)
            .resolve(g, ResolutionStrategy::Topological)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }
}
