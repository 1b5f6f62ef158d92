// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dependency Graph
//!
//! In-memory DAG of component specs and their declared edges.
//!
//! The graph is rebuilt on mutation: adding or removing a node or an edge
//! recomputes dependents, roots, leaves, depths, cycles and metrics from the
//! specs, so the derived fields never drift from the declared ones. Node
//! resolution state survives a rebuild.
//!
//! Terminology:
//! - **root**: node with no dependencies (resolves first)
//! - **leaf**: node nothing depends on
//! - **depth**: longest dependency path from any root

use crate::domain::component::{
    ActivationContext, ComponentId, ComponentSpec, DependencyRef, DependencyType, SpecCatalog,
};
use crate::domain::cycle::{display_path, CircularDependency, CycleDetector};
use chrono::{DateTime, Utc};
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    #[default]
    Unresolved,
    Resolving,
    Resolved,
    Failed,
    Circular,
}

/// Directed edge: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: ComponentId,
    pub to: ComponentId,
    pub dependency_type: DependencyType,
    pub blocking: bool,
    pub optional: bool,
    pub version_requirement: Option<VersionReq>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    pub spec: ComponentSpec,
    pub state: NodeState,
    pub dependencies: BTreeSet<ComponentId>,
    pub dependents: BTreeSet<ComponentId>,
    pub depth: usize,
    pub retry_count: u32,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DependencyNode {
    fn new(spec: ComponentSpec) -> Self {
        Self {
            spec,
            state: NodeState::Unresolved,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            depth: 0,
            retry_count: 0,
            resolved_at: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.spec.id
    }
}

/// Declared edge whose target is not part of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub from: ComponentId,
    pub to: ComponentId,
    pub dependency_type: DependencyType,
    pub tolerated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub unresolved: usize,
    pub resolving: usize,
    pub resolved: usize,
    pub failed: usize,
    pub circular: usize,
    pub max_depth: usize,
    pub cycle_count: usize,
    pub missing_count: usize,
    pub truncated_count: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Component {0} is not in the dependency graph")]
    UnknownComponent(ComponentId),

    #[error("Component {from} requires {to}, which is not registered")]
    MissingDependency { from: ComponentId, to: ComponentId },

    #[error("Circular dependency: {}", display_path(.cycle))]
    CircularDependency { cycle: Vec<ComponentId> },

    #[error("Component {from} requires {to} {requirement}, found {found}")]
    IncompatibleVersion {
        from: ComponentId,
        to: ComponentId,
        requirement: VersionReq,
        found: semver::Version,
    },
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<ComponentId, DependencyNode>,
    edges: BTreeMap<ComponentId, BTreeMap<ComponentId, Edge>>,
    roots: BTreeSet<ComponentId>,
    leaves: BTreeSet<ComponentId>,
    cycles: Vec<CircularDependency>,
    missing: Vec<MissingDependency>,
    truncated: BTreeSet<ComponentId>,
    metrics: GraphMetrics,
    circular_detection: bool,
    activation: ActivationContext,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new(ActivationContext::default(), true)
    }
}

impl DependencyGraph {
    pub fn new(activation: ActivationContext, circular_detection: bool) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            roots: BTreeSet::new(),
            leaves: BTreeSet::new(),
            cycles: Vec::new(),
            missing: Vec::new(),
            truncated: BTreeSet::new(),
            metrics: GraphMetrics::default(),
            circular_detection,
            activation,
        }
    }

    /// Graph over exactly `specs`, without transitive discovery.
    pub fn from_specs(
        specs: impl IntoIterator<Item = ComponentSpec>,
        activation: ActivationContext,
        circular_detection: bool,
    ) -> Self {
        let mut graph = Self::new(activation, circular_detection);
        for spec in specs {
            graph.nodes.insert(spec.id.clone(), DependencyNode::new(spec));
        }
        graph.recompute();
        graph
    }

    // ---- queries ----

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &ComponentId) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.nodes.keys()
    }

    pub fn edge(&self, from: &ComponentId, to: &ComponentId) -> Option<&Edge> {
        self.edges.get(from).and_then(|targets| targets.get(to))
    }

    pub fn edges_from(&self, from: &ComponentId) -> impl Iterator<Item = &Edge> {
        self.edges.get(from).into_iter().flat_map(|targets| targets.values())
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().flat_map(|targets| targets.values())
    }

    pub fn roots(&self) -> &BTreeSet<ComponentId> {
        &self.roots
    }

    pub fn leaves(&self) -> &BTreeSet<ComponentId> {
        &self.leaves
    }

    pub fn cycles(&self) -> &[CircularDependency] {
        &self.cycles
    }

    pub fn missing(&self) -> &[MissingDependency] {
        &self.missing
    }

    /// Ids discovered past the depth bound and left out of the graph.
    pub fn truncated(&self) -> &BTreeSet<ComponentId> {
        &self.truncated
    }

    pub fn metrics(&self) -> &GraphMetrics {
        &self.metrics
    }

    pub fn activation(&self) -> &ActivationContext {
        &self.activation
    }

    pub fn circular_detection(&self) -> bool {
        self.circular_detection
    }

    /// True when `to` is reachable from `from` along dependency edges.
    pub fn reaches(&self, from: &ComponentId, to: &ComponentId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.dependencies.iter());
            }
        }
        false
    }

    /// `id` plus everything it transitively depends on.
    pub fn dependency_closure(&self, id: &ComponentId) -> BTreeSet<ComponentId> {
        let mut closure = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !closure.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.dependencies.iter().cloned());
            }
        }
        closure.retain(|candidate| self.nodes.contains_key(candidate));
        closure
    }

    /// Blocking edges whose target version falls outside the requirement.
    pub fn version_violations(&self) -> Vec<&Edge> {
        self.edges()
            .filter(|edge| match (&edge.version_requirement, self.nodes.get(&edge.to)) {
                (Some(req), Some(target)) => !req.matches(&target.spec.version),
                _ => false,
            })
            .collect()
    }

    /// Structural checks that must pass before a plan may be executed.
    pub fn validate(&self) -> Result<(), GraphError> {
        if let Some(missing) = self.missing.iter().find(|m| !m.tolerated) {
            return Err(GraphError::MissingDependency {
                from: missing.from.clone(),
                to: missing.to.clone(),
            });
        }

        if let Some(cycle) = self.cycles.iter().find(|c| c.fatal) {
            return Err(GraphError::CircularDependency {
                cycle: cycle.cycle.clone(),
            });
        }

        for edge in self.version_violations() {
            if !edge.blocking {
                continue;
            }
            if let (Some(requirement), Some(target)) =
                (&edge.version_requirement, self.nodes.get(&edge.to))
            {
                return Err(GraphError::IncompatibleVersion {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    requirement: requirement.clone(),
                    found: target.spec.version.clone(),
                });
            }
        }

        Ok(())
    }

    // ---- mutation ----

    /// Insert or replace a node. Existing resolution state is kept on replace.
    pub fn insert_node(&mut self, spec: ComponentSpec) {
        match self.nodes.get_mut(&spec.id) {
            Some(node) => node.spec = spec,
            None => {
                self.nodes.insert(spec.id.clone(), DependencyNode::new(spec));
            }
        }
        self.recompute();
    }

    pub fn remove_node(&mut self, id: &ComponentId) -> Option<DependencyNode> {
        let removed = self.nodes.remove(id);
        if removed.is_some() {
            self.recompute();
        }
        removed
    }

    pub fn add_dependency(
        &mut self,
        from: &ComponentId,
        dependency: DependencyRef,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| GraphError::UnknownComponent(from.clone()))?;
        node.spec.depends_on.retain(|id| id != &dependency.id);
        node.spec.dependencies.retain(|d| d.id != dependency.id);
        node.spec.dependencies.push(dependency);
        self.recompute();
        Ok(())
    }

    pub fn remove_dependency(
        &mut self,
        from: &ComponentId,
        to: &ComponentId,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| GraphError::UnknownComponent(from.clone()))?;
        node.spec.depends_on.retain(|id| id != to);
        node.spec.dependencies.retain(|d| &d.id != to);
        self.recompute();
        Ok(())
    }

    /// Point the `from -> old` edge at `new`, keeping its type and flags.
    pub fn retarget(
        &mut self,
        from: &ComponentId,
        old: &ComponentId,
        new: &ComponentId,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| GraphError::UnknownComponent(from.clone()))?;
        let declared = node
            .spec
            .declared_dependencies()
            .into_iter()
            .find(|d| &d.id == old);
        if let Some(mut dependency) = declared {
            node.spec.depends_on.retain(|id| id != old);
            node.spec.dependencies.retain(|d| &d.id != old);
            dependency.id = new.clone();
            node.spec.dependencies.push(dependency);
            self.recompute();
        }
        Ok(())
    }

    pub fn set_state(&mut self, id: &ComponentId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = state;
            if state == NodeState::Resolved {
                node.resolved_at = Some(Utc::now());
                node.last_error = None;
            }
        }
        self.refresh_metrics();
    }

    pub fn record_failure(&mut self, id: &ComponentId, error: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = NodeState::Failed;
            node.last_error = Some(error.into());
        }
        self.refresh_metrics();
    }

    /// Mark `id` resolved at the instant its start hook returned.
    pub fn record_resolved(&mut self, id: &ComponentId, at: DateTime<Utc>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = NodeState::Resolved;
            node.resolved_at = Some(at);
            node.last_error = None;
        }
        self.refresh_metrics();
    }

    pub fn add_retries(&mut self, id: &ComponentId, retries: u32) -> u32 {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.retry_count += retries;
                node.retry_count
            }
            None => 0,
        }
    }

    /// Flag the members of every fatal cycle as `Circular`.
    pub fn mark_circular(&mut self) {
        let members: BTreeSet<ComponentId> = self
            .cycles
            .iter()
            .filter(|c| c.fatal)
            .flat_map(|c| c.cycle.iter().cloned())
            .collect();
        for id in &members {
            if let Some(node) = self.nodes.get_mut(id) {
                node.state = NodeState::Circular;
            }
        }
        self.refresh_metrics();
    }

    /// Recompute every derived field from the node specs.
    pub fn recompute(&mut self) {
        let nodes = &self.nodes;
        self.truncated.retain(|id| !nodes.contains_key(id));
        self.edges.clear();
        self.missing.clear();
        for node in self.nodes.values_mut() {
            node.dependencies.clear();
            node.dependents.clear();
        }

        let mut found = Vec::new();
        for (id, node) in &self.nodes {
            for dependency in node.spec.declared_dependencies() {
                if !dependency.is_active(&self.activation) {
                    continue;
                }
                if self.nodes.contains_key(&dependency.id) {
                    found.push(Edge {
                        from: id.clone(),
                        to: dependency.id.clone(),
                        dependency_type: dependency.dependency_type,
                        blocking: dependency.is_blocking(&self.activation),
                        optional: dependency.optional,
                        version_requirement: dependency.version.clone(),
                    });
                } else if !self.truncated.contains(&dependency.id) {
                    self.missing.push(MissingDependency {
                        from: id.clone(),
                        to: dependency.id.clone(),
                        dependency_type: dependency.dependency_type,
                        tolerated: dependency.tolerates_absence(&self.activation),
                    });
                }
            }
        }

        for edge in found {
            if let Some(node) = self.nodes.get_mut(&edge.from) {
                node.dependencies.insert(edge.to.clone());
            }
            if let Some(node) = self.nodes.get_mut(&edge.to) {
                node.dependents.insert(edge.from.clone());
            }
            self.edges
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone(), edge);
        }

        self.roots = self
            .nodes
            .iter()
            .filter(|(_, n)| n.dependencies.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        self.leaves = self
            .nodes
            .iter()
            .filter(|(_, n)| n.dependents.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        self.compute_depths();

        self.cycles = if self.circular_detection {
            CycleDetector::detect(self)
        } else {
            Vec::new()
        };
        for cycle in &self.cycles {
            debug!(
                cycle = %display_path(&cycle.cycle),
                severity = ?cycle.severity,
                "Cycle detected during graph rebuild"
            );
        }

        self.refresh_metrics();
    }

    fn compute_depths(&mut self) {
        let mut memo = BTreeMap::new();
        let mut visiting = BTreeSet::new();
        for id in self.nodes.keys() {
            depth_of(&self.nodes, id, &mut memo, &mut visiting);
        }
        for (id, depth) in memo {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.depth = depth;
            }
        }
    }

    fn refresh_metrics(&mut self) {
        let mut metrics = GraphMetrics {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.values().map(|t| t.len()).sum(),
            cycle_count: self.cycles.len(),
            missing_count: self.missing.len(),
            truncated_count: self.truncated.len(),
            ..GraphMetrics::default()
        };
        for node in self.nodes.values() {
            match node.state {
                NodeState::Unresolved => metrics.unresolved += 1,
                NodeState::Resolving => metrics.resolving += 1,
                NodeState::Resolved => metrics.resolved += 1,
                NodeState::Failed => metrics.failed += 1,
                NodeState::Circular => metrics.circular += 1,
            }
            metrics.max_depth = metrics.max_depth.max(node.depth);
        }
        self.metrics = metrics;
    }
}

// Longest path to a root. Back edges onto the current path contribute nothing.
fn depth_of(
    nodes: &BTreeMap<ComponentId, DependencyNode>,
    id: &ComponentId,
    memo: &mut BTreeMap<ComponentId, usize>,
    visiting: &mut BTreeSet<ComponentId>,
) -> usize {
    if let Some(depth) = memo.get(id) {
        return *depth;
    }
    visiting.insert(id.clone());
    let mut depth = 0;
    if let Some(node) = nodes.get(id) {
        for dependency in &node.dependencies {
            if visiting.contains(dependency) {
                continue;
            }
            depth = depth.max(depth_of(nodes, dependency, memo, visiting) + 1);
        }
    }
    visiting.remove(id);
    memo.insert(id.clone(), depth);
    depth
}

/// Discovers the transitive dependency closure of a set of seed specs.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    max_depth: usize,
    activation: ActivationContext,
    circular_detection: bool,
}

impl GraphBuilder {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            activation: ActivationContext::default(),
            circular_detection: true,
        }
    }

    pub fn with_activation(mut self, activation: ActivationContext) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_circular_detection(mut self, enabled: bool) -> Self {
        self.circular_detection = enabled;
        self
    }

    /// Seed the graph with `seeds`, then pull dependencies out of `catalog`
    /// breadth-first. Targets more than `max_depth` hops from every seed are
    /// recorded as truncated and left out; the partial graph is still valid.
    pub fn build<C>(
        &self,
        seeds: impl IntoIterator<Item = ComponentSpec>,
        catalog: &C,
    ) -> DependencyGraph
    where
        C: SpecCatalog + ?Sized,
    {
        let mut graph = DependencyGraph::new(self.activation.clone(), self.circular_detection);
        let mut queue: VecDeque<(ComponentSpec, usize)> = VecDeque::new();
        let mut enqueued = BTreeSet::new();

        for spec in seeds {
            if enqueued.insert(spec.id.clone()) {
                queue.push_back((spec, 0));
            }
        }

        while let Some((spec, distance)) = queue.pop_front() {
            for dependency in spec.declared_dependencies() {
                if !dependency.is_active(&self.activation) || enqueued.contains(&dependency.id) {
                    continue;
                }
                let Some(target) = catalog.spec(&dependency.id) else {
                    continue;
                };
                if distance + 1 > self.max_depth {
                    graph.truncated.insert(dependency.id.clone());
                    continue;
                }
                enqueued.insert(dependency.id.clone());
                queue.push_back((target.clone(), distance + 1));
            }
            graph
                .nodes
                .insert(spec.id.clone(), DependencyNode::new(spec));
        }

        if !graph.truncated.is_empty() {
            warn!(
                max_depth = self.max_depth,
                truncated = graph.truncated.len(),
                "Dependency discovery stopped at depth bound"
            );
        }

        graph.recompute();
        graph
    }
}
