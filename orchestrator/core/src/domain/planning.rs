// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolution Planning
//!
//! Turns a `DependencyGraph` and a `ResolutionStrategy` into an ordered list
//! of phases. Every strategy respects the ordering edges of the graph: a node
//! never lands in a phase before one holding something it depends on.
//!
//! Ordering edges are all edges except `peer`, minus non-blocking edges that
//! close a tolerated cycle. A fatal cycle aborts planning.

use crate::domain::component::{ComponentId, Criticality};
use crate::domain::cycle::display_path;
use crate::domain::graph::DependencyGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    #[default]
    Topological,
    BreadthFirst,
    DepthFirst,
    PriorityBased,
    Parallel,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Topological => "topological",
            ResolutionStrategy::BreadthFirst => "breadth_first",
            ResolutionStrategy::DepthFirst => "depth_first",
            ResolutionStrategy::PriorityBased => "priority_based",
            ResolutionStrategy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "topological" => Ok(ResolutionStrategy::Topological),
            "breadth_first" => Ok(ResolutionStrategy::BreadthFirst),
            "depth_first" => Ok(ResolutionStrategy::DepthFirst),
            "priority_based" | "priority" => Ok(ResolutionStrategy::PriorityBased),
            "parallel" => Ok(ResolutionStrategy::Parallel),
            other => Err(format!("unknown resolution strategy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPhase {
    pub index: usize,
    pub nodes: Vec<ComponentId>,
    pub mode: PhaseMode,
    /// Indices of earlier phases holding dependencies of this phase
    pub depends_on: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub critical_components: Vec<ComponentId>,
    pub tolerated_cycles: usize,
    pub tolerated_missing: usize,
    pub truncated: usize,
    pub max_depth: usize,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub strategy: ResolutionStrategy,
    pub phases: Vec<ResolutionPhase>,
    pub risk: RiskAssessment,
    pub created_at: DateTime<Utc>,
}

impl ResolutionPlan {
    /// Every node in execution order.
    pub fn ordered_nodes(&self) -> Vec<ComponentId> {
        self.phases
            .iter()
            .flat_map(|p| p.nodes.iter().cloned())
            .collect()
    }

    pub fn phase_of(&self, id: &ComponentId) -> Option<usize> {
        self.phases
            .iter()
            .find(|p| p.nodes.contains(id))
            .map(|p| p.index)
    }

    pub fn node_count(&self) -> usize {
        self.phases.iter().map(|p| p.nodes.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("Circular dependency blocks startup: {}", display_path(.cycle))]
    CircularDependency { cycle: Vec<ComponentId> },

    #[error("No valid order exists for: {}", display_path(.remaining))]
    Unorderable { remaining: Vec<ComponentId> },
}

type Dependencies = BTreeMap<ComponentId, BTreeSet<ComponentId>>;

pub struct ResolutionPlanner;

impl ResolutionPlanner {
    pub fn plan(
        graph: &DependencyGraph,
        strategy: ResolutionStrategy,
    ) -> Result<ResolutionPlan, PlanningError> {
        if let Some(cycle) = graph.cycles().iter().find(|c| c.fatal) {
            return Err(PlanningError::CircularDependency {
                cycle: cycle.cycle.clone(),
            });
        }

        let deps = Self::ordering_dependencies(graph);
        let groups = match strategy {
            ResolutionStrategy::Topological => kahn_layers(&deps, &BTreeSet::new())?
                .into_iter()
                .map(|layer| {
                    let mode = concurrent_if_many(&layer);
                    (layer, mode)
                })
                .collect(),
            ResolutionStrategy::BreadthFirst => breadth_first(graph, &deps)?,
            ResolutionStrategy::DepthFirst => depth_first(graph, &deps),
            ResolutionStrategy::PriorityBased => priority_based(graph, &deps)?,
            ResolutionStrategy::Parallel => parallel(graph, &deps)?,
        };

        let phases = link_phases(groups, &deps);
        Ok(ResolutionPlan {
            strategy,
            phases,
            risk: assess(graph),
            created_at: Utc::now(),
        })
    }

    /// Edges that constrain ordering, keyed by dependent.
    pub fn ordering_dependencies(graph: &DependencyGraph) -> Dependencies {
        let mut deps: Dependencies = graph
            .node_ids()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for edge in graph.edges() {
            if edge.dependency_type == crate::domain::component::DependencyType::Peer {
                continue;
            }
            if !edge.blocking && graph.reaches(&edge.to, &edge.from) {
                continue;
            }
            if let Some(set) = deps.get_mut(&edge.from) {
                set.insert(edge.to.clone());
            }
        }
        deps
    }
}

fn concurrent_if_many(nodes: &[ComponentId]) -> PhaseMode {
    if nodes.len() > 1 {
        PhaseMode::Parallel
    } else {
        PhaseMode::Sequential
    }
}

// Kahn layering. Ids in `placed` count as already resolved.
fn kahn_layers(
    deps: &Dependencies,
    placed: &BTreeSet<ComponentId>,
) -> Result<Vec<Vec<ComponentId>>, PlanningError> {
    let mut remaining: Dependencies = deps
        .iter()
        .filter(|(id, _)| !placed.contains(*id))
        .map(|(id, d)| (id.clone(), d.difference(placed).cloned().collect()))
        .collect();

    let mut layers = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<ComponentId> = remaining
            .iter()
            .filter(|(_, d)| d.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        if ready.is_empty() {
            return Err(PlanningError::Unorderable {
                remaining: remaining.keys().cloned().collect(),
            });
        }
        for id in &ready {
            remaining.remove(id);
        }
        for d in remaining.values_mut() {
            for id in &ready {
                d.remove(id);
            }
        }
        layers.push(ready);
    }
    Ok(layers)
}

fn breadth_first(
    graph: &DependencyGraph,
    deps: &Dependencies,
) -> Result<Vec<(Vec<ComponentId>, PhaseMode)>, PlanningError> {
    // Shortest distance from a root, walking dependent edges.
    let mut dependents: BTreeMap<&ComponentId, Vec<&ComponentId>> = BTreeMap::new();
    for (id, d) in deps {
        for dep in d {
            dependents.entry(dep).or_default().push(id);
        }
    }
    let mut distance: BTreeMap<ComponentId, usize> = BTreeMap::new();
    let mut discovery: Vec<ComponentId> = Vec::new();
    let mut queue: VecDeque<&ComponentId> = deps
        .iter()
        .filter(|(_, d)| d.is_empty())
        .map(|(id, _)| id)
        .collect();
    for id in &queue {
        distance.insert((*id).clone(), 0);
    }
    while let Some(id) = queue.pop_front() {
        discovery.push(id.clone());
        let next = distance.get(id).copied().unwrap_or_default() + 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            if !distance.contains_key(*dependent) {
                distance.insert((*dependent).clone(), next);
                queue.push_back(*dependent);
            }
        }
    }

    // Lift each level so every dependency sits strictly lower.
    let order: Vec<ComponentId> = kahn_layers(deps, &BTreeSet::new())?
        .into_iter()
        .flatten()
        .collect();
    let mut level: BTreeMap<ComponentId, usize> = BTreeMap::new();
    for id in &order {
        let floor = deps
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|dep| level.get(dep).map(|l| l + 1))
            .max()
            .unwrap_or(0);
        let bfs = distance.get(id).copied().unwrap_or(0);
        level.insert(id.clone(), floor.max(bfs));
    }

    let mut grouped: BTreeMap<usize, Vec<ComponentId>> = BTreeMap::new();
    for id in &discovery {
        if let Some(l) = level.get(id) {
            grouped.entry(*l).or_default().push(id.clone());
        }
    }
    debug_assert_eq!(
        grouped.values().map(|v| v.len()).sum::<usize>(),
        graph.len()
    );
    Ok(grouped
        .into_values()
        .map(|nodes| (nodes, PhaseMode::Sequential))
        .collect())
}

fn depth_first(graph: &DependencyGraph, deps: &Dependencies) -> Vec<(Vec<ComponentId>, PhaseMode)> {
    fn visit(
        id: &ComponentId,
        deps: &Dependencies,
        visited: &mut BTreeSet<ComponentId>,
        out: &mut Vec<ComponentId>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        for dep in deps.get(id).into_iter().flatten() {
            visit(dep, deps, visited, out);
        }
        out.push(id.clone());
    }

    let mut has_dependents: BTreeSet<&ComponentId> = BTreeSet::new();
    for d in deps.values() {
        has_dependents.extend(d.iter());
    }

    let mut visited = BTreeSet::new();
    let mut groups = Vec::new();
    let starts = deps
        .keys()
        .filter(|id| !has_dependents.contains(id))
        .chain(graph.node_ids());
    for start in starts {
        let mut branch = Vec::new();
        visit(start, deps, &mut visited, &mut branch);
        if !branch.is_empty() {
            groups.push((branch, PhaseMode::Sequential));
        }
    }
    groups
}

fn priority_based(
    graph: &DependencyGraph,
    deps: &Dependencies,
) -> Result<Vec<(Vec<ComponentId>, PhaseMode)>, PlanningError> {
    let priority = |id: &ComponentId| {
        graph
            .node(id)
            .map(|n| n.spec.metadata.priority)
            .unwrap_or_default()
    };
    let weight = |id: &ComponentId| {
        graph
            .node(id)
            .map(|n| n.spec.metadata.weight)
            .unwrap_or_default()
    };

    let mut placed: BTreeSet<ComponentId> = BTreeSet::new();
    let mut groups = Vec::new();

    while placed.len() < deps.len() {
        let mut levels: Vec<i32> = deps
            .keys()
            .filter(|id| !placed.contains(*id))
            .map(|id| priority(id))
            .collect();
        levels.sort_unstable_by(|a, b| b.cmp(a));
        levels.dedup();

        let mut progressed = false;
        for level in levels {
            // Dependencies must sit in an already emitted group.
            let mut group: Vec<ComponentId> = deps
                .iter()
                .filter(|(id, d)| {
                    !placed.contains(*id) && priority(id) == level && d.is_subset(&placed)
                })
                .map(|(id, _)| id.clone())
                .collect();
            if group.is_empty() {
                continue;
            }
            group.sort_by(|a, b| {
                weight(b)
                    .partial_cmp(&weight(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            });
            placed.extend(group.iter().cloned());
            groups.push((group, PhaseMode::Sequential));
            progressed = true;
        }

        if !progressed {
            return Err(PlanningError::Unorderable {
                remaining: deps
                    .keys()
                    .filter(|id| !placed.contains(*id))
                    .cloned()
                    .collect(),
            });
        }
    }
    Ok(groups)
}

fn parallel(
    graph: &DependencyGraph,
    deps: &Dependencies,
) -> Result<Vec<(Vec<ComponentId>, PhaseMode)>, PlanningError> {
    let first: BTreeSet<ComponentId> = deps
        .iter()
        .filter(|(id, d)| {
            d.is_empty()
                || graph.node(id).is_some_and(|n| {
                    n.spec.optional
                        && d.iter()
                            .all(|dep| graph.edge(id, dep).is_some_and(|e| !e.blocking))
                })
        })
        .map(|(id, _)| id.clone())
        .collect();

    let mut groups = Vec::new();
    if !first.is_empty() {
        groups.push((first.iter().cloned().collect(), PhaseMode::Parallel));
    }
    for layer in kahn_layers(deps, &first)? {
        groups.push((layer, PhaseMode::Parallel));
    }
    Ok(groups)
}

fn link_phases(groups: Vec<(Vec<ComponentId>, PhaseMode)>, deps: &Dependencies) -> Vec<ResolutionPhase> {
    let mut phase_of: BTreeMap<ComponentId, usize> = BTreeMap::new();
    let mut phases = Vec::with_capacity(groups.len());
    for (index, (nodes, mode)) in groups.into_iter().enumerate() {
        for id in &nodes {
            phase_of.insert(id.clone(), index);
        }
        phases.push(ResolutionPhase {
            index,
            nodes,
            mode,
            depends_on: BTreeSet::new(),
        });
    }
    for phase in &mut phases {
        let mut depends_on = BTreeSet::new();
        for id in &phase.nodes {
            for dep in deps.get(id).into_iter().flatten() {
                if let Some(&p) = phase_of.get(dep) {
                    if p != phase.index {
                        depends_on.insert(p);
                    }
                }
            }
        }
        phase.depends_on = depends_on;
    }
    phases
}

fn assess(graph: &DependencyGraph) -> RiskAssessment {
    let critical_components: Vec<ComponentId> = graph
        .nodes()
        .filter(|n| n.spec.metadata.criticality == Criticality::Critical)
        .map(|n| n.id().clone())
        .collect();
    let tolerated_cycles = graph.cycles().iter().filter(|c| !c.fatal).count();
    let tolerated_missing = graph.missing().iter().filter(|m| m.tolerated).count();
    let truncated = graph.truncated().len();
    let max_depth = graph.metrics().max_depth;

    let mut level = RiskLevel::Low;
    let mut notes = Vec::new();
    if tolerated_cycles > 0 {
        level = level.max(RiskLevel::Medium);
        notes.push(format!("{} tolerated soft cycle(s)", tolerated_cycles));
    }
    if tolerated_missing > 0 {
        level = level.max(RiskLevel::Medium);
        notes.push(format!("{} optional dependency target(s) absent", tolerated_missing));
    }
    if truncated > 0 {
        level = level.max(RiskLevel::High);
        notes.push(format!("{} component(s) beyond the depth bound", truncated));
    }
    if !critical_components.is_empty() && max_depth > 3 {
        level = level.max(RiskLevel::High);
        notes.push(format!(
            "critical components in a chain {} levels deep",
            max_depth
        ));
    }
    let critical_in_cycle = graph
        .cycles()
        .iter()
        .any(|c| critical_components.iter().any(|id| c.contains(id)));
    if critical_in_cycle {
        level = RiskLevel::Critical;
        notes.push("critical component participates in a cycle".to_string());
    }

    RiskAssessment {
        level,
        critical_components,
        tolerated_cycles,
        tolerated_missing,
        truncated,
        max_depth,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::component::{ActivationContext, ComponentSpec, DependencyRef};
    use semver::Version;

    fn spec(id: &str) -> ComponentSpec {
        ComponentSpec::new(id, Version::new(1, 0, 0))
    }

    fn id(s: &str) -> ComponentId {
        ComponentId::from(s)
    }

    fn graph(specs: Vec<ComponentSpec>) -> DependencyGraph {
        DependencyGraph::from_specs(specs, ActivationContext::default(), true)
    }

    fn diamond() -> DependencyGraph {
        graph(vec![
            spec("api").depends_on("auth").depends_on("cache").with_priority(1),
            spec("auth").depends_on("db").with_priority(5),
            spec("cache").depends_on("db").with_priority(9),
            spec("db").with_priority(0),
        ])
    }

    fn assert_respects_order(graph: &DependencyGraph, plan: &ResolutionPlan) {
        let order = plan.ordered_nodes();
        assert_eq!(order.len(), graph.len());
        for edge in graph.edges().filter(|e| e.blocking) {
            let from = plan.phase_of(&edge.from).unwrap();
            let to = plan.phase_of(&edge.to).unwrap();
            let from_pos = order.iter().position(|n| n == &edge.from).unwrap();
            let to_pos = order.iter().position(|n| n == &edge.to).unwrap();
            assert!(to <= from, "{} must not follow {}", edge.to, edge.from);
            assert!(to_pos < from_pos);
            if to == from {
                assert_eq!(plan.phases[from].mode, PhaseMode::Sequential);
            }
        }
    }

    #[test]
    fn test_topological_layers() {
        let g = diamond();
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::Topological).unwrap();

        assert_eq!(plan.phases.len(), 3);
        assert_eq!(plan.phases[0].nodes, vec![id("db")]);
        assert_eq!(plan.phases[0].mode, PhaseMode::Sequential);
        assert_eq!(plan.phases[1].nodes, vec![id("auth"), id("cache")]);
        assert_eq!(plan.phases[1].mode, PhaseMode::Parallel);
        assert_eq!(plan.phases[2].depends_on, BTreeSet::from([1]));
        assert_respects_order(&g, &plan);
    }

    #[test]
    fn test_every_strategy_respects_hard_order() {
        let g = diamond();
        for strategy in [
            ResolutionStrategy::Topological,
            ResolutionStrategy::BreadthFirst,
            ResolutionStrategy::DepthFirst,
            ResolutionStrategy::PriorityBased,
            ResolutionStrategy::Parallel,
        ] {
            let plan = ResolutionPlanner::plan(&g, strategy).unwrap();
            assert_eq!(plan.strategy, strategy);
            assert_respects_order(&g, &plan);
        }
    }

    #[test]
    fn test_priority_groups_descend() {
        let g = graph(vec![
            spec("low").with_priority(1),
            spec("high").with_priority(10),
            spec("mid").with_priority(5),
        ]);
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::PriorityBased).unwrap();
        assert_eq!(plan.ordered_nodes(), vec![id("high"), id("mid"), id("low")]);
        assert_eq!(plan.phases.len(), 3);
    }

    #[test]
    fn test_priority_defers_until_dependencies_placed() {
        let g = diamond();
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::PriorityBased).unwrap();
        // cache has the highest priority but waits for db
        assert_eq!(plan.ordered_nodes()[0], id("db"));
        assert_respects_order(&g, &plan);
    }

    #[test]
    fn test_depth_first_groups_by_branch() {
        let g = graph(vec![
            spec("a").depends_on("b"),
            spec("b"),
            spec("x").depends_on("y"),
            spec("y"),
        ]);
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::DepthFirst).unwrap();
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phases[0].nodes, vec![id("b"), id("a")]);
        assert_eq!(plan.phases[1].nodes, vec![id("y"), id("x")]);
    }

    #[test]
    fn test_parallel_first_phase_holds_roots_and_optional_nodes() {
        let g = graph(vec![
            spec("a").depends_on("b"),
            spec("b"),
            spec("c"),
            spec("extra").with_dependency(DependencyRef::soft("a")).optional(),
        ]);
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::Parallel).unwrap();
        assert_eq!(plan.phases[0].nodes, vec![id("b"), id("c"), id("extra")]);
        assert_eq!(plan.phases[0].mode, PhaseMode::Parallel);
        assert_eq!(plan.phases[1].nodes, vec![id("a")]);
    }

    #[test]
    fn test_fatal_cycle_aborts_planning() {
        let g = graph(vec![
            spec("A").depends_on("B"),
            spec("B").depends_on("C"),
            spec("C").depends_on("A"),
        ]);
        let err = ResolutionPlanner::plan(&g, ResolutionStrategy::Topological).unwrap_err();
        assert_eq!(
            err,
            PlanningError::CircularDependency {
                cycle: vec![id("A"), id("B"), id("C")]
            }
        );
    }

    #[test]
    fn test_soft_cycle_is_planned() {
        let g = graph(vec![
            spec("a").with_dependency(DependencyRef::soft("b")),
            spec("b").with_dependency(DependencyRef::soft("a")),
            spec("c").depends_on("a"),
        ]);
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::Topological).unwrap();
        assert_eq!(plan.node_count(), 3);
        assert_eq!(plan.risk.tolerated_cycles, 1);
        assert_eq!(plan.risk.level, RiskLevel::Medium);
        assert_respects_order(&g, &plan);
    }

    #[test]
    fn test_peer_edges_do_not_order() {
        let g = graph(vec![
            spec("a").with_dependency(DependencyRef::peer("b")),
            spec("b"),
        ]);
        let plan = ResolutionPlanner::plan(&g, ResolutionStrategy::Topological).unwrap();
        assert_eq!(plan.phases.len(), 1);
    }

    #[test]
    fn test_undetected_hard_cycle_is_unorderable() {
        let g = DependencyGraph::from_specs(
            vec![spec("a").depends_on("b"), spec("b").depends_on("a")],
            ActivationContext::default(),
            false,
        );
        assert!(matches!(
            ResolutionPlanner::plan(&g, ResolutionStrategy::Topological),
            Err(PlanningError::Unorderable { .. })
        ));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "breadth-first".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::BreadthFirst
        );
        assert!("random".parse::<ResolutionStrategy>().is_err());
    }
}
