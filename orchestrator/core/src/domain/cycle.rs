// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cycle Detection
//!
//! Depth-first search with an explicit path stack. Revisiting a node that is
//! still on the stack emits the path suffix starting at that node as a cycle.
//! Cycles are reported in canonical rotation (smallest id first) and
//! de-duplicated.
//!
//! | Severity | Rule |
//! |----------|------|
//! | `critical` | any member has `criticality: critical` |
//! | `error` | any edge in the cycle blocks startup |
//! | `warning` | otherwise |
//!
//! A cycle is fatal iff it contains a blocking edge. A HARD dependency marked
//! `optional` does not block, so a cycle closed only by optional edges is a
//! tolerated warning. Detection never mutates node state; callers decide what
//! to do with a fatal cycle.

use crate::domain::component::{ComponentId, Criticality};
use crate::domain::graph::{DependencyGraph, Edge};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleSeverity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleResolution {
    /// Drop the cheapest edge of the cycle
    BreakWeakestLink { from: ComponentId, to: ComponentId },
    /// Defer loading of one member until first use
    LazyLoad { component: ComponentId },
    DecouplingProxy { between: (ComponentId, ComponentId) },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularDependency {
    pub cycle: Vec<ComponentId>,
    pub severity: CycleSeverity,
    pub fatal: bool,
    pub suggestions: Vec<CycleResolution>,
    pub detected_at: DateTime<Utc>,
}

impl CircularDependency {
    pub fn contains(&self, id: &ComponentId) -> bool {
        self.cycle.contains(id)
    }

    /// Consecutive member pairs, wrapping from the last member to the first.
    pub fn edges(&self) -> impl Iterator<Item = (&ComponentId, &ComponentId)> {
        let n = self.cycle.len();
        (0..n).map(move |i| (&self.cycle[i], &self.cycle[(i + 1) % n]))
    }

    pub fn contains_edge(&self, from: &ComponentId, to: &ComponentId) -> bool {
        self.edges().any(|(a, b)| a == from && b == to)
    }

    pub fn same_members(&self, other: &CircularDependency) -> bool {
        self.cycle == other.cycle
    }
}

pub fn display_path(path: &[ComponentId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub struct CycleDetector;

impl CycleDetector {
    pub fn detect(graph: &DependencyGraph) -> Vec<CircularDependency> {
        let mut search = Search {
            graph,
            visited: BTreeSet::new(),
            on_stack: BTreeSet::new(),
            path: Vec::new(),
            seen: BTreeSet::new(),
            found: Vec::new(),
        };

        for id in graph.node_ids() {
            if !search.visited.contains(id) {
                search.visit(id);
            }
        }

        search
            .found
            .into_iter()
            .map(|cycle| Self::classify(graph, cycle))
            .collect()
    }

    fn classify(graph: &DependencyGraph, cycle: Vec<ComponentId>) -> CircularDependency {
        let edges: Vec<&Edge> = (0..cycle.len())
            .filter_map(|i| graph.edge(&cycle[i], &cycle[(i + 1) % cycle.len()]))
            .collect();

        let fatal = edges.iter().any(|e| e.blocking);
        let has_critical = cycle.iter().any(|id| {
            graph
                .node(id)
                .is_some_and(|n| n.spec.metadata.criticality == Criticality::Critical)
        });
        let severity = if has_critical {
            CycleSeverity::Critical
        } else if fatal {
            CycleSeverity::Error
        } else {
            CycleSeverity::Warning
        };

        let suggestions = Self::suggest(graph, &cycle, &edges);

        CircularDependency {
            cycle,
            severity,
            fatal,
            suggestions,
            detected_at: Utc::now(),
        }
    }

    fn suggest(
        graph: &DependencyGraph,
        cycle: &[ComponentId],
        edges: &[&Edge],
    ) -> Vec<CycleResolution> {
        let priority = |id: &ComponentId| {
            graph
                .node(id)
                .map(|n| n.spec.metadata.priority)
                .unwrap_or_default()
        };

        // Non-blocking edges first, then the lowest-priority dependent.
        let weakest = edges
            .iter()
            .min_by(|a, b| {
                a.blocking
                    .cmp(&b.blocking)
                    .then_with(|| priority(&a.from).cmp(&priority(&b.from)))
                    .then_with(|| a.from.cmp(&b.from))
            })
            .copied();

        let mut suggestions = Vec::new();
        if let Some(edge) = weakest {
            suggestions.push(CycleResolution::BreakWeakestLink {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
            suggestions.push(CycleResolution::LazyLoad {
                component: edge.to.clone(),
            });
        }
        if cycle.len() >= 2 {
            suggestions.push(CycleResolution::DecouplingProxy {
                between: (cycle[0].clone(), cycle[1].clone()),
            });
        }
        suggestions
    }
}

struct Search<'g> {
    graph: &'g DependencyGraph,
    visited: BTreeSet<ComponentId>,
    on_stack: BTreeSet<ComponentId>,
    path: Vec<ComponentId>,
    seen: BTreeSet<Vec<ComponentId>>,
    found: Vec<Vec<ComponentId>>,
}

impl Search<'_> {
    fn visit(&mut self, id: &ComponentId) {
        self.visited.insert(id.clone());
        self.on_stack.insert(id.clone());
        self.path.push(id.clone());

        let dependencies: Vec<ComponentId> = self
            .graph
            .node(id)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default();

        for dependency in &dependencies {
            if self.on_stack.contains(dependency) {
                if let Some(start) = self.path.iter().position(|p| p == dependency) {
                    let cycle = canonical(&self.path[start..]);
                    if self.seen.insert(cycle.clone()) {
                        self.found.push(cycle);
                    }
                }
            } else if !self.visited.contains(dependency) {
                self.visit(dependency);
            }
        }

        self.path.pop();
        self.on_stack.remove(id);
    }
}

fn canonical(cycle: &[ComponentId]) -> Vec<ComponentId> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[start..].iter().chain(cycle[..start].iter()).cloned().collect()
}
