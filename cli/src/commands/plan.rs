// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `plan` and `order`: startup plans computed offline from a manifest

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use aegis_fleet_core::domain::component::ComponentId;
use aegis_fleet_core::domain::planning::{
    PhaseMode, ResolutionPlan, ResolutionPlanner, ResolutionStrategy, RiskLevel,
};

use super::{build_graph, load_manifest};

pub fn plan(
    manifest_path: &Path,
    component: Option<ComponentId>,
    strategy: Option<ResolutionStrategy>,
    json: bool,
) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let strategy = strategy.unwrap_or(manifest.spec.config.dependency.resolution_strategy);
    let graph = build_graph(&manifest, component.as_ref())?;
    let plan = ResolutionPlanner::plan(&graph, strategy).context("Failed to plan startup")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);
    Ok(())
}

/// Startup order for `component` and its dependencies; reversed for shutdown.
pub fn order(manifest_path: &Path, component: ComponentId, shutdown: bool) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let graph = build_graph(&manifest, Some(&component))?;
    let plan = ResolutionPlanner::plan(&graph, ResolutionStrategy::Topological)
        .with_context(|| format!("No startup order exists for {}", component))?;

    let mut ordered = plan.ordered_nodes();
    if shutdown {
        ordered.reverse();
    }
    for (position, id) in ordered.iter().enumerate() {
        if id == &component {
            println!("{:>3}. {}", position + 1, id.as_str().bold());
        } else {
            println!("{:>3}. {}", position + 1, id);
        }
    }
    Ok(())
}

fn print_plan(plan: &ResolutionPlan) {
    println!(
        "{} {} ({} components, {} phases)",
        "Strategy:".bold(),
        plan.strategy,
        plan.node_count(),
        plan.phases.len()
    );
    println!();

    for phase in &plan.phases {
        let mode = match phase.mode {
            PhaseMode::Parallel => "parallel".cyan(),
            PhaseMode::Sequential => "sequential".normal(),
        };
        let after = if phase.depends_on.is_empty() {
            String::new()
        } else {
            let indices: Vec<String> = phase.depends_on.iter().map(|i| i.to_string()).collect();
            format!(" after {}", indices.join(", "))
        };
        println!("  Phase {} [{}]{}", phase.index, mode, after.dimmed());
        for id in &phase.nodes {
            println!("    - {}", id);
        }
    }
    println!();

    let level = match plan.risk.level {
        RiskLevel::Low => "low".green(),
        RiskLevel::Medium => "medium".yellow(),
        RiskLevel::High => "high".red(),
        RiskLevel::Critical => "critical".red().bold(),
    };
    println!("{} {}", "Risk:".bold(), level);
    if !plan.risk.critical_components.is_empty() {
        let critical: Vec<&str> = plan
            .risk
            .critical_components
            .iter()
            .map(|id| id.as_str())
            .collect();
        println!("  Critical components: {}", critical.join(", "));
    }
    for note in &plan.risk.notes {
        println!("  - {}", note);
    }
}
