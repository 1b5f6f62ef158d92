// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `check`: structural validation of a fleet manifest

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;

use aegis_fleet_core::domain::cycle::{display_path, CycleResolution, CycleSeverity};
use aegis_fleet_core::domain::graph::DependencyGraph;

use super::{build_graph, load_manifest};

pub fn handle_command(manifest_path: &Path, json: bool) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let graph = build_graph(&manifest, None)?;
    let verdict = graph.validate();

    if json {
        let report = serde_json::json!({
            "fleet": manifest.metadata.name,
            "metrics": graph.metrics(),
            "cycles": graph.cycles(),
            "missing": graph.missing(),
            "version_violations": graph.version_violations(),
            "valid": verdict.is_ok(),
            "error": verdict.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&manifest.metadata.name, &graph);
    }

    if let Err(e) = verdict {
        bail!("Fleet {} cannot be started: {}", manifest.metadata.name, e);
    }
    if !json {
        println!("{}", "✓ Fleet manifest is valid".green());
    }
    Ok(())
}

fn print_report(name: &str, graph: &DependencyGraph) {
    let metrics = graph.metrics();
    println!("{} {}", "Fleet:".bold(), name);
    println!(
        "  Components: {}  Edges: {}  Max depth: {}",
        metrics.total_nodes, metrics.total_edges, metrics.max_depth
    );
    println!();

    if graph.cycles().is_empty() {
        println!("{}", "No circular dependencies".dimmed());
    } else {
        println!("{}", "Circular dependencies:".bold());
        for cycle in graph.cycles() {
            let severity = match cycle.severity {
                CycleSeverity::Warning => "warning".yellow(),
                CycleSeverity::Error => "error".red(),
                CycleSeverity::Critical => "critical".red().bold(),
            };
            println!("  [{}] {}", severity, display_path(&cycle.cycle));
            for suggestion in &cycle.suggestions {
                println!("      - {}", describe(suggestion));
            }
        }
    }

    for missing in graph.missing() {
        let line = format!(
            "  {} -> {} ({}) is not declared",
            missing.from,
            missing.to,
            missing.dependency_type.as_str()
        );
        if missing.tolerated {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line.red());
        }
    }

    for edge in graph.version_violations() {
        let requirement = edge
            .version_requirement
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_default();
        let found = graph
            .node(&edge.to)
            .map(|n| n.spec.version.to_string())
            .unwrap_or_default();
        println!(
            "  {}",
            format!(
                "{} requires {} {}, manifest declares {}",
                edge.from, edge.to, requirement, found
            )
            .yellow()
        );
    }

    if !graph.truncated().is_empty() {
        println!(
            "  {}",
            format!("{} component(s) beyond the depth bound", graph.truncated().len()).yellow()
        );
    }
    println!();
}

fn describe(suggestion: &CycleResolution) -> String {
    match suggestion {
        CycleResolution::BreakWeakestLink { from, to } => {
            format!("break the {} -> {} edge", from, to)
        }
        CycleResolution::LazyLoad { component } => format!("lazy-load {}", component),
        CycleResolution::DecouplingProxy { between } => {
            format!("introduce a proxy between {} and {}", between.0, between.1)
        }
    }
}
