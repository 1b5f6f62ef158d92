// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use aegis_fleet_core::domain::config::FleetManifest;

use super::load_manifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective supervision configuration, defaults filled in
    Show,

    /// Validate a manifest without building its dependency graph
    Validate {
        /// Path to manifest (default: --manifest)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a sample manifest
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./fleet.yaml")]
        output: PathBuf,

        /// Include every config section with comments
        #[arg(long)]
        examples: bool,
    },
}

pub fn handle_command(command: ConfigCommand, manifest_path: &Path) -> Result<()> {
    match command {
        ConfigCommand::Show => show(manifest_path),
        ConfigCommand::Validate { file } => {
            validate(file.as_deref().unwrap_or(manifest_path))
        }
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(manifest_path: &Path) -> Result<()> {
    let manifest = load_manifest(manifest_path)?;
    let config = &manifest.spec.config;

    println!("{} {}", "Fleet:".bold(), manifest.metadata.name);
    println!(
        "  Heartbeat: every {:?}, timeout {:?}, {} misses",
        config.heartbeat.interval, config.heartbeat.timeout, config.heartbeat.retry_attempts
    );
    println!(
        "  Health check: every {:?}, fail after {}, recover after {}",
        config.health_check.interval,
        config.health_check.failure_threshold,
        config.health_check.success_threshold
    );
    println!(
        "  Resolution: {} (depth {}, {} retries)",
        config.dependency.resolution_strategy,
        config.dependency.max_dependency_depth,
        config.dependency.retry_attempts
    );
    println!(
        "  Shutdown: graceful {:?}, force {:?}",
        config.shutdown.graceful_timeout, config.shutdown.force_timeout
    );
    println!();

    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    println!("{}", yaml);
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    println!("Validating manifest...");

    let manifest = FleetManifest::from_yaml_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    manifest.validate().context("Manifest validation failed")?;

    println!(
        "{}",
        format!(
            "✓ Manifest is valid ({} components)",
            manifest.spec.components.len()
        )
        .green()
    );
    Ok(())
}

fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/fleet-with-examples.yaml")
    } else {
        include_str!("../../templates/fleet-minimal.yaml")
    };

    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write manifest to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Manifest generated: {}", output.display()).green()
    );
    Ok(())
}
