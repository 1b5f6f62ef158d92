// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Fleet CLI
//!
//! The `aegis-fleet` binary inspects fleet manifests offline: it validates
//! the dependency graph, reports circular dependencies and prints the
//! startup plans the supervisor would execute.
//!
//! ## Commands
//!
//! - `aegis-fleet check` - Validate a manifest and its dependency graph
//! - `aegis-fleet plan [--component ID] [--strategy S]` - Print a startup plan
//! - `aegis-fleet order ID [--shutdown]` - Print a startup or shutdown order
//! - `aegis-fleet config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use aegis_fleet_core::domain::component::ComponentId;
use aegis_fleet_core::domain::planning::ResolutionStrategy;

mod commands;

use commands::ConfigCommand;

/// AEGIS Fleet - Inspect component fleet manifests
#[derive(Parser)]
#[command(name = "aegis-fleet")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the fleet manifest
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_FLEET_MANIFEST",
        value_name = "FILE",
        default_value = "./fleet.yaml"
    )]
    manifest: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest and report cycles and missing dependencies
    #[command(name = "check")]
    Check {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the phased startup plan
    #[command(name = "plan")]
    Plan {
        /// Plan only this component and its dependencies
        #[arg(long, value_name = "ID")]
        component: Option<String>,

        /// Override the manifest's resolution strategy
        #[arg(long)]
        strategy: Option<ResolutionStrategy>,

        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the order a component and its dependencies start in
    #[command(name = "order")]
    Order {
        #[arg(value_name = "ID")]
        component: String,

        /// Print the stop order instead
        #[arg(long)]
        shutdown: bool,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;
    debug!(manifest = %cli.manifest.display(), "Using fleet manifest");

    match cli.command {
        Some(Commands::Check { json }) => commands::check::handle_command(&cli.manifest, json),
        Some(Commands::Plan {
            component,
            strategy,
            json,
        }) => commands::plan::plan(
            &cli.manifest,
            component.map(ComponentId::from),
            strategy,
            json,
        ),
        Some(Commands::Order {
            component,
            shutdown,
        }) => commands::plan::order(&cli.manifest, ComponentId::from(component), shutdown),
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, &cli.manifest)
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
