// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Fleet Core
//!
//! Supervisor for a fleet of interdependent components: dependency graph
//! analysis, ordered startup, health polling with tiered failure handling,
//! staged hot swap and ordered graceful shutdown.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library entry point; see [`application::FleetOrchestrator`]

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{FleetOrchestrator, FleetOrchestratorBuilder};
pub use domain::errors::{FleetError, FleetResult};
