// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Async services that drive the domain model: resolution, lifecycle
//! control, health monitoring, failure handling, hot swap, shutdown and the
//! [`FleetOrchestrator`] facade that ties them together.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates domain types through the runtime and probe collaborators

pub mod failure_detector;
pub mod fleet;
pub mod health_monitor;
pub mod hot_swap;
pub mod lifecycle;
pub mod resolution;
pub mod shutdown;

// Re-export the facade for convenience
pub use fleet::{FleetOrchestrator, FleetOrchestratorBuilder, SupervisionReport};
pub use resolution::{ResolutionExecutor, ResolutionResult};
pub use shutdown::{ComponentStopReport, ShutdownReport, StopMode};
