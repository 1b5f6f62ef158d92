// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::{ComponentId, SpecError};
use crate::domain::config::ConfigError;
use crate::domain::cycle::display_path;
use crate::domain::graph::GraphError;
use crate::domain::hot_swap::HotSwapStage;
use crate::domain::lifecycle::{LifecycleError, LifecycleState};
use crate::domain::planning::PlanningError;
use std::time::Duration;

/// Errors surfaced by the fleet supervisor's public API.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Circular dependency: {}", display_path(.cycle))]
    CircularDependency { cycle: Vec<ComponentId> },

    #[error("Resolution timed out after {0:?}")]
    ResolutionTimeout(Duration),

    #[error("Failed to resolve {component}: {reason}")]
    ResolutionFailure { component: ComponentId, reason: String },

    #[error("Heartbeat timed out for {component} after {attempts} attempt(s)")]
    HeartbeatTimeout { component: ComponentId, attempts: u32 },

    #[error("Health check failed for {component}: {reason}")]
    HealthCheckFailure { component: ComponentId, reason: String },

    /// The component was rolled back before this error was returned
    #[error("Hot swap of {component} failed at {stage}: {reason}")]
    HotSwapFailure {
        component: ComponentId,
        stage: HotSwapStage,
        reason: String,
    },

    #[error("Shutdown of {component} timed out after {timeout:?}")]
    ShutdownTimeout { component: ComponentId, timeout: Duration },

    #[error("Runtime call for {component} failed: {reason}")]
    Runtime { component: ComponentId, reason: String },

    #[error("Component not found: {0}")]
    ComponentNotFound(ComponentId),

    #[error("Component already registered: {0}")]
    AlreadyRegistered(ComponentId),

    #[error("Component {component} is {state}; stop it first")]
    ComponentActive {
        component: ComponentId,
        state: LifecycleState,
    },

    #[error(transparent)]
    InvalidTransition(#[from] LifecycleError),

    #[error("Component {0} is not hot-swap capable")]
    NotHotSwapCapable(ComponentId),

    #[error("Another operation is already in progress for {0}")]
    OperationInProgress(ComponentId),

    #[error("Fleet is shutting down")]
    ShuttingDown,
}

impl From<SpecError> for FleetError {
    fn from(e: SpecError) -> Self {
        FleetError::Configuration(e.to_string())
    }
}

impl From<ConfigError> for FleetError {
    fn from(e: ConfigError) -> Self {
        FleetError::Configuration(e.to_string())
    }
}

impl From<PlanningError> for FleetError {
    fn from(e: PlanningError) -> Self {
        match e {
            PlanningError::CircularDependency { cycle } => FleetError::CircularDependency { cycle },
            PlanningError::Unorderable { remaining } => FleetError::Configuration(format!(
                "no valid start order for {}",
                display_path(&remaining)
            )),
        }
    }
}

impl From<GraphError> for FleetError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::CircularDependency { cycle } => FleetError::CircularDependency { cycle },
            GraphError::UnknownComponent(id) => FleetError::ComponentNotFound(id),
            GraphError::MissingDependency { from, to } => FleetError::ResolutionFailure {
                component: from,
                reason: format!("hard dependency {} is not registered", to),
            },
            other @ GraphError::IncompatibleVersion { .. } => {
                FleetError::Configuration(other.to_string())
            }
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
