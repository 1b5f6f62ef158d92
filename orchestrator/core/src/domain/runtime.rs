// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::{ComponentConfig, ComponentId, ComponentSpec};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to start component: {0}")]
    StartFailed(String),
    #[error("Failed to stop component: {0}")]
    StopFailed(String),
    #[error("Failed to drain connections: {0}")]
    DrainFailed(String),
    #[error("Cleanup task {task} failed: {reason}")]
    CleanupFailed { task: String, reason: String },
    #[error("Failed to stage replacement: {0}")]
    PrepareFailed(String),
    #[error("Cutover failed: {0}")]
    CutoverFailed(String),
    #[error("Rollback failed: {0}")]
    RollbackFailed(String),
    #[error("Component not found: {0}")]
    NotFound(ComponentId),
}

/// Side-effecting hooks the supervisor drives components through.
///
/// The transport behind these calls is owned by the implementation; the
/// supervisor only bounds each call with its own timeouts.
#[async_trait]
pub trait ComponentRuntime: Send + Sync {
    async fn start(&self, spec: &ComponentSpec, config: &ComponentConfig) -> Result<(), RuntimeError>;

    /// `force` skips any graceful handshake with the component.
    async fn stop(&self, id: &ComponentId, force: bool) -> Result<(), RuntimeError>;

    async fn drain(&self, _id: &ComponentId) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn run_cleanup(&self, _id: &ComponentId, _task: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Stage an instance running `config` next to the live one.
    async fn prepare_swap(&self, id: &ComponentId, config: &ComponentConfig) -> Result<(), RuntimeError>;

    /// Route traffic to the staged instance.
    async fn cutover(&self, id: &ComponentId, config: &ComponentConfig) -> Result<(), RuntimeError>;

    /// Restore the instance running `original`.
    async fn rollback(&self, id: &ComponentId, original: &ComponentConfig) -> Result<(), RuntimeError>;
}
