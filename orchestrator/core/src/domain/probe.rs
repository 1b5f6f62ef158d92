// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::ComponentId;
use crate::domain::health::HealthMetrics;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("Component unreachable: {0}")]
    Unreachable(String),
    #[error("Probe failed: {0}")]
    Failed(String),
}

/// Liveness and metrics probe for a single component.
///
/// Callers bound both calls with their configured timeouts, so
/// implementations may block for as long as the transport needs.
#[async_trait]
pub trait Probe: Send + Sync {
    /// `Ok(false)` is an explicit negative answer; `Err` means no answer.
    async fn heartbeat(&self, id: &ComponentId) -> Result<bool, ProbeError>;

    async fn health_check(&self, id: &ComponentId) -> Result<HealthMetrics, ProbeError>;
}
