// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::{ComponentConfig, ComponentId};
use crate::domain::lifecycle::LifecycleState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State captured before a graceful stop when `shutdown.save_state` is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub component_id: ComponentId,
    pub state: LifecycleState,
    pub config: ComponentConfig,
    pub restart_count: u32,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot storage failed: {0}")]
    Storage(String),
}

/// Opaque persistence hook. The storage format belongs to the implementation.
#[async_trait]
pub trait StateSnapshotter: Send + Sync {
    async fn save(&self, snapshot: StateSnapshot) -> Result<(), SnapshotError>;

    async fn latest(&self, id: &ComponentId) -> Result<Option<StateSnapshot>, SnapshotError>;
}
