// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::ComponentId;
use crate::domain::snapshot::{SnapshotError, StateSnapshot, StateSnapshotter};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps the most recent snapshot per component in memory.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<ComponentId, StateSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl StateSnapshotter for InMemorySnapshotStore {
    async fn save(&self, snapshot: StateSnapshot) -> Result<(), SnapshotError> {
        self.snapshots
            .write()
            .insert(snapshot.component_id.clone(), snapshot);
        Ok(())
    }

    async fn latest(&self, id: &ComponentId) -> Result<Option<StateSnapshot>, SnapshotError> {
        Ok(self.snapshots.read().get(id).cloned())
    }
}
