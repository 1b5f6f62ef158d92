// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hot-swap operation record.
//!
//! Stages always run in declaration order. The record keeps the original
//! config so a rollback can restore it exactly.

use crate::domain::component::{ComponentConfig, ComponentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotSwapId(Uuid);

impl HotSwapId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HotSwapId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HotSwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotSwapStage {
    Preparation,
    Validation,
    Swap,
    Verification,
}

impl HotSwapStage {
    pub const ORDER: [HotSwapStage; 4] = [
        HotSwapStage::Preparation,
        HotSwapStage::Validation,
        HotSwapStage::Swap,
        HotSwapStage::Verification,
    ];
}

impl fmt::Display for HotSwapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HotSwapStage::Preparation => "preparation",
            HotSwapStage::Validation => "validation",
            HotSwapStage::Swap => "swap",
            HotSwapStage::Verification => "verification",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub completed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotSwapStatus {
    InProgress,
    Completed,
    RolledBack,
    /// Rollback itself failed; the component was marked FAILED
    RollbackFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotSwapOperation {
    pub id: HotSwapId,
    pub component_id: ComponentId,
    pub original_config: ComponentConfig,
    pub new_config: ComponentConfig,
    pub current_stage: HotSwapStage,
    pub stages: BTreeMap<HotSwapStage, StageRecord>,
    pub status: HotSwapStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl HotSwapOperation {
    pub fn new(
        component_id: ComponentId,
        original_config: ComponentConfig,
        new_config: ComponentConfig,
    ) -> Self {
        Self {
            id: HotSwapId::new(),
            component_id,
            original_config,
            new_config,
            current_stage: HotSwapStage::Preparation,
            stages: HotSwapStage::ORDER
                .iter()
                .map(|s| (*s, StageRecord::default()))
                .collect(),
            status: HotSwapStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn begin_stage(&mut self, stage: HotSwapStage) {
        self.current_stage = stage;
        if let Some(record) = self.stages.get_mut(&stage) {
            record.started_at = Some(Utc::now());
        }
    }

    pub fn complete_stage(&mut self, stage: HotSwapStage) {
        if let Some(record) = self.stages.get_mut(&stage) {
            record.completed = true;
            record.completed_at = Some(Utc::now());
        }
    }

    pub fn fail_stage(&mut self, stage: HotSwapStage, error: impl Into<String>) {
        if let Some(record) = self.stages.get_mut(&stage) {
            record.error = Some(error.into());
        }
    }

    pub fn finish(&mut self, status: HotSwapStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.status != HotSwapStatus::InProgress
    }

    pub fn completed_stages(&self) -> Vec<HotSwapStage> {
        self.stages
            .iter()
            .filter(|(_, r)| r.completed)
            .map(|(s, _)| *s)
            .collect()
    }
}
