// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Component Lifecycle State Machine
//!
//! ## Transition Table
//! | From | To |
//! |------|----|
//! | `INITIALIZING` | `STARTING` |
//! | `STARTING` | `RUNNING` |
//! | `RUNNING` | `STOPPING`, `SWAPPING`, `SUSPENDED`, `MAINTENANCE` |
//! | `SWAPPING` | `RUNNING` |
//! | `STOPPING` | `STOPPED` |
//! | `STOPPED` | `STARTING` |
//! | `FAILED` | `STARTING`, `STOPPED` |
//! | `SUSPENDED` | `RUNNING` (resume), `STOPPING` |
//! | `MAINTENANCE` | `RUNNING`, `STOPPING` |
//! | any but `FAILED` | `FAILED` |
//!
//! `restart_count` is only ever incremented through `record_restart`; a
//! fresh component starts at zero.

use crate::domain::component::{ComponentConfig, ComponentId, ComponentSpec};
use crate::domain::health::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Maintenance,
    Swapping,
    Suspended,
}

impl LifecycleState {
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (*self, next) {
            (Failed, Failed) => false,
            (_, Failed) => true,
            (Initializing, Starting) => true,
            (Starting, Running) => true,
            (Running, Stopping | Swapping | Suspended | Maintenance) => true,
            (Swapping, Running) => true,
            (Stopping, Stopped) => true,
            (Stopped, Starting) => true,
            (Failed, Starting | Stopped) => true,
            (Suspended, Running | Stopping) => true,
            (Maintenance, Running | Stopping) => true,
            _ => false,
        }
    }

    /// States in which the component holds resources that a stop must release.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting
                | LifecycleState::Running
                | LifecycleState::Swapping
                | LifecycleState::Suspended
                | LifecycleState::Maintenance
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Failed => "FAILED",
            LifecycleState::Maintenance => "MAINTENANCE",
            LifecycleState::Swapping => "SWAPPING",
            LifecycleState::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition for {component}: {from} -> {to}")]
    InvalidTransition {
        component: ComponentId,
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Runtime view of a registered component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleComponent {
    pub spec: ComponentSpec,
    state: LifecycleState,
    pub health_status: HealthStatus,
    pub config: ComponentConfig,
    pub registered_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    restart_count: u32,
    pub hot_swap_capable: bool,
    pub dependencies: BTreeSet<ComponentId>,
    pub dependents: BTreeSet<ComponentId>,
    pub last_error: Option<String>,
    history: VecDeque<TransitionRecord>,
}

impl LifecycleComponent {
    pub fn new(spec: ComponentSpec) -> Self {
        let now = Utc::now();
        Self {
            config: spec.initial_config(),
            hot_swap_capable: spec.hot_swap_capable,
            dependencies: spec
                .declared_dependencies()
                .into_iter()
                .map(|d| d.id)
                .collect(),
            dependents: BTreeSet::new(),
            spec,
            state: LifecycleState::Initializing,
            health_status: HealthStatus::Unknown,
            registered_at: now,
            state_changed_at: now,
            started_at: None,
            stopped_at: None,
            restart_count: 0,
            last_error: None,
            history: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.spec.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    /// Apply a transition from the table, returning the previous state.
    pub fn transition_to(
        &mut self,
        next: LifecycleState,
        reason: Option<String>,
    ) -> Result<LifecycleState, LifecycleError> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                component: self.spec.id.clone(),
                from: previous,
                to: next,
            });
        }

        let now = Utc::now();
        self.state = next;
        self.state_changed_at = now;
        match next {
            LifecycleState::Running if previous == LifecycleState::Starting => {
                self.started_at = Some(now);
                self.last_error = None;
            }
            LifecycleState::Stopped => self.stopped_at = Some(now),
            LifecycleState::Failed => {
                if let Some(reason) = &reason {
                    self.last_error = Some(reason.clone());
                }
            }
            _ => {}
        }

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            from: previous,
            to: next,
            at: now,
            reason,
        });
        Ok(previous)
    }

    pub fn record_restart(&mut self) -> u32 {
        self.restart_count += 1;
        self.restart_count
    }
}
