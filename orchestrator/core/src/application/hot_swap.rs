// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hot Swap Coordinator
//!
//! Replaces the live configuration of a RUNNING, hot-swap capable component
//! in four timed stages: preparation, validation, swap, verification.
//!
//! Any stage that errors or overruns its timeout rolls the component back to
//! the exact config it had before the call. When `swap` returns, the
//! component is never in SWAPPING: it is RUNNING, or FAILED if the rollback
//! itself could not be applied.

use crate::application::lifecycle::LifecycleController;
use crate::domain::component::{ComponentConfig, ComponentId};
use crate::domain::config::HotSwapConfig;
use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::events::{FleetEvent, FleetEventKind};
use crate::domain::health::{HealthStatus, HealthThresholds};
use crate::domain::hot_swap::{HotSwapId, HotSwapOperation, HotSwapStage, HotSwapStatus};
use crate::domain::lifecycle::LifecycleState;
use crate::domain::probe::Probe;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct HotSwapCoordinator {
    controller: Arc<LifecycleController>,
    probe: Arc<dyn Probe>,
    config: HotSwapConfig,
    thresholds: HealthThresholds,
    operations: RwLock<BTreeMap<HotSwapId, HotSwapOperation>>,
}

impl HotSwapCoordinator {
    pub fn new(
        controller: Arc<LifecycleController>,
        probe: Arc<dyn Probe>,
        config: HotSwapConfig,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            controller,
            probe,
            config,
            thresholds,
            operations: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn operation(&self, id: &HotSwapId) -> Option<HotSwapOperation> {
        self.operations.read().get(id).cloned()
    }

    pub fn operations(&self) -> Vec<HotSwapOperation> {
        self.operations.read().values().cloned().collect()
    }

    pub fn in_progress(&self) -> Vec<HotSwapOperation> {
        self.operations
            .read()
            .values()
            .filter(|op| !op.is_finished())
            .cloned()
            .collect()
    }

    /// Drop finished records older than `ttl`. Returns how many were removed.
    pub fn prune_finished(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut operations = self.operations.write();
        let before = operations.len();
        operations.retain(|_, op| match op.finished_at {
            Some(at) => (now - at).to_std().map_or(true, |age| age < ttl),
            None => true,
        });
        before - operations.len()
    }

    fn store(&self, op: &HotSwapOperation) {
        self.operations.write().insert(op.id, op.clone());
    }

    pub async fn swap(
        &self,
        id: &ComponentId,
        new_config: ComponentConfig,
    ) -> FleetResult<HotSwapOperation> {
        let _guard = self.controller.begin_operation(id)?;
        let component = self
            .controller
            .get(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
        if !component.hot_swap_capable {
            return Err(FleetError::NotHotSwapCapable(id.clone()));
        }

        let original = component.config.clone();
        self.controller
            .transition(id, LifecycleState::Swapping, Some("hot swap".to_string()))?;

        let mut op = HotSwapOperation::new(id.clone(), original.clone(), new_config.clone());
        self.store(&op);
        info!(
            component_id = %id,
            operation_id = %op.id,
            from = %original.version,
            to = %new_config.version,
            "Hot swap started"
        );
        self.controller.event_bus().publish(
            FleetEvent::component(FleetEventKind::HotSwapStarted, id).with_payload(json!({
                "operation_id": op.id,
                "from_version": original.version.to_string(),
                "to_version": new_config.version.to_string(),
            })),
        );

        match self.run_stages(&mut op, &new_config).await {
            Ok(()) => {
                self.controller
                    .transition(id, LifecycleState::Running, Some("hot swap completed".to_string()))?;
                op.finish(HotSwapStatus::Completed);
                self.store(&op);
                metrics::counter!("aegis_fleet_hot_swaps_total", "outcome" => "completed")
                    .increment(1);
                info!(component_id = %id, operation_id = %op.id, "Hot swap completed");
                self.controller.event_bus().publish(
                    FleetEvent::component(FleetEventKind::HotSwapCompleted, id).with_payload(
                        json!({
                            "operation_id": op.id,
                            "version": new_config.version.to_string(),
                        }),
                    ),
                );
                Ok(op)
            }
            Err((stage, reason)) => {
                let status = self.roll_back(&mut op, &original).await;
                op.finish(status);
                self.store(&op);
                let outcome = match status {
                    HotSwapStatus::RolledBack => "rolled_back",
                    _ => "rollback_failed",
                };
                metrics::counter!("aegis_fleet_hot_swaps_total", "outcome" => outcome).increment(1);
                self.controller.event_bus().publish(
                    FleetEvent::component(FleetEventKind::HotSwapFailed, id).with_payload(json!({
                        "operation_id": op.id,
                        "stage": stage,
                        "reason": reason,
                        "status": status,
                    })),
                );
                Err(FleetError::HotSwapFailure {
                    component: id.clone(),
                    stage,
                    reason,
                })
            }
        }
    }

    async fn run_stages(
        &self,
        op: &mut HotSwapOperation,
        new_config: &ComponentConfig,
    ) -> Result<(), (HotSwapStage, String)> {
        let id = op.component_id.clone();
        let runtime = self.controller.runtime().clone();

        self.stage(op, HotSwapStage::Preparation, self.config.preparation_timeout, async {
            new_config.validate().map_err(|e| e.to_string())?;
            runtime
                .prepare_swap(&id, new_config)
                .await
                .map_err(|e| e.to_string())
        })
        .await?;

        self.stage(op, HotSwapStage::Validation, self.config.validation_timeout, async {
            if self.config.compatibility_check {
                self.check_compatibility(&id, new_config)
            } else {
                Ok(())
            }
        })
        .await?;

        self.stage(op, HotSwapStage::Swap, self.config.swap_timeout, async {
            runtime
                .cutover(&id, new_config)
                .await
                .map_err(|e| e.to_string())?;
            self.controller
                .set_config(&id, new_config.clone())
                .map_err(|e| e.to_string())
        })
        .await?;

        let delay = self.config.health_check_delay;
        self.stage(op, HotSwapStage::Verification, delay, async {
            let metrics = self
                .probe
                .health_check(&id)
                .await
                .map_err(|e| e.to_string())?;
            match self.thresholds.evaluate(&metrics) {
                HealthStatus::Healthy => {
                    self.controller.set_health(&id, HealthStatus::Healthy);
                    Ok(())
                }
                status => Err(format!("post-swap health is {}", status)),
            }
        })
        .await?;

        Ok(())
    }

    async fn stage<F>(
        &self,
        op: &mut HotSwapOperation,
        stage: HotSwapStage,
        limit: Duration,
        work: F,
    ) -> Result<(), (HotSwapStage, String)>
    where
        F: Future<Output = Result<(), String>>,
    {
        op.begin_stage(stage);
        self.store(op);
        debug!(component_id = %op.component_id, stage = %stage, "Hot swap stage started");

        let result = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(format!("{} stage timed out after {:?}", stage, limit)),
        };
        match result {
            Ok(()) => {
                op.complete_stage(stage);
                self.store(op);
                Ok(())
            }
            Err(reason) => {
                warn!(
                    component_id = %op.component_id,
                    stage = %stage,
                    "Hot swap stage failed: {}",
                    reason
                );
                op.fail_stage(stage, reason.clone());
                self.store(op);
                Err((stage, reason))
            }
        }
    }

    /// Constraints of the component itself plus every dependent's version
    /// requirement on it.
    fn check_compatibility(&self, id: &ComponentId, new_config: &ComponentConfig) -> Result<(), String> {
        let component = self
            .controller
            .get(id)
            .ok_or_else(|| format!("{} is no longer registered", id))?;
        component
            .spec
            .check_constraints(new_config, &self.controller.config().activation)
            .map_err(|e| e.to_string())?;

        let graph = self.controller.graph();
        for dependent in &component.dependents {
            if let Some(requirement) = graph
                .edge(dependent, id)
                .and_then(|e| e.version_requirement.as_ref())
            {
                if !requirement.matches(&new_config.version) {
                    return Err(format!(
                        "dependent {} requires {} {}, new version is {}",
                        dependent, id, requirement, new_config.version
                    ));
                }
            }
        }
        Ok(())
    }

    async fn roll_back(&self, op: &mut HotSwapOperation, original: &ComponentConfig) -> HotSwapStatus {
        let id = op.component_id.clone();
        let limit = self.config.rollback_timeout;
        warn!(component_id = %id, operation_id = %op.id, "Rolling back hot swap");

        let restored = match tokio::time::timeout(
            limit,
            self.controller.runtime().rollback(&id, original),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("rollback timed out after {:?}", limit)),
        };

        // The recorded config always returns to the original
        if let Err(e) = self.controller.set_config(&id, original.clone()) {
            error!(component_id = %id, "Failed to restore config: {}", e);
        }

        match restored {
            Ok(()) => {
                if let Err(e) = self.controller.transition(
                    &id,
                    LifecycleState::Running,
                    Some("hot swap rolled back".to_string()),
                ) {
                    error!(component_id = %id, "Failed to leave SWAPPING after rollback: {}", e);
                }
                info!(component_id = %id, "Hot swap rolled back");
                HotSwapStatus::RolledBack
            }
            Err(reason) => {
                error!(component_id = %id, "Hot swap rollback failed: {}", reason);
                if let Err(e) = self
                    .controller
                    .mark_failed(&id, format!("hot swap rollback failed: {}", reason))
                {
                    error!(component_id = %id, "Failed to mark component failed: {}", e);
                }
                HotSwapStatus::RollbackFailed
            }
        }
    }
}
