// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Failure Detector
//!
//! Turns the signals gathered by the health monitor into at most one
//! remediation per evaluation. When several tiers fire together, the
//! highest-priority tier wins and the rest are only logged.
//!
//! Remediation never bypasses the lifecycle controller: restarts, isolation
//! and failure marks all go through its API, and replacement goes through
//! the hot-swap coordinator.

use crate::application::hot_swap::HotSwapCoordinator;
use crate::application::lifecycle::LifecycleController;
use crate::domain::component::ComponentId;
use crate::domain::errors::FleetError;
use crate::domain::events::{FleetEvent, FleetEventKind};
use crate::domain::failure::{FailureAction, FailureDetectionConfig, FailureSignals, FailureTier, TierTrigger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What was done about one detected failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub component_id: ComponentId,
    /// `None` when the action came from the circuit breaker
    pub tier: Option<FailureTier>,
    pub action: FailureAction,
    pub applied: bool,
    pub error: Option<String>,
}

pub struct FailureDetector {
    config: FailureDetectionConfig,
    controller: Arc<LifecycleController>,
    hot_swap: Arc<HotSwapCoordinator>,
    last_escalation: Mutex<HashMap<(ComponentId, Option<FailureTier>), Instant>>,
}

impl FailureDetector {
    pub fn new(
        config: FailureDetectionConfig,
        controller: Arc<LifecycleController>,
        hot_swap: Arc<HotSwapCoordinator>,
    ) -> Self {
        Self {
            config,
            controller,
            hot_swap,
            last_escalation: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FailureDetectionConfig {
        &self.config
    }

    /// Highest-priority tier that fires for `signals`, if any.
    pub fn evaluate(&self, id: &ComponentId, signals: &FailureSignals) -> Option<TierTrigger> {
        let mut triggers = self.config.evaluate(signals).into_iter();
        let winner = triggers.next()?;
        for suppressed in triggers {
            debug!(
                component_id = %id,
                tier = %suppressed.tier,
                winner = %winner.tier,
                "Lower-priority tier suppressed"
            );
        }
        Some(winner)
    }

    /// Evaluate and act on the winning tier.
    pub async fn detect(&self, id: &ComponentId, signals: &FailureSignals) -> Option<FailureResponse> {
        let trigger = self.evaluate(id, signals)?;
        metrics::counter!(
            "aegis_fleet_failures_detected_total",
            "tier" => trigger.tier.as_str()
        )
        .increment(1);
        warn!(
            component_id = %id,
            tier = %trigger.tier,
            action = %trigger.action,
            observed = trigger.observed,
            threshold = trigger.threshold,
            "Failure detected"
        );
        self.controller.event_bus().publish(
            FleetEvent::component(FleetEventKind::FailureDetected, id).with_payload(json!({
                "tier": trigger.tier,
                "action": trigger.action,
                "observed": trigger.observed,
                "threshold": trigger.threshold,
            })),
        );

        let reason = format!(
            "{} tier fired ({} against threshold {})",
            trigger.tier, trigger.observed, trigger.threshold
        );
        Some(
            self.apply(id, Some(trigger.tier), trigger.action, &reason)
                .await,
        )
    }

    /// Run the breaker's configured action once, when it opens.
    pub async fn on_circuit_opened(&self, id: &ComponentId) -> FailureResponse {
        let action = self.config.circuit_breaker.open_action;
        warn!(component_id = %id, action = %action, "Circuit opened");
        self.controller.event_bus().publish(
            FleetEvent::component(FleetEventKind::CircuitOpened, id)
                .with_payload(json!({ "action": action })),
        );
        self.apply(id, None, action, "circuit breaker opened").await
    }

    pub async fn apply(
        &self,
        id: &ComponentId,
        tier: Option<FailureTier>,
        action: FailureAction,
        reason: &str,
    ) -> FailureResponse {
        let result: Result<bool, FleetError> = match action {
            FailureAction::Restart => self.controller.restart(id, reason).await.map(|_| true),
            FailureAction::Replace => self.replace(id, reason).await.map(|_| true),
            FailureAction::Isolate => self.controller.isolate(id, reason).map(|_| true),
            FailureAction::Escalate => Ok(self.escalate(id, tier, reason)),
            FailureAction::Ignore => {
                debug!(component_id = %id, reason, "Failure ignored by configuration");
                Ok(false)
            }
        };

        match result {
            Ok(applied) => FailureResponse {
                component_id: id.clone(),
                tier,
                action,
                applied,
                error: None,
            },
            Err(FleetError::OperationInProgress(_)) => {
                debug!(component_id = %id, action = %action, "Another operation owns the component, skipping");
                FailureResponse {
                    component_id: id.clone(),
                    tier,
                    action,
                    applied: false,
                    error: None,
                }
            }
            Err(e) => {
                error!(component_id = %id, action = %action, "Failure action failed: {}", e);
                // Remediation that could not be applied is escalated instead
                self.escalate(id, tier, &format!("{} failed: {}", action, e));
                FailureResponse {
                    component_id: id.clone(),
                    tier,
                    action,
                    applied: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Hot swap onto the current config when possible, otherwise restart.
    async fn replace(&self, id: &ComponentId, reason: &str) -> Result<(), FleetError> {
        let component = self
            .controller
            .get(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
        if component.hot_swap_capable {
            info!(component_id = %id, "Replacing component in place");
            self.hot_swap.swap(id, component.config.clone()).await?;
        } else {
            self.controller.restart(id, reason).await?;
        }
        Ok(())
    }

    /// Publish a critical event unless this tier escalated for `id` within
    /// its escalation window. Returns whether an event went out.
    pub fn escalate(&self, id: &ComponentId, tier: Option<FailureTier>, reason: &str) -> bool {
        let window = match tier {
            Some(tier) => self.config.tier(tier).escalation_time,
            None => Duration::ZERO,
        };
        let now = Instant::now();
        {
            let mut last = self.last_escalation.lock();
            let key = (id.clone(), tier);
            if let Some(at) = last.get(&key) {
                if now.duration_since(*at) < window {
                    debug!(component_id = %id, "Escalation suppressed inside window");
                    return false;
                }
            }
            last.insert(key, now);
        }

        error!(component_id = %id, tier = ?tier, "Escalating failure: {}", reason);
        self.controller.event_bus().publish(
            FleetEvent::component(FleetEventKind::FailureEscalated, id).with_payload(json!({
                "tier": tier,
                "reason": reason,
            })),
        );
        true
    }

    pub fn forget(&self, id: &ComponentId) {
        self.last_escalation.lock().retain(|(c, _), _| c != id);
    }
}
