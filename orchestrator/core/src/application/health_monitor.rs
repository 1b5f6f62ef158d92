// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Health Monitor
//!
//! Two polling tasks per watched component: a cheap heartbeat on a short
//! interval and a metrics health check on a longer one. Both feed the same
//! per-component tracker, and every round ends with one failure evaluation.
//!
//! Evaluations for a component are serialized by an async lock held across
//! remediation, and counters are reset before the lock is released, so two
//! overlapping ticks can never restart the same component twice.
//!
//! Only RUNNING components are probed. Maintenance, swapping and isolated
//! components keep their tracker but are skipped.

use crate::application::failure_detector::{FailureDetector, FailureResponse};
use crate::application::lifecycle::LifecycleController;
use crate::domain::component::ComponentId;
use crate::domain::config::{FleetConfig, HealthCheckConfig, HeartbeatConfig};
use crate::domain::events::{FleetEvent, FleetEventKind};
use crate::domain::failure::{
    CircuitBreaker, CircuitBreakerConfig, CircuitTransition, FailureAction, FailureSignals,
    FailureTier,
};
use crate::domain::health::{ComponentHealth, HealthMetrics, HealthStatus, HealthThresholds, SystemHealth};
use crate::domain::lifecycle::LifecycleState;
use crate::domain::probe::Probe;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct TrackerState {
    heartbeat_failures: u32,
    first_missed_at: Option<Instant>,
    heartbeat_escalated: bool,
    health_failures: u32,
    health_successes: u32,
    last_heartbeat: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    metrics: Option<HealthMetrics>,
    metrics_status: HealthStatus,
    breaker: CircuitBreaker,
}

impl TrackerState {
    fn new(breaker: CircuitBreakerConfig) -> Self {
        Self {
            heartbeat_failures: 0,
            first_missed_at: None,
            heartbeat_escalated: false,
            health_failures: 0,
            health_successes: 0,
            last_heartbeat: None,
            last_health_check: None,
            metrics: None,
            metrics_status: HealthStatus::Unknown,
            breaker: CircuitBreaker::new(breaker),
        }
    }
}

struct ComponentTracker {
    state: Mutex<TrackerState>,
    evaluation: tokio::sync::Mutex<()>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct HealthMonitor {
    controller: Arc<LifecycleController>,
    probe: Arc<dyn Probe>,
    detector: Arc<FailureDetector>,
    heartbeat: HeartbeatConfig,
    health_check: HealthCheckConfig,
    thresholds: HealthThresholds,
    breaker: CircuitBreakerConfig,
    trackers: RwLock<HashMap<ComponentId, Arc<ComponentTracker>>>,
    shutdown_token: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        controller: Arc<LifecycleController>,
        probe: Arc<dyn Probe>,
        detector: Arc<FailureDetector>,
        config: &FleetConfig,
    ) -> Self {
        Self {
            controller,
            probe,
            detector,
            heartbeat: config.heartbeat.clone(),
            health_check: config.health_check.clone(),
            thresholds: config.health_thresholds(),
            breaker: config.failure_detection.circuit_breaker.clone(),
            trackers: RwLock::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to stop every polling task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_watching(&self, id: &ComponentId) -> bool {
        self.trackers.read().contains_key(id)
    }

    pub fn watched(&self) -> Vec<ComponentId> {
        self.trackers.read().keys().cloned().collect()
    }

    /// Start polling `id`. Watching an already watched component is a no-op.
    pub fn watch(self: &Arc<Self>, id: &ComponentId) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        let tracker = {
            let mut trackers = self.trackers.write();
            if trackers.contains_key(id) {
                return;
            }
            let tracker = Arc::new(ComponentTracker {
                state: Mutex::new(TrackerState::new(self.breaker.clone())),
                evaluation: tokio::sync::Mutex::new(()),
                token: self.shutdown_token.child_token(),
                tasks: Mutex::new(Vec::new()),
            });
            trackers.insert(id.clone(), tracker.clone());
            tracker
        };

        let heartbeat = tokio::spawn({
            let monitor = self.clone();
            let id = id.clone();
            let tracker = tracker.clone();
            async move { monitor.heartbeat_loop(id, tracker).await }
        });
        let health = tokio::spawn({
            let monitor = self.clone();
            let id = id.clone();
            let tracker = tracker.clone();
            async move { monitor.health_loop(id, tracker).await }
        });
        tracker.tasks.lock().extend([heartbeat, health]);
        debug!(component_id = %id, "Health monitoring started");
    }

    /// Stop polling `id`. Its tasks exit at their next suspension point.
    pub fn unwatch(&self, id: &ComponentId) {
        if let Some(tracker) = self.trackers.write().remove(id) {
            tracker.token.cancel();
            debug!(component_id = %id, "Health monitoring stopped");
        }
    }

    /// Cancel every polling task and wait for all of them to exit.
    pub async fn stop_all(&self) {
        self.shutdown_token.cancel();
        let trackers: Vec<Arc<ComponentTracker>> =
            self.trackers.write().drain().map(|(_, t)| t).collect();
        let handles: Vec<JoinHandle<()>> = trackers
            .iter()
            .flat_map(|t| t.tasks.lock().drain(..).collect::<Vec<_>>())
            .collect();
        let count = handles.len();
        futures::future::join_all(handles).await;
        info!(tasks = count, "Health monitoring stopped for all components");
    }

    /// Clear counters, metrics and the breaker for `id`.
    pub fn reset(&self, id: &ComponentId) {
        if let Some(tracker) = self.tracker(id) {
            *tracker.state.lock() = TrackerState::new(self.breaker.clone());
        }
    }

    fn tracker(&self, id: &ComponentId) -> Option<Arc<ComponentTracker>> {
        self.trackers.read().get(id).cloned()
    }

    fn should_probe(&self, id: &ComponentId) -> bool {
        self.controller.state(id) == Some(LifecycleState::Running)
    }

    async fn heartbeat_loop(self: Arc<Self>, id: ComponentId, tracker: Arc<ComponentTracker>) {
        let period = self.heartbeat.interval;
        // First probe one period after the component came up
        let mut tick = interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.heartbeat_round(&id, &tracker).await;
                }
                _ = tracker.token.cancelled() => break,
            }
        }
        debug!(component_id = %id, "Heartbeat task stopped");
    }

    async fn health_loop(self: Arc<Self>, id: ComponentId, tracker: Arc<ComponentTracker>) {
        let period = self.health_check.interval;
        let mut tick = interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.health_round(&id, &tracker).await;
                }
                _ = tracker.token.cancelled() => break,
            }
        }
        debug!(component_id = %id, "Health check task stopped");
    }

    /// One heartbeat probe plus evaluation. Returns whether the component
    /// answered, or `None` when it was not probed.
    pub async fn poll_heartbeat(&self, id: &ComponentId) -> Option<bool> {
        let tracker = self.tracker(id)?;
        self.heartbeat_round(id, &tracker).await
    }

    /// One health-check probe plus evaluation. Returns the resulting status,
    /// or `None` when the component was not probed.
    pub async fn poll_health(&self, id: &ComponentId) -> Option<HealthStatus> {
        let tracker = self.tracker(id)?;
        self.health_round(id, &tracker).await?;
        self.controller.get(id).map(|c| c.health_status)
    }

    fn acquire(&self, id: &ComponentId, tracker: &ComponentTracker) -> bool {
        let (allowed, transition) = tracker.state.lock().breaker.try_acquire(Instant::now());
        if transition == Some(CircuitTransition::HalfOpened) {
            info!(component_id = %id, "Circuit half-open, sending trial probe");
        }
        allowed
    }

    async fn heartbeat_round(&self, id: &ComponentId, tracker: &ComponentTracker) -> Option<bool> {
        if !self.should_probe(id) || !self.acquire(id, tracker) {
            return None;
        }

        let answered = matches!(
            tokio::time::timeout(self.heartbeat.timeout, self.probe.heartbeat(id)).await,
            Ok(Ok(true))
        );

        let now = Instant::now();
        let (failures, transition, escalate) = {
            let mut state = tracker.state.lock();
            if answered {
                state.heartbeat_failures = 0;
                state.first_missed_at = None;
                state.heartbeat_escalated = false;
                state.last_heartbeat = Some(Utc::now());
                (0, state.breaker.on_success(), false)
            } else {
                state.heartbeat_failures += 1;
                let first = *state.first_missed_at.get_or_insert(now);
                let escalate = !state.heartbeat_escalated
                    && now.duration_since(first) >= self.heartbeat.escalation_delay;
                if escalate {
                    state.heartbeat_escalated = true;
                }
                (state.heartbeat_failures, state.breaker.on_failure(now), escalate)
            }
        };

        if !answered {
            debug!(component_id = %id, attempts = failures, "Heartbeat missed");
            self.controller.event_bus().publish(
                FleetEvent::component(FleetEventKind::HeartbeatMissed, id)
                    .with_payload(json!({ "consecutive": failures })),
            );
            if failures == self.heartbeat.retry_attempts {
                warn!(component_id = %id, attempts = failures, "Heartbeat timed out");
            }
            if escalate {
                self.detector.escalate(
                    id,
                    Some(FailureTier::Heartbeat),
                    &format!("no heartbeat for {:?}", self.heartbeat.escalation_delay),
                );
            }
        }

        self.after_round(id, tracker, transition).await;
        Some(answered)
    }

    async fn health_round(&self, id: &ComponentId, tracker: &ComponentTracker) -> Option<()> {
        if !self.should_probe(id) || !self.acquire(id, tracker) {
            return None;
        }

        let probed = match tokio::time::timeout(self.health_check.timeout, self.probe.health_check(id)).await {
            Ok(Ok(metrics)) => Ok(metrics),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("health check timed out after {:?}", self.health_check.timeout)),
        };

        let transition = {
            let mut state = tracker.state.lock();
            match &probed {
                Ok(metrics) => {
                    let status = self.thresholds.evaluate(metrics);
                    state.last_health_check = Some(Utc::now());
                    state.metrics = Some(metrics.clone());
                    if status.is_escalation_worthy() {
                        state.health_failures += 1;
                    } else {
                        state.health_failures = 0;
                    }
                    // Recovery needs `success_threshold` better checks in a row
                    if state.metrics_status.is_worse_than(status)
                        && state.metrics_status != HealthStatus::Unknown
                    {
                        state.health_successes += 1;
                        if state.health_successes >= self.health_check.success_threshold {
                            state.metrics_status = status;
                            state.health_successes = 0;
                        }
                    } else {
                        state.health_successes = 0;
                        state.metrics_status = status;
                    }
                    state.breaker.on_success()
                }
                Err(_) => {
                    state.health_failures += 1;
                    state.health_successes = 0;
                    if state.health_failures >= self.health_check.failure_threshold {
                        state.metrics_status = state.metrics_status.max(HealthStatus::Unhealthy);
                    }
                    state.breaker.on_failure(Instant::now())
                }
            }
        };

        if let Err(reason) = &probed {
            debug!(component_id = %id, "Health check failed: {}", reason);
            self.controller.event_bus().publish(
                FleetEvent::component(FleetEventKind::HealthCheckFailed, id)
                    .with_payload(json!({ "reason": reason })),
            );
        }

        self.after_round(id, tracker, transition).await;
        Some(())
    }

    /// Publish the combined status, then evaluate failure tiers once.
    async fn after_round(
        &self,
        id: &ComponentId,
        tracker: &ComponentTracker,
        transition: Option<CircuitTransition>,
    ) {
        let _evaluation = tracker.evaluation.lock().await;
        if !self.should_probe(id) {
            return;
        }
        self.publish_status(id, tracker);

        let response = match transition {
            Some(CircuitTransition::Opened) => Some(self.detector.on_circuit_opened(id).await),
            Some(CircuitTransition::Closed) => {
                info!(component_id = %id, "Circuit closed");
                self.controller
                    .event_bus()
                    .publish(FleetEvent::component(FleetEventKind::CircuitClosed, id));
                self.evaluate_tiers(id, tracker).await
            }
            _ => self.evaluate_tiers(id, tracker).await,
        };

        if let Some(response) = response {
            if response.applied
                && matches!(response.action, FailureAction::Restart | FailureAction::Replace)
            {
                *tracker.state.lock() = TrackerState::new(self.breaker.clone());
            }
        }
    }

    async fn evaluate_tiers(
        &self,
        id: &ComponentId,
        tracker: &ComponentTracker,
    ) -> Option<FailureResponse> {
        let mut signals = {
            let state = tracker.state.lock();
            FailureSignals {
                consecutive_heartbeat_failures: state.heartbeat_failures,
                consecutive_health_check_failures: state.health_failures,
                response_time_ms: state.metrics.as_ref().map(|m| m.response_time_ms),
                unavailable_hard_dependencies: Vec::new(),
                peak_resource_percent: state.metrics.as_ref().map(|m| m.peak_resource_percent()),
            }
        };
        // A dependency in the middle of a restart or swap is not counted
        signals.unavailable_hard_dependencies = self
            .controller
            .unavailable_hard_dependencies(id)
            .into_iter()
            .filter(|dependency| {
                let busy = self.controller.is_busy(dependency);
                if busy {
                    debug!(component_id = %id, dependency = %dependency, "Dependency busy, not counted");
                }
                !busy
            })
            .collect();
        self.detector.detect(id, &signals).await
    }

    fn publish_status(&self, id: &ComponentId, tracker: &ComponentTracker) {
        let status = {
            let state = tracker.state.lock();
            let heartbeat = if state.heartbeat_failures >= self.heartbeat.retry_attempts {
                HealthStatus::Unhealthy
            } else if state.heartbeat_failures > 0 {
                HealthStatus::Degraded
            } else if state.last_heartbeat.is_some() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unknown
            };
            state.metrics_status.max(heartbeat)
        };
        self.controller.set_health(id, status);
    }

    pub fn component_health(&self, id: &ComponentId) -> Option<ComponentHealth> {
        let component = self.controller.get(id)?;
        let mut health = ComponentHealth {
            component_id: id.clone(),
            status: component.health_status,
            lifecycle_state: component.state(),
            metrics: None,
            consecutive_heartbeat_failures: 0,
            consecutive_health_check_failures: 0,
            last_heartbeat: None,
            last_health_check: None,
            circuit: Default::default(),
            restart_count: component.restart_count(),
        };
        if let Some(tracker) = self.tracker(id) {
            let state = tracker.state.lock();
            health.metrics = state.metrics.clone();
            health.consecutive_heartbeat_failures = state.heartbeat_failures;
            health.consecutive_health_check_failures = state.health_failures;
            health.last_heartbeat = state.last_heartbeat;
            health.last_health_check = state.last_health_check;
            health.circuit = state.breaker.state();
        }
        Some(health)
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth::aggregate(
            self.controller
                .ids()
                .iter()
                .filter_map(|id| self.component_health(id))
                .collect(),
        )
    }
}
