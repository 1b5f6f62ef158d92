// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Shutdown Coordinator
//!
//! Graceful stop of one component: optional state snapshot, connection
//! drain, the configured cleanup tasks, then a graceful runtime stop, all
//! inside `graceful_timeout`. Anything that overruns or fails falls through
//! to a forced stop bounded by `force_timeout`. A component is never left in
//! STOPPING: it ends STOPPED, or FAILED when even the forced stop failed.
//!
//! Fleet shutdown stops components in the reverse of the topological start
//! order. One component failing to stop never blocks the rest.

use crate::application::lifecycle::LifecycleController;
use crate::domain::component::ComponentId;
use crate::domain::config::ShutdownConfig;
use crate::domain::errors::{FleetError, FleetResult};
use crate::domain::lifecycle::LifecycleState;
use crate::domain::snapshot::{StateSnapshot, StateSnapshotter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    Graceful,
    Forced,
    /// Nothing was running
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStopReport {
    pub component_id: ComponentId,
    pub mode: StopMode,
    pub cleanup_failures: Vec<String>,
    pub snapshot_saved: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub order: Vec<ComponentId>,
    pub components: Vec<ComponentStopReport>,
    pub failed: Vec<ComponentId>,
    /// The order timeout elapsed and the remainder was force-stopped
    pub deadline_exceeded: bool,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ShutdownCoordinator {
    controller: Arc<LifecycleController>,
    snapshotter: Option<Arc<dyn StateSnapshotter>>,
    config: ShutdownConfig,
    order_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        controller: Arc<LifecycleController>,
        snapshotter: Option<Arc<dyn StateSnapshotter>>,
    ) -> Self {
        let config = controller.config().shutdown.clone();
        let order_timeout = controller.config().dependency.shutdown_order_timeout;
        Self {
            controller,
            snapshotter,
            config,
            order_timeout,
        }
    }

    /// Reverse topological order over every registered component. When the
    /// registry holds a fatal cycle, deeper components stop first.
    pub fn shutdown_order(&self) -> Vec<ComponentId> {
        match self.controller.fleet_startup_order() {
            Ok(mut order) => {
                order.reverse();
                order
            }
            Err(e) => {
                warn!("No start order for shutdown ({}), falling back to depth order", e);
                let graph = self.controller.graph();
                let mut nodes: Vec<(usize, ComponentId)> =
                    graph.nodes().map(|n| (n.depth, n.id().clone())).collect();
                nodes.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
                nodes.into_iter().map(|(_, id)| id).collect()
            }
        }
    }

    pub async fn stop_component(&self, id: &ComponentId, force: bool) -> FleetResult<ComponentStopReport> {
        let _guard = self.controller.begin_operation(id)?;
        let component = self
            .controller
            .get(id)
            .ok_or_else(|| FleetError::ComponentNotFound(id.clone()))?;
        let mut report = ComponentStopReport {
            component_id: id.clone(),
            mode: StopMode::AlreadyStopped,
            cleanup_failures: Vec::new(),
            snapshot_saved: false,
            error: None,
        };

        match component.state() {
            LifecycleState::Stopped | LifecycleState::Initializing => return Ok(report),
            LifecycleState::Failed => {
                // Release whatever the failed instance still holds
                if let Err(e) = self.force_stop(id).await {
                    warn!(component_id = %id, "Force stop of failed component: {}", e);
                }
                self.controller
                    .transition(id, LifecycleState::Stopped, Some("stopped after failure".to_string()))?;
                report.mode = StopMode::Forced;
                return Ok(report);
            }
            _ => {}
        }

        let running_dependents: Vec<&ComponentId> = component
            .dependents
            .iter()
            .filter(|d| {
                self.controller
                    .state(d)
                    .is_some_and(|s| s.is_active())
            })
            .collect();
        if !running_dependents.is_empty() {
            warn!(
                component_id = %id,
                dependents = ?running_dependents,
                "Stopping component while dependents are still active"
            );
        }

        if !force && self.config.save_state {
            report.snapshot_saved = self.save_snapshot(id).await;
        }

        self.controller
            .transition(id, LifecycleState::Stopping, None)?;

        if !force {
            let limit = self.config.graceful_timeout;
            match tokio::time::timeout(limit, self.graceful(id, &mut report.cleanup_failures)).await {
                Ok(Ok(())) => {
                    self.controller.transition(id, LifecycleState::Stopped, None)?;
                    report.mode = StopMode::Graceful;
                    info!(component_id = %id, "Component stopped gracefully");
                    return Ok(report);
                }
                Ok(Err(e)) => warn!(component_id = %id, "Graceful stop failed, forcing: {}", e),
                Err(_) => warn!(component_id = %id, timeout = ?limit, "Graceful stop timed out, forcing"),
            }
        }

        match self.force_stop(id).await {
            Ok(()) => {
                self.controller
                    .transition(id, LifecycleState::Stopped, Some("forced".to_string()))?;
                report.mode = StopMode::Forced;
                info!(component_id = %id, "Component force-stopped");
                Ok(report)
            }
            Err(reason) => {
                error!(component_id = %id, "Forced stop failed: {}", reason);
                self.controller.mark_failed(id, format!("stop failed: {}", reason))?;
                Err(FleetError::ShutdownTimeout {
                    component: id.clone(),
                    timeout: self.config.graceful_timeout + self.config.force_timeout,
                })
            }
        }
    }

    async fn graceful(&self, id: &ComponentId, cleanup_failures: &mut Vec<String>) -> Result<(), String> {
        let runtime = self.controller.runtime();
        if self.config.drain_connections {
            if let Err(e) = runtime.drain(id).await {
                warn!(component_id = %id, "Drain failed: {}", e);
            }
        }
        for task in &self.config.cleanup_tasks {
            debug!(component_id = %id, task = %task, "Running cleanup task");
            if let Err(e) = runtime.run_cleanup(id, task).await {
                warn!(component_id = %id, task = %task, "Cleanup task failed: {}", e);
                cleanup_failures.push(task.clone());
            }
        }
        runtime.stop(id, false).await.map_err(|e| e.to_string())
    }

    async fn force_stop(&self, id: &ComponentId) -> Result<(), String> {
        let limit = self.config.force_timeout;
        match tokio::time::timeout(limit, self.controller.runtime().stop(id, true)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("forced stop timed out after {:?}", limit)),
        }
    }

    async fn save_snapshot(&self, id: &ComponentId) -> bool {
        let Some(snapshotter) = &self.snapshotter else {
            return false;
        };
        let Some(component) = self.controller.get(id) else {
            return false;
        };
        let snapshot = StateSnapshot {
            component_id: id.clone(),
            state: component.state(),
            config: component.config.clone(),
            restart_count: component.restart_count(),
            taken_at: Utc::now(),
        };
        match snapshotter.save(snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!(component_id = %id, "State snapshot failed: {}", e);
                false
            }
        }
    }

    /// Stop `order` front to back. Once `shutdown_order_timeout` has elapsed
    /// the remaining components are force-stopped.
    pub async fn stop_in_order(&self, order: Vec<ComponentId>) -> ShutdownReport {
        let started = Instant::now();
        let mut components = Vec::with_capacity(order.len());
        let mut failed = Vec::new();
        let mut deadline_exceeded = false;

        for id in &order {
            let force = started.elapsed() >= self.order_timeout;
            if force && !deadline_exceeded {
                warn!(timeout = ?self.order_timeout, "Shutdown order timeout elapsed, forcing the rest");
                deadline_exceeded = true;
            }
            match self.stop_component(id, force).await {
                Ok(report) => components.push(report),
                Err(e) => {
                    error!(component_id = %id, "Failed to stop component: {}", e);
                    failed.push(id.clone());
                    components.push(ComponentStopReport {
                        component_id: id.clone(),
                        mode: if force { StopMode::Forced } else { StopMode::Graceful },
                        cleanup_failures: Vec::new(),
                        snapshot_saved: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        ShutdownReport {
            order,
            components,
            failed,
            deadline_exceeded,
            duration: started.elapsed(),
        }
    }
}
