// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use aegis_fleet_core::domain::component::{ComponentConfig, ComponentId, ComponentSpec};
use aegis_fleet_core::domain::config::FleetConfig;
use aegis_fleet_core::domain::health::HealthMetrics;
use aegis_fleet_core::domain::probe::{Probe, ProbeError};
use aegis_fleet_core::domain::runtime::{ComponentRuntime, RuntimeError};
use aegis_fleet_core::infrastructure::event_bus::EventReceiver;
use aegis_fleet_core::domain::events::{FleetEvent, FleetEventKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use semver::Version;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Runtime that records every call and fails only where a test scripts it.
#[derive(Default)]
pub struct FakeRuntime {
    pub starts: AtomicU32,
    pub graceful_stops: AtomicU32,
    pub forced_stops: AtomicU32,
    pub drains: AtomicU32,
    pub rollbacks: AtomicU32,
    pub start_log: Mutex<Vec<ComponentId>>,
    pub stop_log: Mutex<Vec<ComponentId>>,
    pub cleanup_log: Mutex<Vec<(ComponentId, String)>>,
    fail_starts: Mutex<HashMap<ComponentId, u32>>,
    fail_cleanup: Mutex<HashSet<String>>,
    fail_stops: Mutex<HashSet<ComponentId>>,
    hang_starts: Mutex<HashSet<ComponentId>>,
    pub hang_graceful_stop: AtomicBool,
    pub fail_prepare: AtomicBool,
    pub fail_cutover: AtomicBool,
    pub fail_rollback: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` starts of `id`.
    pub fn fail_starts(&self, id: &str, times: u32) {
        self.fail_starts.lock().insert(id.into(), times);
    }

    pub fn fail_cleanup(&self, task: &str) {
        self.fail_cleanup.lock().insert(task.to_string());
    }

    /// Every stop of `id`, graceful or forced, fails.
    pub fn fail_stops(&self, id: &str) {
        self.fail_stops.lock().insert(id.into());
    }

    /// Starts of `id` never complete.
    pub fn hang_starts(&self, id: &str) {
        self.hang_starts.lock().insert(id.into());
    }

    pub fn starts_of(&self, id: &str) -> usize {
        self.start_log.lock().iter().filter(|c| c.as_str() == id).count()
    }

    pub fn start_position(&self, id: &str) -> Option<usize> {
        self.start_log.lock().iter().position(|c| c.as_str() == id)
    }
}

#[async_trait]
impl ComponentRuntime for FakeRuntime {
    async fn start(&self, spec: &ComponentSpec, _config: &ComponentConfig) -> Result<(), RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.hang_starts.lock().contains(&spec.id) {
            std::future::pending::<()>().await;
        }
        {
            let mut failing = self.fail_starts.lock();
            if let Some(remaining) = failing.get_mut(&spec.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RuntimeError::StartFailed(format!("scripted failure for {}", spec.id)));
                }
            }
        }
        self.start_log.lock().push(spec.id.clone());
        Ok(())
    }

    async fn stop(&self, id: &ComponentId, force: bool) -> Result<(), RuntimeError> {
        if self.fail_stops.lock().contains(id) {
            return Err(RuntimeError::StopFailed(format!("scripted failure for {}", id)));
        }
        if force {
            self.forced_stops.fetch_add(1, Ordering::SeqCst);
        } else {
            if self.hang_graceful_stop.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.graceful_stops.fetch_add(1, Ordering::SeqCst);
        }
        self.stop_log.lock().push(id.clone());
        Ok(())
    }

    async fn drain(&self, _id: &ComponentId) -> Result<(), RuntimeError> {
        self.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_cleanup(&self, id: &ComponentId, task: &str) -> Result<(), RuntimeError> {
        self.cleanup_log.lock().push((id.clone(), task.to_string()));
        if self.fail_cleanup.lock().contains(task) {
            return Err(RuntimeError::CleanupFailed {
                task: task.to_string(),
                reason: "scripted".to_string(),
            });
        }
        Ok(())
    }

    async fn prepare_swap(&self, _id: &ComponentId, _config: &ComponentConfig) -> Result<(), RuntimeError> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(RuntimeError::PrepareFailed("scripted".to_string()));
        }
        Ok(())
    }

    async fn cutover(&self, _id: &ComponentId, _config: &ComponentConfig) -> Result<(), RuntimeError> {
        if self.fail_cutover.load(Ordering::SeqCst) {
            return Err(RuntimeError::CutoverFailed("scripted".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self, _id: &ComponentId, _original: &ComponentConfig) -> Result<(), RuntimeError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(RuntimeError::RollbackFailed("scripted".to_string()));
        }
        Ok(())
    }
}

/// Probe whose answers are set per component; unknown components are healthy.
#[derive(Default)]
pub struct FakeProbe {
    pub heartbeats: AtomicU32,
    pub health_checks: AtomicU32,
    dead: Mutex<HashSet<ComponentId>>,
    metrics: Mutex<HashMap<ComponentId, HealthMetrics>>,
    unreachable: Mutex<HashSet<ComponentId>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alive(&self, id: &str, alive: bool) {
        let mut dead = self.dead.lock();
        if alive {
            dead.remove(id);
        } else {
            dead.insert(id.into());
        }
    }

    pub fn set_metrics(&self, id: &str, metrics: HealthMetrics) {
        self.metrics.lock().insert(id.into(), metrics);
    }

    /// Health checks for `id` error instead of answering.
    pub fn set_unreachable(&self, id: &str, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(id.into());
        } else {
            set.remove(id);
        }
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn heartbeat(&self, id: &ComponentId) -> Result<bool, ProbeError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(!self.dead.lock().contains(id))
    }

    async fn health_check(&self, id: &ComponentId) -> Result<HealthMetrics, ProbeError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().contains(id) {
            return Err(ProbeError::Unreachable(id.to_string()));
        }
        Ok(self
            .metrics
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(HealthMetrics::nominal))
    }
}

/// Config whose polling loops never tick during a test, with short
/// operational timeouts. Tests drive probes through `poll_*`.
pub fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.heartbeat.interval = Duration::from_secs(3600);
    config.heartbeat.timeout = Duration::from_millis(200);
    config.health_check.interval = Duration::from_secs(3600);
    config.health_check.timeout = Duration::from_millis(200);
    config.supervision.interval = Duration::from_secs(3600);
    config.dependency.backoff_delay = Duration::from_millis(1);
    config.dependency.component_start_timeout = Duration::from_millis(500);
    config.shutdown.graceful_timeout = Duration::from_millis(100);
    config.shutdown.force_timeout = Duration::from_millis(100);
    config.hot_swap.health_check_delay = Duration::from_millis(200);
    config
}

pub fn spec(id: &str) -> ComponentSpec {
    ComponentSpec::new(id, Version::new(1, 0, 0))
}

/// Every event currently buffered on `rx`.
pub fn drain_events(rx: &mut EventReceiver) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count_kind(events: &[FleetEvent], kind: FleetEventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}
