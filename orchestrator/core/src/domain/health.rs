// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Health Model
//!
//! Metrics returned by health-check probes and the threshold table that maps
//! them onto a `HealthStatus`. Evaluation starts at `Healthy` and keeps the
//! most severe status any rule produces, so crossing a threshold can only
//! make the result worse.
//!
//! | Rule | Status at least |
//! |------|-----------------|
//! | error rate > 5% | `DEGRADED` |
//! | response time > 5000 ms | `DEGRADED` |
//! | availability < 95% | `UNHEALTHY` |
//! | cpu or memory > 90% | `CRITICAL` |

use crate::domain::component::ComponentId;
use crate::domain::failure::CircuitState;
use crate::domain::lifecycle::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered by severity: `Unknown < Healthy < Degraded < Unhealthy < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn is_worse_than(&self, other: HealthStatus) -> bool {
        *self > other
    }

    pub fn is_escalation_worthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy | HealthStatus::Critical)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub response_time_ms: f64,
    pub error_rate_percent: f64,
    pub throughput: f64,
    pub availability_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl HealthMetrics {
    /// Metrics well inside every threshold.
    pub fn nominal() -> Self {
        Self {
            cpu_percent: 10.0,
            memory_percent: 20.0,
            response_time_ms: 50.0,
            error_rate_percent: 0.0,
            throughput: 100.0,
            availability_percent: 100.0,
            timestamp: Utc::now(),
        }
    }

    pub fn peak_resource_percent(&self) -> f64 {
        self.cpu_percent.max(self.memory_percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub max_error_rate_percent: f64,
    pub max_response_time_ms: f64,
    pub min_availability_percent: f64,
    pub max_resource_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_error_rate_percent: 5.0,
            max_response_time_ms: 5000.0,
            min_availability_percent: 95.0,
            max_resource_percent: 90.0,
        }
    }
}

impl HealthThresholds {
    pub fn evaluate(&self, metrics: &HealthMetrics) -> HealthStatus {
        let mut status = HealthStatus::Healthy;
        if metrics.error_rate_percent > self.max_error_rate_percent {
            status = status.max(HealthStatus::Degraded);
        }
        if metrics.response_time_ms > self.max_response_time_ms {
            status = status.max(HealthStatus::Degraded);
        }
        if metrics.availability_percent < self.min_availability_percent {
            status = status.max(HealthStatus::Unhealthy);
        }
        if metrics.peak_resource_percent() > self.max_resource_percent {
            status = status.max(HealthStatus::Critical);
        }
        status
    }
}

/// Per-component snapshot served by the query API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component_id: ComponentId,
    pub status: HealthStatus,
    pub lifecycle_state: LifecycleState,
    pub metrics: Option<HealthMetrics>,
    pub consecutive_heartbeat_failures: u32,
    pub consecutive_health_check_failures: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub circuit: CircuitState,
    pub restart_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub total: usize,
    pub running: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub critical: usize,
    pub failed: usize,
    pub components: Vec<ComponentHealth>,
    pub evaluated_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Worst observed component status. A FAILED lifecycle counts as at least
    /// `Unhealthy`; a fleet with nothing observed is `Unknown`.
    pub fn aggregate(components: Vec<ComponentHealth>) -> Self {
        let mut health = SystemHealth {
            status: HealthStatus::Unknown,
            total: components.len(),
            running: 0,
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            critical: 0,
            failed: 0,
            components: Vec::new(),
            evaluated_at: Utc::now(),
        };

        for component in &components {
            let mut effective = component.status;
            match component.lifecycle_state {
                LifecycleState::Running => health.running += 1,
                LifecycleState::Failed => {
                    health.failed += 1;
                    effective = effective.max(HealthStatus::Unhealthy);
                }
                _ => {}
            }
            match component.status {
                HealthStatus::Healthy => health.healthy += 1,
                HealthStatus::Degraded => health.degraded += 1,
                HealthStatus::Unhealthy => health.unhealthy += 1,
                HealthStatus::Critical => health.critical += 1,
                HealthStatus::Unknown => {}
            }
            health.status = health.status.max(effective);
        }

        health.components = components;
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> HealthMetrics {
        HealthMetrics::nominal()
    }

    #[test]
    fn test_nominal_metrics_are_healthy() {
        assert_eq!(
            HealthThresholds::default().evaluate(&metrics()),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_threshold_table() {
        let t = HealthThresholds::default();

        let mut m = metrics();
        m.error_rate_percent = 5.1;
        assert_eq!(t.evaluate(&m), HealthStatus::Degraded);

        let mut m = metrics();
        m.response_time_ms = 5001.0;
        assert_eq!(t.evaluate(&m), HealthStatus::Degraded);

        let mut m = metrics();
        m.availability_percent = 94.0;
        assert_eq!(t.evaluate(&m), HealthStatus::Unhealthy);

        let mut m = metrics();
        m.memory_percent = 91.0;
        assert_eq!(t.evaluate(&m), HealthStatus::Critical);
    }

    #[test]
    fn test_highest_severity_wins() {
        let mut m = metrics();
        m.error_rate_percent = 50.0;
        m.availability_percent = 50.0;
        m.cpu_percent = 99.0;
        assert_eq!(
            HealthThresholds::default().evaluate(&m),
            HealthStatus::Critical
        );
    }

    #[test]
    fn test_error_rate_is_monotone() {
        let t = HealthThresholds::default();
        let mut base = metrics();
        base.availability_percent = 96.0;
        base.response_time_ms = 4000.0;

        let mut previous = HealthStatus::Unknown;
        for step in 0..=200 {
            let mut m = base.clone();
            m.error_rate_percent = step as f64 * 0.1;
            let status = t.evaluate(&m);
            assert!(status >= previous, "error rate {} improved status", m.error_rate_percent);
            if m.error_rate_percent > 5.0 {
                assert!(status >= HealthStatus::Degraded);
            }
            previous = status;
        }
    }

    fn component(status: HealthStatus, state: LifecycleState) -> ComponentHealth {
        ComponentHealth {
            component_id: "c".into(),
            status,
            lifecycle_state: state,
            metrics: None,
            consecutive_heartbeat_failures: 0,
            consecutive_health_check_failures: 0,
            last_heartbeat: None,
            last_health_check: None,
            circuit: CircuitState::Closed,
            restart_count: 0,
        }
    }

    #[test]
    fn test_system_health_aggregation() {
        let health = SystemHealth::aggregate(vec![
            component(HealthStatus::Healthy, LifecycleState::Running),
            component(HealthStatus::Degraded, LifecycleState::Running),
            component(HealthStatus::Unknown, LifecycleState::Failed),
        ]);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.running, 2);
        assert_eq!(health.failed, 1);
        assert_eq!(health.degraded, 1);

        assert_eq!(SystemHealth::aggregate(vec![]).status, HealthStatus::Unknown);
    }
}
