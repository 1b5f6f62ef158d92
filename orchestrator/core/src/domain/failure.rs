// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tiered Failure Detection
//!
//! Five independently configured tiers compare live signals against a
//! threshold and name a remediation. When several tiers fire in the same
//! evaluation, only the highest-priority one is acted upon:
//! `RESOURCE > DEPENDENCY > PERFORMANCE > HEALTH_CHECK > HEARTBEAT`.
//!
//! The circuit breaker wraps repeated probe failures so a flapping
//! component is not probed and remediated on every tick.

use crate::domain::component::ComponentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Declaration order is priority order, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTier {
    Heartbeat,
    HealthCheck,
    Performance,
    Dependency,
    Resource,
}

impl FailureTier {
    pub const ALL: [FailureTier; 5] = [
        FailureTier::Heartbeat,
        FailureTier::HealthCheck,
        FailureTier::Performance,
        FailureTier::Dependency,
        FailureTier::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureTier::Heartbeat => "heartbeat",
            FailureTier::HealthCheck => "health_check",
            FailureTier::Performance => "performance",
            FailureTier::Dependency => "dependency",
            FailureTier::Resource => "resource",
        }
    }
}

impl fmt::Display for FailureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    Restart,
    Replace,
    Isolate,
    Escalate,
    Ignore,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::Restart => "restart",
            FailureAction::Replace => "replace",
            FailureAction::Isolate => "isolate",
            FailureAction::Escalate => "escalate",
            FailureAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub threshold: f64,

    pub action: FailureAction,

    /// Minimum gap between two escalations raised by this tier
    #[serde(default = "default_escalation_time", with = "humantime_serde")]
    pub escalation_time: Duration,
}

fn default_enabled() -> bool {
    true
}

fn default_escalation_time() -> Duration {
    Duration::from_secs(300)
}

impl TierConfig {
    pub fn new(threshold: f64, action: FailureAction) -> Self {
        Self {
            enabled: true,
            threshold,
            action,
            escalation_time: default_escalation_time(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout", with = "humantime_serde")]
    pub recovery_timeout: Duration,

    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    /// Remediation applied once when the circuit opens
    #[serde(default = "default_open_action")]
    pub open_action: FailureAction,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_open_action() -> FailureAction {
    FailureAction::Isolate
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
            open_action: default_open_action(),
        }
    }
}

/// One explicit section per tier; unknown tier names fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureDetectionConfig {
    #[serde(default = "default_heartbeat_tier")]
    pub heartbeat: TierConfig,

    #[serde(default = "default_health_check_tier")]
    pub health_check: TierConfig,

    /// Threshold in milliseconds of response time
    #[serde(default = "default_performance_tier")]
    pub performance: TierConfig,

    /// Threshold in unavailable hard dependencies
    #[serde(default = "default_dependency_tier")]
    pub dependency: TierConfig,

    /// Threshold in percent of cpu or memory
    #[serde(default = "default_resource_tier")]
    pub resource: TierConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_heartbeat_tier() -> TierConfig {
    TierConfig::new(3.0, FailureAction::Restart)
}

fn default_health_check_tier() -> TierConfig {
    TierConfig::new(3.0, FailureAction::Restart)
}

fn default_performance_tier() -> TierConfig {
    TierConfig::new(5000.0, FailureAction::Escalate)
}

fn default_dependency_tier() -> TierConfig {
    TierConfig::new(1.0, FailureAction::Isolate)
}

fn default_resource_tier() -> TierConfig {
    TierConfig::new(90.0, FailureAction::Restart)
}

impl Default for FailureDetectionConfig {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat_tier(),
            health_check: default_health_check_tier(),
            performance: default_performance_tier(),
            dependency: default_dependency_tier(),
            resource: default_resource_tier(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Observations gathered for one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureSignals {
    pub consecutive_heartbeat_failures: u32,
    pub consecutive_health_check_failures: u32,
    pub response_time_ms: Option<f64>,
    pub unavailable_hard_dependencies: Vec<ComponentId>,
    pub peak_resource_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTrigger {
    pub tier: FailureTier,
    pub action: FailureAction,
    pub observed: f64,
    pub threshold: f64,
}

impl FailureDetectionConfig {
    pub fn tier(&self, tier: FailureTier) -> &TierConfig {
        match tier {
            FailureTier::Heartbeat => &self.heartbeat,
            FailureTier::HealthCheck => &self.health_check,
            FailureTier::Performance => &self.performance,
            FailureTier::Dependency => &self.dependency,
            FailureTier::Resource => &self.resource,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for tier in FailureTier::ALL {
            let config = self.tier(tier);
            if !config.threshold.is_finite() || config.threshold < 0.0 {
                return Err(format!("{} threshold must be a non-negative number", tier));
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.circuit_breaker.half_open_max_calls == 0 {
            return Err("circuit_breaker.half_open_max_calls must be at least 1".to_string());
        }
        Ok(())
    }

    /// Every enabled tier that fires, highest priority first.
    pub fn evaluate(&self, signals: &FailureSignals) -> Vec<TierTrigger> {
        let mut triggers: Vec<TierTrigger> = FailureTier::ALL
            .iter()
            .filter_map(|tier| {
                let config = self.tier(*tier);
                if !config.enabled {
                    return None;
                }
                let observed = match tier {
                    FailureTier::Heartbeat => {
                        Some(signals.consecutive_heartbeat_failures as f64)
                            .filter(|v| *v >= config.threshold)
                    }
                    FailureTier::HealthCheck => {
                        Some(signals.consecutive_health_check_failures as f64)
                            .filter(|v| *v >= config.threshold)
                    }
                    FailureTier::Performance => signals
                        .response_time_ms
                        .filter(|v| *v > config.threshold),
                    FailureTier::Dependency => {
                        Some(signals.unavailable_hard_dependencies.len() as f64)
                            .filter(|v| *v > 0.0 && *v >= config.threshold)
                    }
                    FailureTier::Resource => signals
                        .peak_resource_percent
                        .filter(|v| *v > config.threshold),
                }?;
                Some(TierTrigger {
                    tier: *tier,
                    action: config.action,
                    observed,
                    threshold: config.threshold,
                })
            })
            .collect();
        triggers.sort_by(|a, b| b.tier.cmp(&a.tier));
        triggers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    HalfOpened,
    Closed,
}

/// Per-component breaker over consecutive probe failures.
///
/// Time is passed in so the breaker stays a plain value type.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    half_open_calls: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_calls: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a probe may run now. An open circuit moves to half-open once
    /// `recovery_timeout` has elapsed.
    pub fn try_acquire(&mut self, now: Instant) -> (bool, Option<CircuitTransition>) {
        match self.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_calls = 1;
                    self.half_open_successes = 0;
                    (true, Some(CircuitTransition::HalfOpened))
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < self.config.half_open_max_calls {
                    self.half_open_calls += 1;
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    pub fn on_success(&mut self) -> Option<CircuitTransition> {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= self.config.half_open_max_calls {
                self.state = CircuitState::Closed;
                self.half_open_calls = 0;
                self.half_open_successes = 0;
                self.opened_at = None;
                return Some(CircuitTransition::Closed);
            }
        }
        None
    }

    pub fn on_failure(&mut self, now: Instant) -> Option<CircuitTransition> {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.open(now);
                Some(CircuitTransition::Opened)
            }
            CircuitState::HalfOpen => {
                self.open(now);
                Some(CircuitTransition::Opened)
            }
            _ => None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_calls = 0;
        self.half_open_successes = 0;
    }
}
