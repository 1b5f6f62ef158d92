// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Fleet Configuration Types
//
// Defines the configuration schema for a supervised component fleet:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Heartbeat and health-check polling
// - Tiered failure detection and circuit breaker
// - Graceful shutdown, hot swap and dependency resolution settings
//
// Every field has a default so a partial YAML document is valid.

use crate::domain::component::{ActivationContext, ComponentSpec};
use crate::domain::failure::FailureDetectionConfig;
use crate::domain::health::HealthThresholds;
use crate::domain::planning::ResolutionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const FLEET_KIND: &str = "Fleet";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fleet YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level Kubernetes-style fleet manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "Fleet")
    pub kind: String,

    pub metadata: FleetMetadata,

    pub spec: FleetSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSpec {
    #[serde(default)]
    pub config: FleetConfig,

    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

impl FleetManifest {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        Ok(manifest)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::Invalid(format!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != FLEET_KIND {
            return Err(ConfigError::Invalid(format!(
                "Invalid kind: '{}'. Must be '{}'",
                self.kind, FLEET_KIND
            )));
        }
        self.spec.config.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for component in &self.spec.components {
            component
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(component.id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "component {} is declared twice",
                    component.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub failure_detection: FailureDetectionConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub hot_swap: HotSwapConfig,

    #[serde(default)]
    pub dependency: DependencyConfig,

    #[serde(default)]
    pub supervision: SupervisionConfig,

    /// Context conditional dependencies and activation predicates see
    #[serde(default)]
    pub activation: ActivationContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_heartbeat_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive misses before the component counts as unreachable
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_escalation_delay", with = "humantime_serde")]
    pub escalation_delay: Duration,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_escalation_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            timeout: default_heartbeat_timeout(),
            retry_attempts: default_retry_attempts(),
            escalation_delay: default_escalation_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Opaque descriptor handed to the probe implementation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default)]
    pub thresholds: HealthThresholdsConfig,
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            thresholds: HealthThresholdsConfig::default(),
        }
    }
}

/// Serializable mirror of `HealthThresholds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholdsConfig {
    pub max_error_rate_percent: f64,
    pub max_response_time_ms: f64,
    pub min_availability_percent: f64,
    pub max_resource_percent: f64,
}

impl Default for HealthThresholdsConfig {
    fn default() -> Self {
        let t = HealthThresholds::default();
        Self {
            max_error_rate_percent: t.max_error_rate_percent,
            max_response_time_ms: t.max_response_time_ms,
            min_availability_percent: t.min_availability_percent,
            max_resource_percent: t.max_resource_percent,
        }
    }
}

impl From<&HealthThresholdsConfig> for HealthThresholds {
    fn from(c: &HealthThresholdsConfig) -> Self {
        Self {
            max_error_rate_percent: c.max_error_rate_percent,
            max_response_time_ms: c.max_response_time_ms,
            min_availability_percent: c.min_availability_percent,
            max_resource_percent: c.max_resource_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_graceful_timeout", with = "humantime_serde")]
    pub graceful_timeout: Duration,

    #[serde(default = "default_force_timeout", with = "humantime_serde")]
    pub force_timeout: Duration,

    /// Named tasks handed to the driver in order; failures are logged only
    #[serde(default)]
    pub cleanup_tasks: Vec<String>,

    #[serde(default = "default_true")]
    pub drain_connections: bool,

    #[serde(default)]
    pub save_state: bool,
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_force_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: default_graceful_timeout(),
            force_timeout: default_force_timeout(),
            cleanup_tasks: Vec::new(),
            drain_connections: true,
            save_state: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotSwapConfig {
    #[serde(default = "default_preparation_timeout", with = "humantime_serde")]
    pub preparation_timeout: Duration,

    #[serde(default = "default_validation_timeout", with = "humantime_serde")]
    pub validation_timeout: Duration,

    #[serde(default = "default_swap_timeout", with = "humantime_serde")]
    pub swap_timeout: Duration,

    #[serde(default = "default_rollback_timeout", with = "humantime_serde")]
    pub rollback_timeout: Duration,

    /// Verification window: the component must report HEALTHY within it
    #[serde(default = "default_health_check_delay", with = "humantime_serde")]
    pub health_check_delay: Duration,

    #[serde(default = "default_true")]
    pub compatibility_check: bool,
}

fn default_preparation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_validation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_swap_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_rollback_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_health_check_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for HotSwapConfig {
    fn default() -> Self {
        Self {
            preparation_timeout: default_preparation_timeout(),
            validation_timeout: default_validation_timeout(),
            swap_timeout: default_swap_timeout(),
            rollback_timeout: default_rollback_timeout(),
            health_check_delay: default_health_check_delay(),
            compatibility_check: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub resolution_strategy: ResolutionStrategy,

    #[serde(default = "default_max_dependency_depth")]
    pub max_dependency_depth: usize,

    #[serde(default = "default_true")]
    pub circular_detection: bool,

    #[serde(default = "default_startup_order_timeout", with = "humantime_serde")]
    pub startup_order_timeout: Duration,

    #[serde(default = "default_shutdown_order_timeout", with = "humantime_serde")]
    pub shutdown_order_timeout: Duration,

    /// Bound on a single start hook call
    #[serde(default = "default_component_start_timeout", with = "humantime_serde")]
    pub component_start_timeout: Duration,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_backoff_delay", with = "humantime_serde")]
    pub backoff_delay: Duration,

    /// Concurrent starts inside one parallel phase
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

fn default_max_dependency_depth() -> usize {
    10
}

fn default_startup_order_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_shutdown_order_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_component_start_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_parallelism() -> usize {
    8
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            resolution_strategy: ResolutionStrategy::default(),
            max_dependency_depth: default_max_dependency_depth(),
            circular_detection: true,
            startup_order_timeout: default_startup_order_timeout(),
            shutdown_order_timeout: default_shutdown_order_timeout(),
            component_start_timeout: default_component_start_timeout(),
            retry_attempts: default_retry_attempts(),
            backoff_delay: default_backoff_delay(),
            max_parallelism: default_max_parallelism(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionConfig {
    #[serde(default = "default_supervision_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Finished hot-swap records older than this are pruned
    #[serde(default = "default_stale_operation_ttl", with = "humantime_serde")]
    pub stale_operation_ttl: Duration,
}

fn default_supervision_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_stale_operation_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            interval: default_supervision_interval(),
            stale_operation_ttl: default_stale_operation_ttl(),
        }
    }
}

impl FleetConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds::from(&self.health_check.thresholds)
    }

    /// Failure detection as the detector applies it. The heartbeat and
    /// health-check tiers fire after `heartbeat.retry_attempts` and
    /// `health_check.failure_threshold` consecutive failures.
    pub fn failure_policy(&self) -> FailureDetectionConfig {
        let mut policy = self.failure_detection.clone();
        policy.heartbeat.threshold = f64::from(self.heartbeat.retry_attempts);
        policy.health_check.threshold = f64::from(self.health_check.failure_threshold);
        policy
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AEGIS_FLEET_RESOLUTION_STRATEGY") {
            match val.parse::<ResolutionStrategy>() {
                Ok(strategy) => {
                    tracing::info!(
                        "Environment override: AEGIS_FLEET_RESOLUTION_STRATEGY={}",
                        strategy
                    );
                    self.dependency.resolution_strategy = strategy;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for AEGIS_FLEET_RESOLUTION_STRATEGY: '{}'. {}. Ignoring.",
                        val,
                        e
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.heartbeat.interval.is_zero() {
            return invalid("heartbeat.interval must be greater than zero".to_string());
        }
        if self.heartbeat.timeout >= self.heartbeat.interval {
            return invalid(format!(
                "heartbeat.timeout ({:?}) must be shorter than heartbeat.interval ({:?})",
                self.heartbeat.timeout, self.heartbeat.interval
            ));
        }
        if self.heartbeat.retry_attempts == 0 {
            return invalid("heartbeat.retry_attempts must be at least 1".to_string());
        }
        if self.health_check.interval.is_zero() {
            return invalid("health_check.interval must be greater than zero".to_string());
        }
        if self.health_check.timeout >= self.health_check.interval {
            return invalid(format!(
                "health_check.timeout ({:?}) must be shorter than health_check.interval ({:?})",
                self.health_check.timeout, self.health_check.interval
            ));
        }
        if self.health_check.failure_threshold == 0 || self.health_check.success_threshold == 0 {
            return invalid("health_check thresholds must be at least 1".to_string());
        }
        if self.dependency.max_dependency_depth == 0 {
            return invalid("dependency.max_dependency_depth must be at least 1".to_string());
        }
        if self.dependency.max_parallelism == 0 {
            return invalid("dependency.max_parallelism must be at least 1".to_string());
        }
        if self.supervision.interval.is_zero() {
            return invalid("supervision.interval must be greater than zero".to_string());
        }
        self.failure_detection
            .validate()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }
}
