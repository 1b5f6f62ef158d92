// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Component Specifications
//!
//! Declarative description of a managed component: identity, version,
//! declared dependencies, activation predicates and placement constraints.
//!
//! Specs are produced by manifest parsing and consumed by the dependency
//! graph, the resolution executor and the lifecycle controller. They are
//! immutable once registered; runtime state lives in `DependencyNode` and
//! `LifecycleComponent`.
//!
//! ## Dependency Semantics
//! | Type | Blocks startup | Missing target |
//! |------|----------------|----------------|
//! | `hard` | yes | graph error (unless optional/external) |
//! | `soft` | no, ordered when present | tolerated |
//! | `peer` | no, never ordered | tolerated |
//! | `conditional` | like `hard` while its predicate holds, dropped otherwise | tolerated when dropped |

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Stable identifier of a managed component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    #[default]
    Hard,
    Soft,
    Peer,
    Conditional,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Hard => "hard",
            DependencyType::Soft => "soft",
            DependencyType::Peer => "peer",
            DependencyType::Conditional => "conditional",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Higher priorities resolve earlier under the priority strategy
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub criticality: Criticality,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for ComponentMetadata {
    fn default() -> Self {
        Self {
            priority: 0,
            weight: default_weight(),
            criticality: Criticality::default(),
            labels: BTreeMap::new(),
        }
    }
}

/// Runtime predicate gating a component or a conditional dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationCondition {
    /// Config key must be present; truthy unless `equals` is given
    Config {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<Value>,
    },
    Env {
        var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<String>,
    },
    FeatureFlag { flag: String },
}

impl ActivationCondition {
    pub fn validate(&self) -> Result<(), String> {
        let (field, value) = match self {
            ActivationCondition::Config { key, .. } => ("key", key),
            ActivationCondition::Env { var, .. } => ("var", var),
            ActivationCondition::FeatureFlag { flag } => ("flag", flag),
        };
        if value.trim().is_empty() {
            return Err(format!("condition {} must not be empty", field));
        }
        Ok(())
    }

    pub fn is_met(&self, ctx: &ActivationContext) -> bool {
        match self {
            ActivationCondition::Config { key, equals } => match ctx.values.get(key) {
                None => false,
                Some(actual) => match equals {
                    Some(expected) => actual == expected,
                    None => is_truthy(actual),
                },
            },
            ActivationCondition::Env { var, equals } => match ctx.env.get(var) {
                None => false,
                Some(actual) => equals.as_deref().map_or(true, |expected| expected == actual),
            },
            ActivationCondition::FeatureFlag { flag } => ctx.feature_flags.contains(flag),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        _ => true,
    }
}

/// Placement constraint checked at registration and during hot-swap validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Version { requirement: VersionReq },
    /// Only enforced when the activation context knows its region
    Region { allowed: Vec<String> },
    Capability { name: String },
}

impl Constraint {
    pub fn check(&self, config: &ComponentConfig, ctx: &ActivationContext) -> Result<(), String> {
        match self {
            Constraint::Version { requirement } => {
                if requirement.matches(&config.version) {
                    Ok(())
                } else {
                    Err(format!(
                        "version {} does not satisfy {}",
                        config.version, requirement
                    ))
                }
            }
            Constraint::Region { allowed } => match &ctx.region {
                Some(region) if !allowed.iter().any(|r| r == region) => Err(format!(
                    "region {} not in allowed set [{}]",
                    region,
                    allowed.join(", ")
                )),
                _ => Ok(()),
            },
            Constraint::Capability { name } => {
                if config.capabilities.contains(name) {
                    Ok(())
                } else {
                    Err(format!("missing capability {}", name))
                }
            }
        }
    }
}

/// Values activation conditions and region constraints are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationContext {
    pub values: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub feature_flags: BTreeSet<String>,
    pub region: Option<String>,
}

impl ActivationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_env(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(var.into(), value.into());
        self
    }

    pub fn with_feature_flag(mut self, flag: impl Into<String>) -> Self {
        self.feature_flags.insert(flag.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Snapshot the process environment. Explicit entries take precedence.
    pub fn capture_process_env(mut self) -> Self {
        for (var, value) in std::env::vars() {
            self.env.entry(var).or_insert(value);
        }
        self
    }
}

/// Live configuration of a component. Replaced wholesale by a hot swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub version: Version,

    #[serde(default = "default_settings")]
    pub settings: Value,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
}

fn default_settings() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ComponentConfig {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            settings: default_settings(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        if let Value::Object(map) = &mut self.settings {
            map.insert(key.into(), value);
        }
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.insert(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if !self.settings.is_object() {
            return Err(SpecError::InvalidConfig(
                "settings must be a mapping".to_string(),
            ));
        }
        Ok(())
    }
}

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub id: ComponentId,

    #[serde(default, rename = "type")]
    pub dependency_type: DependencyType,

    #[serde(default)]
    pub optional: bool,

    /// Provided outside this fleet; never expected in the graph
    #[serde(default)]
    pub external: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ActivationCondition>,
}

impl DependencyRef {
    pub fn new(id: impl Into<ComponentId>, dependency_type: DependencyType) -> Self {
        Self {
            id: id.into(),
            dependency_type,
            optional: false,
            external: false,
            version: None,
            condition: None,
        }
    }

    pub fn hard(id: impl Into<ComponentId>) -> Self {
        Self::new(id, DependencyType::Hard)
    }

    pub fn soft(id: impl Into<ComponentId>) -> Self {
        Self::new(id, DependencyType::Soft)
    }

    pub fn peer(id: impl Into<ComponentId>) -> Self {
        Self::new(id, DependencyType::Peer)
    }

    pub fn conditional(id: impl Into<ComponentId>, condition: ActivationCondition) -> Self {
        let mut dep = Self::new(id, DependencyType::Conditional);
        dep.condition = Some(condition);
        dep
    }

    pub fn with_version(mut self, requirement: VersionReq) -> Self {
        self.version = Some(requirement);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    /// False only for a conditional edge whose predicate does not hold.
    pub fn is_active(&self, ctx: &ActivationContext) -> bool {
        match (&self.dependency_type, &self.condition) {
            (DependencyType::Conditional, Some(condition)) => condition.is_met(ctx),
            _ => true,
        }
    }

    /// Whether the target must be resolved before the dependent may start.
    pub fn is_blocking(&self, ctx: &ActivationContext) -> bool {
        if self.optional {
            return false;
        }
        match self.dependency_type {
            DependencyType::Hard => true,
            DependencyType::Conditional => self.is_active(ctx),
            DependencyType::Soft | DependencyType::Peer => false,
        }
    }

    /// Whether a missing target can be skipped.
    pub fn tolerates_absence(&self, ctx: &ActivationContext) -> bool {
        self.external || !self.is_blocking(ctx)
    }
}

/// Registered description of a managed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: ComponentId,

    #[serde(default)]
    pub name: String,

    pub version: Version,

    /// Type applied to every id listed in `depends_on`
    #[serde(default)]
    pub dependency_type: DependencyType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ComponentId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ActivationCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,

    #[serde(default)]
    pub metadata: ComponentMetadata,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub hot_swap_capable: bool,

    #[serde(default = "default_settings")]
    pub settings: Value,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
}

impl ComponentSpec {
    pub fn new(id: impl Into<ComponentId>, version: Version) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            version,
            dependency_type: DependencyType::default(),
            depends_on: Vec::new(),
            dependencies: Vec::new(),
            conditions: Vec::new(),
            constraints: Vec::new(),
            metadata: ComponentMetadata::default(),
            optional: false,
            hot_swap_capable: false,
            settings: default_settings(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on(mut self, id: impl Into<ComponentId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_dependency(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_condition(mut self, condition: ActivationCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.metadata.criticality = criticality;
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.insert(name.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn hot_swappable(mut self) -> Self {
        self.hot_swap_capable = true;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    pub fn is_critical(&self) -> bool {
        self.metadata.criticality == Criticality::Critical
    }

    /// Every declared edge. Detailed `dependencies` entries override a bare
    /// `depends_on` id naming the same target.
    pub fn declared_dependencies(&self) -> Vec<DependencyRef> {
        let mut merged: Vec<DependencyRef> = self
            .depends_on
            .iter()
            .filter(|id| !self.dependencies.iter().any(|d| &d.id == *id))
            .map(|id| DependencyRef::new(id.clone(), self.dependency_type))
            .collect();
        merged.extend(self.dependencies.iter().cloned());
        merged
    }

    pub fn conditions_met(&self, ctx: &ActivationContext) -> bool {
        self.conditions.iter().all(|c| c.is_met(ctx))
    }

    pub fn initial_config(&self) -> ComponentConfig {
        ComponentConfig {
            version: self.version.clone(),
            settings: self.settings.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Check every constraint against `config`, reporting the first violation.
    pub fn check_constraints(
        &self,
        config: &ComponentConfig,
        ctx: &ActivationContext,
    ) -> Result<(), SpecError> {
        for constraint in &self.constraints {
            constraint
                .check(config, ctx)
                .map_err(|reason| SpecError::ConstraintViolation {
                    component: self.id.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.id.as_str().trim().is_empty() {
            return Err(SpecError::EmptyId);
        }

        let mut seen = BTreeSet::new();
        for dep in self.declared_dependencies() {
            if dep.id == self.id {
                return Err(SpecError::SelfDependency(self.id.clone()));
            }
            if !seen.insert(dep.id.clone()) {
                return Err(SpecError::DuplicateDependency {
                    component: self.id.clone(),
                    dependency: dep.id.clone(),
                });
            }
            if let Some(condition) = &dep.condition {
                condition
                    .validate()
                    .map_err(|reason| SpecError::InvalidCondition {
                        component: self.id.clone(),
                        reason,
                    })?;
            }
        }

        for condition in &self.conditions {
            condition
                .validate()
                .map_err(|reason| SpecError::InvalidCondition {
                    component: self.id.clone(),
                    reason,
                })?;
        }

        self.initial_config().validate()
    }
}

/// Lookup of registered specs used for transitive discovery.
pub trait SpecCatalog {
    fn spec(&self, id: &ComponentId) -> Option<&ComponentSpec>;
}

impl SpecCatalog for BTreeMap<ComponentId, ComponentSpec> {
    fn spec(&self, id: &ComponentId) -> Option<&ComponentSpec> {
        self.get(id)
    }
}

impl SpecCatalog for HashMap<ComponentId, ComponentSpec> {
    fn spec(&self, id: &ComponentId) -> Option<&ComponentSpec> {
        self.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    #[error("Component id must not be empty")]
    EmptyId,

    #[error("Component {0} depends on itself")]
    SelfDependency(ComponentId),

    #[error("Component {component} declares {dependency} more than once")]
    DuplicateDependency {
        component: ComponentId,
        dependency: ComponentId,
    },

    #[error("Invalid activation condition on {component}: {reason}")]
    InvalidCondition { component: ComponentId, reason: String },

    #[error("Invalid component config: {0}")]
    InvalidConfig(String),

    #[error("Constraint violated by {component}: {reason}")]
    ConstraintViolation { component: ComponentId, reason: String },
}
