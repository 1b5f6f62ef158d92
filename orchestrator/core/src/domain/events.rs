// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::component::ComponentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Typed fleet events published on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetEventKind {
    // Registration
    Registered,
    Deregistered,

    // Lifecycle
    Starting,
    Started,
    Stopping,
    Stopped,
    ComponentFailed,
    Restarting,
    Restarted,
    Isolated,
    Resumed,
    MaintenanceEntered,
    MaintenanceExited,

    // Hot swap
    HotSwapStarted,
    HotSwapCompleted,
    HotSwapFailed,

    // Health and failure detection
    HeartbeatMissed,
    HealthCheckFailed,
    HealthChanged,
    FailureDetected,
    FailureEscalated,
    CircuitOpened,
    CircuitClosed,
    SystemHealthCritical,

    // Resolution
    NodeResolved,
    NodeSkipped,
    NodeFailed,
    ConflictResolved,
    CircularDependencyDetected,

    // System
    ShutdownStarted,
    ShutdownCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl FleetEventKind {
    pub fn default_severity(&self) -> EventSeverity {
        use FleetEventKind::*;
        match self {
            HeartbeatMissed | HealthCheckFailed | HealthChanged | CircuitOpened | Isolated
            | NodeSkipped | Restarting => EventSeverity::Warning,
            ComponentFailed | HotSwapFailed | FailureDetected | NodeFailed
            | CircularDependencyDetected => EventSeverity::Error,
            FailureEscalated | SystemHealthCritical => EventSeverity::Critical,
            _ => EventSeverity::Info,
        }
    }
}

/// Structured event: type, component, timestamp, payload and severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    pub id: Uuid,
    pub kind: FleetEventKind,
    pub component_id: Option<ComponentId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub severity: EventSeverity,
}

impl FleetEvent {
    pub fn new(kind: FleetEventKind, component_id: Option<ComponentId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            component_id,
            timestamp: Utc::now(),
            payload: Value::Null,
            severity: kind.default_severity(),
        }
    }

    pub fn component(kind: FleetEventKind, component_id: &ComponentId) -> Self {
        Self::new(kind, Some(component_id.clone()))
    }

    pub fn system(kind: FleetEventKind) -> Self {
        Self::new(kind, None)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn concerns(&self, id: &ComponentId) -> bool {
        self.component_id.as_ref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_snake_case_kind() {
        let event = FleetEvent::component(FleetEventKind::HotSwapFailed, &"api".into())
            .with_payload(json!({"stage": "validation"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "hot_swap_failed");
        assert_eq!(value["severity"], "error");
        assert_eq!(value["component_id"], "api");
        assert_eq!(value["payload"]["stage"], "validation");
    }

    #[test]
    fn test_severity_override() {
        let event = FleetEvent::system(FleetEventKind::ShutdownStarted)
            .with_severity(EventSeverity::Warning);
        assert_eq!(event.severity, EventSeverity::Warning);
        assert!(!event.concerns(&"api".into()));
    }
}
