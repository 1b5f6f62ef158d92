// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Fleet Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Collaborators (alerting, dashboards, the CLI) subscribe instead of
// registering global listeners.
//
// In-memory only: events published with no subscriber are dropped.

use crate::domain::component::ComponentId;
use crate::domain::events::FleetEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to fleet events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FleetEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a fleet event to all subscribers
    pub fn publish(&self, event: FleetEvent) {
        debug!(kind = ?event.kind, component_id = ?event.component_id, "Publishing fleet event");

        // send() only fails when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all fleet events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single component
    pub fn subscribe_component(&self, component_id: ComponentId) -> ComponentEventReceiver {
        ComponentEventReceiver {
            receiver: self.sender.subscribe(),
            component_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all fleet events
pub struct EventReceiver {
    receiver: broadcast::Receiver<FleetEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<FleetEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<FleetEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for a single component's events (filtered)
pub struct ComponentEventReceiver {
    receiver: broadcast::Receiver<FleetEvent>,
    component_id: ComponentId,
}

impl ComponentEventReceiver {
    /// Receive the next event concerning the subscribed component
    pub async fn recv(&mut self) -> Result<FleetEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.concerns(&self.component_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
