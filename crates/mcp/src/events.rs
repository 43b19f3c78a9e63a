//! Lifecycle events for services and endpoints.
//!
//! Delivery is best-effort over broadcast channels: send results are
//! ignored so that emitting from a core loop can never block or fail it.

use std::sync::Arc;
use tokio::sync::broadcast;

/// Service lifecycle transitions.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Connecting { name: String },
    Connected { name: String, tool_count: usize },
    ToolsUpdated { name: String },
    Reconnecting { name: String, attempt: u32 },
    Failed { name: String, error: String },
    Disconnected { name: String },
}

/// Endpoint lifecycle transitions.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Connecting { url: String },
    Connected { url: String },
    Reconnecting { url: String, attempt: u32 },
    Failed { url: String, error: String },
    Disconnected { url: String },
}

/// Shared event fan-out for both halves of the bridge.
#[derive(Clone)]
pub struct EventBus {
    services: Arc<broadcast::Sender<ServiceEvent>>,
    endpoints: Arc<broadcast::Sender<EndpointEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (services, _) = broadcast::channel(64);
        let (endpoints, _) = broadcast::channel(64);
        Self {
            services: Arc::new(services),
            endpoints: Arc::new(endpoints),
        }
    }

    pub fn subscribe_services(&self) -> broadcast::Receiver<ServiceEvent> {
        self.services.subscribe()
    }

    pub fn subscribe_endpoints(&self) -> broadcast::Receiver<EndpointEvent> {
        self.endpoints.subscribe()
    }

    pub fn emit_service(&self, event: ServiceEvent) {
        let _ = self.services.send(event);
    }

    pub fn emit_endpoint(&self, event: EndpointEvent) {
        let _ = self.endpoints.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
