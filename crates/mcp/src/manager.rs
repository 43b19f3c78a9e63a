//! Registry of MCP services and the aggregated tool catalog.
//!
//! Services are kept in config-declaration order; the external catalog is
//! built by sweeping them in that order, with first-seen local names
//! keeping the short form and later collisions exposed as
//! `service__tool`. The reverse map (external name → service + local name)
//! is authoritative for dispatch and is swapped wholesale on rebuild.
//!
//! Catalog names persist while a service is temporarily down (dispatch to
//! them fails with `ServiceUnavailable`) and vanish only when the service
//! is structurally removed, after it has fully disconnected.

use crate::config::ServiceConfig;
use crate::events::{EventBus, ServiceEvent};
use crate::protocol::PROTOCOL_VERSION;
use crate::service::McpService;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_types::{BridgeError, ServiceStatus, ToolDescriptor};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Manager-wide knobs.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// MCP protocol revision advertised to downstream services.
    pub protocol_version: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.into(),
        }
    }
}

/// Narrow capability the endpoint layer needs from the manager. Endpoints
/// hold this as `Arc<dyn ToolRouter>`, avoiding any ownership cycle.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    async fn list_tools(&self) -> Vec<ToolDescriptor>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError>;
}

#[derive(Default, Clone)]
struct Catalog {
    /// External descriptors in publication order.
    tools: Vec<ToolDescriptor>,
    /// external name → (service name, local name).
    reverse: HashMap<String, (String, String)>,
}

/// Process-scoped registry of services. Clones share state.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    options: ManagerOptions,
    /// Declaration-ordered service handles.
    services: RwLock<Vec<McpService>>,
    /// Last-known tool tables per service, surviving reconnect blips.
    known_tools: RwLock<HashMap<String, Vec<ToolDescriptor>>>,
    catalog: RwLock<Catalog>,
    events: EventBus,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ServiceManager {
    pub fn new(options: ManagerOptions, events: EventBus) -> Self {
        let manager = Self {
            inner: Arc::new(ManagerInner {
                options,
                services: RwLock::new(Vec::new()),
                known_tools: RwLock::new(HashMap::new()),
                catalog: RwLock::new(Catalog::default()),
                events,
                refresh_task: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        };
        manager.spawn_refresh_task();
        manager
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Create one service per config and connect them all concurrently.
    /// Individual connect failures are logged; their reconnect loops keep
    /// working in the background.
    pub async fn load(&self, configs: Vec<ServiceConfig>) -> Result<(), BridgeError> {
        let mut created = Vec::new();
        for config in configs {
            let name = config.name.clone();
            match McpService::new(
                config,
                self.inner.options.protocol_version.clone(),
                self.inner.events.clone(),
            ) {
                Ok(service) => created.push(service),
                Err(error) => warn!(service = %name, "skipping invalid service config: {error}"),
            }
        }

        let mut registered = Vec::new();
        {
            let mut services = self.inner.services.write().await;
            for service in created {
                if services.iter().any(|s| s.name() == service.name()) {
                    warn!(service = %service.name(), "duplicate service name in config, skipping");
                    continue;
                }
                services.push(service.clone());
                registered.push(service);
            }
        }

        let mut connects = JoinSet::new();
        for service in registered {
            connects.spawn(async move {
                let name = service.name().to_string();
                if let Err(error) = service.connect().await {
                    warn!(service = %name, "initial connect failed: {error}");
                }
            });
        }
        while connects.join_next().await.is_some() {}

        self.inner.rebuild_catalog().await;
        Ok(())
    }

    /// Register and connect one service at runtime.
    pub async fn add_service(&self, config: ServiceConfig) -> Result<(), BridgeError> {
        let service = McpService::new(
            config,
            self.inner.options.protocol_version.clone(),
            self.inner.events.clone(),
        )?;
        {
            let mut services = self.inner.services.write().await;
            if services.iter().any(|s| s.name() == service.name()) {
                return Err(BridgeError::config(format!(
                    "service '{}' is already registered",
                    service.name()
                )));
            }
            services.push(service.clone());
        }
        info!(service = %service.name(), "service added");
        let connect_result = service.connect().await;
        self.inner.rebuild_catalog().await;
        connect_result
    }

    /// Stop a service and drop it from the registry. Its catalog names
    /// vanish only after the service has fully disconnected.
    pub async fn remove_service(&self, name: &str) -> Result<(), BridgeError> {
        let service = self
            .get_service(name)
            .await
            .ok_or_else(|| BridgeError::service_not_found(name))?;
        service.stop().await;
        {
            let mut services = self.inner.services.write().await;
            services.retain(|s| s.name() != name);
        }
        self.inner.known_tools.write().await.remove(name);
        self.inner.rebuild_catalog().await;
        info!(service = %name, "service removed");
        Ok(())
    }

    /// Remove + add; no in-place mutation of a connected service.
    pub async fn update_service(&self, config: ServiceConfig) -> Result<(), BridgeError> {
        self.remove_service(&config.name).await?;
        self.add_service(config).await
    }

    pub async fn get_service(&self, name: &str) -> Option<McpService> {
        self.inner
            .services
            .read()
            .await
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// The aggregated external catalog, in publication order.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.catalog.read().await.tools.clone()
    }

    /// Dispatch a tool call to its owning service.
    pub async fn call_tool(&self, external: &str, arguments: Value) -> Result<Value, BridgeError> {
        let (service_name, local_name) = {
            let catalog = self.inner.catalog.read().await;
            catalog
                .reverse
                .get(external)
                .cloned()
                .ok_or_else(|| BridgeError::tool_not_found(external))?
        };
        let service = self
            .get_service(&service_name)
            .await
            .ok_or_else(|| BridgeError::tool_not_found(external))?;
        if !service.state().is_connected() {
            return Err(BridgeError::service_unavailable(&service_name));
        }
        service.call_tool(&local_name, arguments).await
    }

    pub async fn status(&self) -> Vec<ServiceStatus> {
        let services: Vec<McpService> = self.inner.services.read().await.clone();
        let mut statuses = Vec::with_capacity(services.len());
        for service in services {
            statuses.push(service.status().await);
        }
        statuses
    }

    pub async fn service_status(&self, name: &str) -> Result<ServiceStatus, BridgeError> {
        let service = self
            .get_service(name)
            .await
            .ok_or_else(|| BridgeError::service_not_found(name))?;
        Ok(service.status().await)
    }

    /// Tear down every service and start over from a new config set.
    pub async fn reset(&self, configs: Vec<ServiceConfig>) -> Result<(), BridgeError> {
        self.shutdown_services().await;
        self.load(configs).await
    }

    /// Stop every service and clear the catalog. Terminal and idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.refresh_task.lock().await.take() {
            let _ = handle.await;
        }
        self.shutdown_services().await;
        debug!("service manager stopped");
    }

    async fn shutdown_services(&self) {
        let services: Vec<McpService> = self.inner.services.write().await.drain(..).collect();
        let mut stops = JoinSet::new();
        for service in services {
            stops.spawn(async move { service.stop().await });
        }
        while stops.join_next().await.is_some() {}
        self.inner.known_tools.write().await.clear();
        *self.inner.catalog.write().await = Catalog::default();
    }

    /// Keeps the catalog in step with tool-table changes reported by
    /// services; structural changes rebuild inline.
    fn spawn_refresh_task(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut events = inner.events.subscribe_services();
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ServiceEvent::Connected { .. } | ServiceEvent::ToolsUpdated { .. }) => {
                            inner.rebuild_catalog().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "event stream lagged; rebuilding catalog");
                            inner.rebuild_catalog().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        // Uncontended: `new` owns the only reference at this point.
        if let Ok(mut slot) = self.inner.refresh_task.try_lock() {
            *slot = Some(handle);
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_service_for_tests(&self, service: McpService) {
        self.inner.services.write().await.push(service);
        self.inner.rebuild_catalog().await;
    }
}

impl ManagerInner {
    /// Recompute the external catalog and swap it in.
    async fn rebuild_catalog(&self) {
        let services: Vec<McpService> = self.services.read().await.clone();

        // Refresh the last-known tool tables from currently connected
        // services; names owned by a down service stay published.
        let mut refreshed = Vec::new();
        for service in &services {
            if service.state().is_connected() {
                refreshed.push((service.name().to_string(), service.tools().await));
            }
        }
        {
            let mut known = self.known_tools.write().await;
            for (name, tools) in refreshed {
                known.insert(name, tools);
            }
        }

        let known = self.known_tools.read().await;
        let mut catalog = Catalog::default();
        for service in &services {
            let Some(tools) = known.get(service.name()) else {
                continue;
            };
            for tool in tools {
                let external = if catalog.reverse.contains_key(&tool.name) {
                    format!("{}__{}", service.name(), tool.name)
                } else {
                    tool.name.clone()
                };
                if catalog.reverse.contains_key(&external) {
                    warn!(
                        service = %service.name(),
                        tool = %tool.name,
                        "prefixed tool name still collides, skipping"
                    );
                    continue;
                }
                catalog.reverse.insert(
                    external.clone(),
                    (service.name().to_string(), tool.name.clone()),
                );
                catalog.tools.push(ToolDescriptor {
                    name: external,
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    owning_service: service.name().to_string(),
                });
            }
        }
        drop(known);

        debug!(tools = catalog.tools.len(), "catalog rebuilt");
        *self.catalog.write().await = catalog;
    }
}

#[async_trait]
impl ToolRouter for ServiceManager {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        ServiceManager::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        ServiceManager::call_tool(self, name, arguments).await
    }
}
