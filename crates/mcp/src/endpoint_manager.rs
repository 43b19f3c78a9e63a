//! Parallel supervision of all upstream endpoints.
//!
//! Each endpoint runs its own state machine; the manager only creates,
//! starts, stops, and snapshots them. Config deltas apply additions before
//! removals so the aggregated catalog is never withdrawn from upstreams
//! unnecessarily. The periodic health pass is informational: reconnects
//! are endpoint-local and never triggered from here.

use crate::endpoint::{Endpoint, EndpointOptions};
use crate::events::EventBus;
use crate::manager::ToolRouter;
use crate::metrics::CallMetrics;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_types::{BridgeError, EndpointState, EndpointStatus};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Process-scoped supervisor for endpoints, keyed by URL. Clones share
/// state.
#[derive(Clone)]
pub struct EndpointManager {
    inner: Arc<EndpointManagerInner>,
}

struct EndpointManagerInner {
    router: Arc<dyn ToolRouter>,
    options: EndpointOptions,
    metrics: Arc<CallMetrics>,
    events: EventBus,
    endpoints: Mutex<IndexMap<String, Endpoint>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl EndpointManager {
    pub fn new(
        router: Arc<dyn ToolRouter>,
        options: EndpointOptions,
        metrics: Arc<CallMetrics>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointManagerInner {
                router,
                options,
                metrics,
                events,
                endpoints: Mutex::new(IndexMap::new()),
                health_task: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn metrics(&self) -> &Arc<CallMetrics> {
        &self.inner.metrics
    }

    /// Create one endpoint per URL and start them in parallel. Returns once
    /// every endpoint has reached `Connected` at least once or exhausted
    /// its attempt budget. Invalid URLs are logged and skipped.
    pub async fn initialize(&self, urls: Vec<String>) -> Result<(), BridgeError> {
        let mut started = Vec::new();
        for url in urls {
            match self.create_endpoint(&url).await {
                Ok(endpoint) => started.push(endpoint),
                Err(error) => warn!(%url, "skipping endpoint: {error}"),
            }
        }

        let mut settling = JoinSet::new();
        for endpoint in started {
            settling.spawn(async move {
                endpoint.start().await;
                let state = endpoint.wait_settled().await;
                (endpoint.url().to_string(), state)
            });
        }
        while let Some(result) = settling.join_next().await {
            if let Ok((url, state)) = result {
                info!(%url, ?state, "endpoint settled");
            }
        }

        self.spawn_health_task().await;
        Ok(())
    }

    /// Register and start one endpoint; returns its settled state.
    pub async fn add_endpoint(&self, url: &str) -> Result<EndpointState, BridgeError> {
        let endpoint = self.create_endpoint(url).await?;
        endpoint.start().await;
        Ok(endpoint.wait_settled().await)
    }

    /// Stop an endpoint and drop it; returns after it has fully stopped.
    pub async fn remove_endpoint(&self, url: &str) -> Result<(), BridgeError> {
        let removed = self.inner.endpoints.lock().await.shift_remove(url);
        let Some(endpoint) = removed else {
            return Err(BridgeError::service_not_found(url));
        };
        endpoint.stop().await;
        info!(%url, "endpoint removed");
        Ok(())
    }

    /// Manually connect a managed endpoint (no-op when already connected).
    pub async fn connect_endpoint(&self, url: &str) -> Result<(), BridgeError> {
        let endpoint = self
            .get_endpoint(url)
            .await
            .ok_or_else(|| BridgeError::service_not_found(url))?;
        endpoint.connect().await
    }

    /// Manually disconnect a managed endpoint without removing it.
    pub async fn disconnect_endpoint(&self, url: &str) -> Result<(), BridgeError> {
        let endpoint = self
            .get_endpoint(url)
            .await
            .ok_or_else(|| BridgeError::service_not_found(url))?;
        endpoint.disconnect().await;
        Ok(())
    }

    /// Reconcile the endpoint set against a new URL list: additions are
    /// applied (and settled) first, then removals are stopped and awaited.
    pub async fn apply_config_delta(&self, urls: Vec<String>) -> Result<(), BridgeError> {
        let current: Vec<String> = self.inner.endpoints.lock().await.keys().cloned().collect();
        let (to_add, to_remove) = compute_delta(&current, &urls);
        info!(
            adding = to_add.len(),
            removing = to_remove.len(),
            "applying endpoint config delta"
        );

        let mut additions = JoinSet::new();
        for url in to_add {
            match self.create_endpoint(&url).await {
                Ok(endpoint) => {
                    additions.spawn(async move {
                        endpoint.start().await;
                        endpoint.wait_settled().await;
                    });
                }
                Err(error) => warn!(%url, "skipping endpoint: {error}"),
            }
        }
        while additions.join_next().await.is_some() {}

        let mut removals = JoinSet::new();
        for url in to_remove {
            let removed = self.inner.endpoints.lock().await.shift_remove(&url);
            if let Some(endpoint) = removed {
                removals.spawn(async move { endpoint.stop().await });
            }
        }
        while removals.join_next().await.is_some() {}
        Ok(())
    }

    pub async fn status(&self) -> Vec<EndpointStatus> {
        let endpoints: Vec<Endpoint> =
            self.inner.endpoints.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            statuses.push(endpoint.status().await);
        }
        statuses
    }

    pub async fn endpoint_status(&self, url: &str) -> Result<EndpointStatus, BridgeError> {
        let endpoint = self
            .get_endpoint(url)
            .await
            .ok_or_else(|| BridgeError::service_not_found(url))?;
        Ok(endpoint.status().await)
    }

    /// Tear down every endpoint and start over from a new URL list.
    pub async fn reset(&self, urls: Vec<String>) -> Result<(), BridgeError> {
        self.shutdown_endpoints().await;
        self.initialize(urls).await
    }

    /// Stop all endpoints and transition the manager to terminal.
    /// Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.health_task.lock().await.take() {
            let _ = handle.await;
        }
        self.shutdown_endpoints().await;
        debug!("endpoint manager stopped");
    }

    async fn shutdown_endpoints(&self) {
        let endpoints: Vec<Endpoint> = {
            let mut map = self.inner.endpoints.lock().await;
            map.drain(..).map(|(_, endpoint)| endpoint).collect()
        };
        let mut stops = JoinSet::new();
        for endpoint in endpoints {
            stops.spawn(async move { endpoint.stop().await });
        }
        while stops.join_next().await.is_some() {}
    }

    async fn get_endpoint(&self, url: &str) -> Option<Endpoint> {
        self.inner.endpoints.lock().await.get(url).cloned()
    }

    /// Build and register a new endpoint; rejects duplicates and invalid
    /// URLs.
    async fn create_endpoint(&self, url: &str) -> Result<Endpoint, BridgeError> {
        let endpoint = Endpoint::new(
            url,
            Arc::clone(&self.inner.router),
            self.inner.options.clone(),
            Arc::clone(&self.inner.metrics),
            self.inner.events.clone(),
        )?;
        let mut endpoints = self.inner.endpoints.lock().await;
        if endpoints.contains_key(url) {
            return Err(BridgeError::config(format!(
                "endpoint '{url}' is already registered"
            )));
        }
        endpoints.insert(url.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Periodic aggregate health log; informational only.
    async fn spawn_health_task(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let endpoints: Vec<Endpoint> =
                    inner.endpoints.lock().await.values().cloned().collect();
                let total = endpoints.len();
                let connected = endpoints
                    .iter()
                    .filter(|e| e.state().is_connected())
                    .count();
                debug!(connected, total, "endpoint health check");
            }
        });
        let mut slot = self.inner.health_task.lock().await;
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }
}

/// Set difference for a config delta: `(new − current, current − new)`.
/// Addition order follows the new list; removal order follows the current
/// registration order.
fn compute_delta(current: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let to_add = desired
        .iter()
        .filter(|url| !current.contains(url))
        .cloned()
        .collect();
    let to_remove = current
        .iter()
        .filter(|url| !desired.contains(url))
        .cloned()
        .collect();
    (to_add, to_remove)
}
