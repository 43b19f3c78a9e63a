//! One downstream MCP service connection.
//!
//! `McpService` drives the full connection lifecycle: `connect()` opens
//! the transport, runs the MCP handshake
//! (`initialize` → `notifications/initialized`), fetches the tool table,
//! and then keeps the connection alive with a ping loop and a single-flight
//! reconnect loop with exponential backoff. All request/response matching
//! goes through the pending table; a transport loss fails every in-flight
//! request and hands control to the reconnect machinery.

use crate::config::ServiceConfig;
use crate::events::{EventBus, ServiceEvent};
use crate::pending::PendingRequests;
use crate::protocol::{
    self, Frame, Notification, Request, RequestId, Response, ToolListResult, methods,
};
use crate::retry::Backoff;
use crate::transport::{FrameSender, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use switchboard_types::{
    BridgeError, JSONRPC_METHOD_NOT_FOUND, ServiceState, ServiceStatus, ToolDescriptor,
};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to one managed service connection. Clones share state.
#[derive(Clone)]
pub struct McpService {
    inner: Arc<ServiceInner>,
}

pub(crate) struct ServiceInner {
    config: ServiceConfig,
    transport_label: &'static str,
    protocol_version: String,
    state_tx: watch::Sender<ServiceState>,
    initialized: AtomicBool,
    tools: RwLock<IndexMap<String, ToolDescriptor>>,
    pending: PendingRequests,
    next_id: AtomicI64,
    sender: Mutex<Option<FrameSender>>,
    conn_cancel: Mutex<Option<CancellationToken>>,
    connect_lock: Mutex<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    ping_failures: AtomicU32,
    last_ping_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
    events: EventBus,
}

impl McpService {
    /// Validate the config and build a disconnected service.
    pub fn new(
        config: ServiceConfig,
        protocol_version: impl Into<String>,
        events: EventBus,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let transport_label = config.transport_kind()?.as_str();
        let (state_tx, _) = watch::channel(ServiceState::Disconnected);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                transport_label,
                protocol_version: protocol_version.into(),
                state_tx,
                initialized: AtomicBool::new(false),
                tools: RwLock::new(IndexMap::new()),
                pending: PendingRequests::new(),
                next_id: AtomicI64::new(1),
                sender: Mutex::new(None),
                conn_cancel: Mutex::new(None),
                connect_lock: Mutex::new(()),
                reconnect_task: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                ping_failures: AtomicU32::new(0),
                last_ping_at: Mutex::new(None),
                last_error: Mutex::new(None),
                shutdown: CancellationToken::new(),
                events,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    /// Watch state transitions (used by the managers to await settlement).
    pub fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.inner.state_tx.subscribe()
    }

    /// Open the transport, perform the MCP handshake, and fetch tools.
    ///
    /// On failure the reconnect machinery takes over per the service's
    /// reconnect options; a configuration error is fatal and leaves the
    /// service `Failed`.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        if inner.state().is_connected() {
            return Ok(());
        }
        inner.set_state(ServiceState::Connecting);
        inner.events.emit_service(ServiceEvent::Connecting {
            name: inner.config.name.clone(),
        });

        match inner.establish().await {
            Ok(()) => {
                inner.reconnect_attempts.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => {
                *inner.last_error.lock().await = Some(error.to_string());
                if matches!(error, BridgeError::Config { .. }) {
                    inner.set_state(ServiceState::Failed);
                    inner.events.emit_service(ServiceEvent::Failed {
                        name: inner.config.name.clone(),
                        error: error.to_string(),
                    });
                } else {
                    ServiceInner::schedule_reconnect(inner).await;
                }
                Err(error)
            }
        }
    }

    /// Invoke a tool by its service-local name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        let inner = &self.inner;
        if !inner.state().is_connected() {
            return Err(BridgeError::service_unavailable(&inner.config.name));
        }
        let params = json!({ "name": name, "arguments": arguments });
        let result = inner
            .request(methods::TOOLS_CALL, params, inner.config.timeout())
            .await
            .map_err(|error| match error {
                // Attach the tool name the caller actually used.
                BridgeError::ToolExecution { message, .. } => {
                    BridgeError::tool_execution(name, message)
                }
                other => other,
            })?;
        if protocol::tool_result_is_error(&result) {
            return Err(BridgeError::tool_execution(
                name,
                protocol::tool_result_text(&result),
            ));
        }
        Ok(result)
    }

    /// Service-local tool table snapshot.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.inner.tools.read().await.values().cloned().collect()
    }

    /// Close the connection and cancel any reconnect loop; the service can
    /// be connected again later.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if let Some(handle) = inner.reconnect_task.lock().await.take() {
            handle.abort();
        }
        inner
            .pending
            .fail_all(|method| {
                BridgeError::transport(format!("disconnected while awaiting {method}"))
            })
            .await;
        inner.teardown_connection().await;
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        inner.ping_failures.store(0, Ordering::SeqCst);
        if inner.set_state(ServiceState::Disconnected) {
            inner.events.emit_service(ServiceEvent::Disconnected {
                name: inner.config.name.clone(),
            });
        }
    }

    /// Terminal, idempotent shutdown.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.reconnect_task.lock().await.take() {
            // The loop observes the shutdown token at its next await point.
            let _ = handle.await;
        }
        self.disconnect().await;
    }

    pub async fn status(&self) -> ServiceStatus {
        let inner = &self.inner;
        ServiceStatus {
            name: inner.config.name.clone(),
            state: inner.state(),
            transport: inner.transport_label.to_string(),
            tool_count: inner.tools.read().await.len(),
            initialized: inner.initialized.load(Ordering::SeqCst),
            last_ping_at: *inner.last_ping_at.lock().await,
            ping_failure_count: inner.ping_failures.load(Ordering::SeqCst),
            reconnect_attempts: inner.reconnect_attempts.load(Ordering::SeqCst),
            last_error: inner.last_error.lock().await.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ServiceInner> {
        &self.inner
    }
}

impl ServiceInner {
    pub(crate) fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Returns true when the state actually changed.
    fn set_state(&self, new_state: ServiceState) -> bool {
        let old_state = *self.state_tx.borrow();
        if old_state == new_state {
            return false;
        }
        info!(
            service = %self.config.name,
            "state {old_state:?} -> {new_state:?}"
        );
        if !new_state.is_connected() {
            self.initialized.store(false, Ordering::SeqCst);
        }
        self.state_tx.send_replace(new_state);
        true
    }

    /// Open transport, handshake, fetch tools, arm the ping loop.
    ///
    /// Serialized behind `connect_lock` so a manual `connect()` cannot race
    /// the reconnect loop into two live connections.
    pub(crate) async fn establish(self: &Arc<Self>) -> Result<(), BridgeError> {
        let _guard = self.connect_lock.lock().await;
        self.teardown_connection().await;

        let transport = Transport::from_config(&self.config)?;
        let conn_cancel = self.shutdown.child_token();
        let handle = tokio::time::timeout(
            self.config.timeout(),
            transport.open(conn_cancel.clone()),
        )
        .await
        .map_err(|_| BridgeError::timeout("transport open", self.config.timeout_ms))??;

        let (sender, events, _) = handle.split();
        *self.sender.lock().await = Some(sender.clone());
        *self.conn_cancel.lock().await = Some(conn_cancel.clone());
        tokio::spawn(ServiceInner::run_reader(
            Arc::clone(self),
            events,
            conn_cancel.clone(),
        ));

        let handshake = async {
            let init_params = json!({
                "protocolVersion": self.protocol_version,
                "capabilities": {},
                "clientInfo": {
                    "name": "switchboard",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            });
            let init_result = self
                .request(methods::INITIALIZE, init_params, self.config.timeout())
                .await?;
            if let Some(server) = init_result.get("serverInfo") {
                debug!(service = %self.config.name, "handshake with {server}");
            }
            let initialized = serde_json::to_value(Notification::new(methods::INITIALIZED))
                .map_err(|e| BridgeError::internal(format!("serialize notification: {e}")))?;
            sender.send(initialized).await?;

            let tools_result = self
                .request(methods::TOOLS_LIST, json!({}), self.config.timeout())
                .await?;
            let listed: ToolListResult = serde_json::from_value(tools_result)
                .map_err(|e| BridgeError::protocol(format!("invalid tools/list result: {e}")))?;
            let mut table = IndexMap::new();
            for tool in listed.tools {
                table.insert(
                    tool.name.clone(),
                    ToolDescriptor {
                        name: tool.name,
                        description: tool.description,
                        input_schema: tool.input_schema,
                        owning_service: self.config.name.clone(),
                    },
                );
            }
            let count = table.len();
            *self.tools.write().await = table;
            Ok::<usize, BridgeError>(count)
        }
        .await;

        match handshake {
            Ok(tool_count) => {
                info!(service = %self.config.name, tool_count, "service connected");
                self.initialized.store(true, Ordering::SeqCst);
                self.ping_failures.store(0, Ordering::SeqCst);
                *self.last_error.lock().await = None;
                self.set_state(ServiceState::Connected);
                self.events.emit_service(ServiceEvent::Connected {
                    name: self.config.name.clone(),
                    tool_count,
                });
                self.events.emit_service(ServiceEvent::ToolsUpdated {
                    name: self.config.name.clone(),
                });
                if self.config.ping.enabled {
                    tokio::spawn(ServiceInner::run_ping_loop(
                        Arc::clone(self),
                        conn_cancel.child_token(),
                    ));
                }
                Ok(())
            }
            Err(error) => {
                conn_cancel.cancel();
                *self.sender.lock().await = None;
                Err(error)
            }
        }
    }

    /// Send one JSON-RPC request and await its response or the deadline.
    /// A timeout drops the pending entry but leaves the transport alone.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::transport("not connected"))?;

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let receiver = self.pending.register(id.clone(), method).await;
        let frame = serde_json::to_value(Request::new(id.clone(), method, params))
            .map_err(|e| BridgeError::internal(format!("serialize request: {e}")))?;

        if let Err(error) = sender.send(frame).await {
            self.pending.remove(&id).await;
            return Err(error);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::transport(
                "connection closed while awaiting response",
            )),
            Err(_) => {
                self.pending.remove(&id).await;
                Err(BridgeError::timeout(method, timeout.as_millis() as u64))
            }
        }
    }

    /// Returns a boxed future (rather than being a plain `async fn`) to
    /// break a recursive-opaque-type cycle: this function calls
    /// `on_connection_lost`, which can schedule a reconnect loop that
    /// awaits `establish`, which in turn spawns this function again.
    /// Giving this one link in the cycle a concrete, explicitly `Send`
    /// boxed type lets rustc's auto-trait inference terminate.
    fn run_reader(
        inner: Arc<ServiceInner>,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(TransportEvent::Frame(frame)) => inner.handle_frame(frame).await,
                        Some(TransportEvent::Closed { reason }) => {
                            ServiceInner::on_connection_lost(&inner, reason, &cancel).await;
                            break;
                        }
                        None => {
                            if !cancel.is_cancelled() {
                                ServiceInner::on_connection_lost(
                                    &inner,
                                    "transport tasks exited".into(),
                                    &cancel,
                                )
                                .await;
                            }
                            break;
                        }
                    }
                }
            }
        })
    }

    pub(crate) async fn handle_frame(&self, frame: Value) {
        match Frame::from_value(frame) {
            Ok(Frame::Response(response)) => {
                let delivered = self
                    .pending
                    .complete(&response.id, |method| match &response.error {
                        Some(err) if method == methods::TOOLS_CALL => Err(
                            BridgeError::tool_execution(method, format!("{} ({})", err.message, err.code)),
                        ),
                        Some(err) => Err(BridgeError::protocol(format!(
                            "{method} failed: {} ({})",
                            err.message, err.code
                        ))),
                        None => Ok(response.result.clone().unwrap_or(Value::Null)),
                    })
                    .await;
                if delivered.is_none() {
                    warn!(
                        service = %self.config.name,
                        id = %response.id,
                        "discarding response with no outstanding request"
                    );
                }
            }
            Ok(Frame::Request(request)) => {
                // Downstream servers probe liveness with ping; everything
                // else we do not serve.
                let reply = if request.method == methods::PING {
                    Response::ok(request.id, json!({}))
                } else {
                    debug!(
                        service = %self.config.name,
                        method = %request.method,
                        "rejecting request from service"
                    );
                    Response::err(
                        request.id,
                        JSONRPC_METHOD_NOT_FOUND,
                        format!("Method not found: {}", request.method),
                    )
                };
                let sender = self.sender.lock().await.clone();
                if let (Some(sender), Ok(frame)) = (sender, serde_json::to_value(reply)) {
                    let _ = sender.send(frame).await;
                }
            }
            Ok(Frame::Notification(notification)) => {
                debug!(
                    service = %self.config.name,
                    method = %notification.method,
                    "notification from service"
                );
            }
            Err(error) => {
                warn!(service = %self.config.name, "dropping malformed frame: {error}");
            }
        }
    }

    /// Failure path for a live connection: fail in-flight requests, tear the
    /// connection down, and hand off to the reconnect machinery. `conn` is
    /// the token of the connection that observed the failure; a token that
    /// is already cancelled means the connection was torn down on purpose
    /// (or the failure was already handled) and there is nothing to do.
    pub(crate) async fn on_connection_lost(
        inner: &Arc<ServiceInner>,
        reason: String,
        conn: &CancellationToken,
    ) {
        if conn.is_cancelled() || inner.state().is_terminal() {
            return;
        }
        warn!(service = %inner.config.name, %reason, "connection lost");
        *inner.last_error.lock().await = Some(reason.clone());
        inner
            .pending
            .fail_all(|method| BridgeError::transport(format!("{reason} (awaiting {method})")))
            .await;
        inner.teardown_connection().await;
        if inner.shutdown.is_cancelled() {
            inner.set_state(ServiceState::Disconnected);
            return;
        }
        ServiceInner::schedule_reconnect(inner).await;
    }

    async fn teardown_connection(&self) {
        if let Some(token) = self.conn_cancel.lock().await.take() {
            token.cancel();
        }
        *self.sender.lock().await = None;
        self.initialized.store(false, Ordering::SeqCst);
        self.tools.write().await.clear();
    }

    /// Move to `Reconnecting` and spawn the backoff loop, or to `Failed`
    /// when reconnecting is disabled or the budget is spent. At most one
    /// loop exists per service.
    pub(crate) async fn schedule_reconnect(inner: &Arc<ServiceInner>) {
        let mut slot = inner.reconnect_task.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let options = &inner.config.reconnect;
        if !options.enabled
            || options.max_attempts == 0
            || inner.reconnect_attempts.load(Ordering::SeqCst) >= options.max_attempts
        {
            if inner.set_state(ServiceState::Failed) {
                let error = inner
                    .last_error
                    .lock()
                    .await
                    .clone()
                    .unwrap_or_else(|| "reconnect exhausted".into());
                inner.events.emit_service(ServiceEvent::Failed {
                    name: inner.config.name.clone(),
                    error,
                });
            }
            return;
        }
        inner.set_state(ServiceState::Reconnecting);
        *slot = Some(tokio::spawn(ServiceInner::run_reconnect_loop(Arc::clone(
            inner,
        ))));
    }

    async fn run_reconnect_loop(inner: Arc<ServiceInner>) {
        let options = inner.config.reconnect.clone();
        let backoff = Backoff::from_options(&options);
        loop {
            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > options.max_attempts {
                if inner.set_state(ServiceState::Failed) {
                    inner.events.emit_service(ServiceEvent::Failed {
                        name: inner.config.name.clone(),
                        error: format!("gave up after {} reconnect attempts", options.max_attempts),
                    });
                }
                break;
            }
            let delay = backoff.delay_for(attempt);
            info!(
                service = %inner.config.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            inner.events.emit_service(ServiceEvent::Reconnecting {
                name: inner.config.name.clone(),
                attempt,
            });
            match inner.establish().await {
                Ok(()) => {
                    inner.reconnect_attempts.store(0, Ordering::SeqCst);
                    break;
                }
                Err(error) => {
                    warn!(
                        service = %inner.config.name,
                        attempt,
                        "reconnect attempt failed: {error}"
                    );
                    *inner.last_error.lock().await = Some(error.to_string());
                    if matches!(error, BridgeError::Config { .. }) {
                        inner.set_state(ServiceState::Failed);
                        break;
                    }
                }
            }
        }
    }

    /// Liveness loop; runs only while the owning connection is alive (its
    /// token is a child of the connection token).
    ///
    /// Returns a boxed future (rather than being a plain `async fn`) to
    /// break a recursive-opaque-type cycle: this function calls
    /// `on_connection_lost`, which can schedule a reconnect loop that
    /// awaits `establish`, which in turn spawns this function again.
    /// Giving this one link in the cycle a concrete, explicitly `Send`
    /// boxed type lets rustc's auto-trait inference terminate.
    pub(crate) fn run_ping_loop(
        inner: Arc<ServiceInner>,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let options = inner.config.ping.clone();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(options.start_delay_ms)) => {}
            }
            let mut ticker =
                tokio::time::interval(Duration::from_millis(options.interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let threshold = options.max_failures.max(1);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if !inner.state().is_connected() {
                    return;
                }
                match inner
                    .request(
                        methods::PING,
                        json!({}),
                        Duration::from_millis(options.timeout_ms),
                    )
                    .await
                {
                    Ok(_) => {
                        inner.ping_failures.store(0, Ordering::SeqCst);
                        *inner.last_ping_at.lock().await = Some(Utc::now());
                    }
                    Err(error) => {
                        let failures = inner.ping_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        warn!(
                            service = %inner.config.name,
                            failures,
                            "ping failed: {error}"
                        );
                        if failures >= threshold {
                            ServiceInner::on_connection_lost(
                                &inner,
                                format!("{failures} consecutive ping failures"),
                                &cancel,
                            )
                            .await;
                            return;
                        }
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) async fn test_install_connection(
        &self,
        sender: FrameSender,
        tools: Vec<ToolDescriptor>,
    ) -> CancellationToken {
        let conn = self.shutdown.child_token();
        *self.sender.lock().await = Some(sender);
        *self.conn_cancel.lock().await = Some(conn.clone());
        let mut table = IndexMap::new();
        for tool in tools {
            table.insert(tool.name.clone(), tool);
        }
        *self.tools.write().await = table;
        self.initialized.store(true, Ordering::SeqCst);
        self.set_state(ServiceState::Connected);
        conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PingOptions, ReconnectOptions};

    fn test_config(reconnect: ReconnectOptions, ping: PingOptions) -> ServiceConfig {
        ServiceConfig {
            name: "calc".into(),
            command: Some("true".into()),
            reconnect,
            ping,
            timeout_ms: 200,
            ..ServiceConfig::default()
        }
    }

    fn no_reconnect() -> ReconnectOptions {
        ReconnectOptions {
            enabled: true,
            max_attempts: 0,
            ..ReconnectOptions::default()
        }
    }

    fn test_service(reconnect: ReconnectOptions, ping: PingOptions) -> McpService {
        McpService::new(
            test_config(reconnect, ping),
            protocol::PROTOCOL_VERSION,
            EventBus::new(),
        )
        .unwrap()
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: None,
            input_schema: json!({}),
            owning_service: "calc".into(),
        }
    }

    fn test_sender() -> (FrameSender, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(16);
        (FrameSender::new(tx), rx)
    }

    #[tokio::test]
    async fn call_tool_requires_connected_state() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        let err = service.call_tool("add", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn call_tool_round_trip_via_pending_table() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        let (sender, mut outbound) = test_sender();
        service
            .inner()
            .test_install_connection(sender, vec![descriptor("add")])
            .await;

        let call = {
            let service = service.clone();
            tokio::spawn(async move { service.call_tool("add", json!({"a": 1, "b": 2})).await })
        };

        // Observe the outbound request and answer it by id.
        let frame = outbound.recv().await.expect("request frame");
        assert_eq!(frame["method"], "tools/call");
        assert_eq!(frame["params"]["name"], "add");
        let id: i64 = frame["id"].as_i64().unwrap();
        service
            .inner()
            .handle_frame(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"content": [{"type": "text", "text": "3"}]}
            }))
            .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result["content"][0]["text"], "3");
        assert!(service.inner().pending.is_empty().await);
    }

    #[tokio::test]
    async fn tool_error_results_map_to_tool_execution() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        let (sender, mut outbound) = test_sender();
        service
            .inner()
            .test_install_connection(sender, vec![descriptor("div")])
            .await;

        let call = {
            let service = service.clone();
            tokio::spawn(async move { service.call_tool("div", json!({"a": 1, "b": 0})).await })
        };
        let frame = outbound.recv().await.expect("request frame");
        let id = frame["id"].as_i64().unwrap();
        service
            .inner()
            .handle_frame(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"isError": true, "content": [{"type": "text", "text": "division by zero"}]}
            }))
            .await;

        let err = call.await.unwrap().unwrap_err();
        match err {
            BridgeError::ToolExecution { tool, message } => {
                assert_eq!(tool, "div");
                assert!(message.contains("division by zero"));
            }
            other => panic!("expected ToolExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn responses_with_unknown_ids_are_dropped() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        let (sender, _outbound) = test_sender();
        service
            .inner()
            .test_install_connection(sender, vec![])
            .await;

        // Must not panic or disturb state.
        service
            .inner()
            .handle_frame(json!({"jsonrpc": "2.0", "id": 4242, "result": {}}))
            .await;
        assert!(service.inner().pending.is_empty().await);
        assert_eq!(service.state(), ServiceState::Connected);
    }

    #[tokio::test]
    async fn downstream_ping_requests_get_empty_replies() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        let (sender, mut outbound) = test_sender();
        service
            .inner()
            .test_install_connection(sender, vec![])
            .await;

        service
            .inner()
            .handle_frame(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}))
            .await;
        let reply = outbound.recv().await.expect("reply frame");
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn transport_loss_fails_pending_and_clears_tools() {
        let service = test_service(no_reconnect(), PingOptions::default());
        let (sender, _outbound) = test_sender();
        let conn = service
            .inner()
            .test_install_connection(sender, vec![descriptor("add")])
            .await;

        let rx = service
            .inner()
            .pending
            .register(RequestId::Number(1), "tools/call")
            .await;
        ServiceInner::on_connection_lost(service.inner(), "peer went away".into(), &conn).await;

        assert!(service.inner().pending.is_empty().await);
        assert!(rx.await.unwrap().is_err());
        assert!(service.tools().await.is_empty());
        // maxAttempts = 0: first transport error is terminal.
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn at_most_one_reconnect_loop() {
        let reconnect = ReconnectOptions {
            enabled: true,
            max_attempts: 5,
            initial_interval_ms: 60_000,
            ..ReconnectOptions::default()
        };
        let service = test_service(reconnect, PingOptions::default());
        let (sender, _outbound) = test_sender();
        let conn = service
            .inner()
            .test_install_connection(sender, vec![])
            .await;

        ServiceInner::on_connection_lost(service.inner(), "first".into(), &conn).await;
        assert_eq!(service.state(), ServiceState::Reconnecting);
        ServiceInner::schedule_reconnect(service.inner()).await;
        ServiceInner::schedule_reconnect(service.inner()).await;

        // Give the single loop a beat to record its first attempt; a second
        // loop would have pushed the counter past one.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            service.inner().reconnect_attempts.load(Ordering::SeqCst),
            1
        );

        service.stop().await;
        assert_eq!(service.state(), ServiceState::Disconnected);
    }

    #[tokio::test]
    async fn ping_failure_threshold_triggers_reconnecting() {
        let ping = PingOptions {
            enabled: true,
            interval_ms: 10,
            timeout_ms: 5,
            max_failures: 2,
            start_delay_ms: 0,
        };
        let reconnect = ReconnectOptions {
            enabled: true,
            max_attempts: 3,
            initial_interval_ms: 60_000,
            ..ReconnectOptions::default()
        };
        let service = test_service(reconnect, ping);
        // Outbound frames go nowhere, so every ping times out.
        let (sender, mut outbound) = test_sender();
        let conn = service
            .inner()
            .test_install_connection(sender, vec![])
            .await;
        let drain = tokio::spawn(async move { while outbound.recv().await.is_some() {} });

        ServiceInner::run_ping_loop(Arc::clone(service.inner()), conn.child_token()).await;

        assert_eq!(service.state(), ServiceState::Reconnecting);
        assert!(service.inner().pending.is_empty().await);
        drain.abort();
        service.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let service = test_service(ReconnectOptions::default(), PingOptions::default());
        service.stop().await;
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Disconnected);
    }
}
