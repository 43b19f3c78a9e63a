//! One upstream endpoint: an outbound WebSocket whose peer expects us to
//! behave as an MCP server.
//!
//! Inbound requests are answered from the aggregated catalog via the
//! [`ToolRouter`] capability; each request runs in its own task so
//! responses to distinct requests may interleave, while every response
//! keeps its originating id. Tool calls go through a configurable retry
//! policy before an error is put on the wire. Liveness uses WebSocket
//! Ping/Pong frames with a missed-pong threshold; connection loss feeds a
//! single-flight reconnect loop with exponential backoff.

use crate::config::ReconnectOptions;
use crate::events::{EndpointEvent, EventBus};
use crate::manager::ToolRouter;
use crate::metrics::CallMetrics;
use crate::protocol::{Frame, PROTOCOL_VERSION, Request, Response, methods};
use crate::retry::Backoff;
use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use switchboard_types::{
    BridgeError, EndpointState, EndpointStatus, ErrorCode, JSONRPC_METHOD_NOT_FOUND,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::RequestId;

type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Behavior knobs shared by all endpoints of one process.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// MCP protocol revision advertised to the upstream.
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    /// Tool-call retry policy.
    pub retry: crate::retry::RetryPolicy,
    /// WebSocket reconnect curve.
    pub reconnect: ReconnectOptions,
    /// Heartbeat ping cadence; 0 disables the heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Unanswered pings tolerated before the connection is declared dead.
    pub heartbeat_max_missed: u32,
    /// Bound for connecting and for draining in-flight calls at shutdown.
    pub call_timeout_ms: u64,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.into(),
            server_name: "switchboard".into(),
            server_version: env!("CARGO_PKG_VERSION").into(),
            retry: crate::retry::RetryPolicy::default(),
            reconnect: ReconnectOptions::default(),
            heartbeat_interval_ms: 30_000,
            heartbeat_max_missed: 3,
            call_timeout_ms: 30_000,
        }
    }
}

/// Handle to one endpoint connection. Clones share state.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    url: String,
    router: Arc<dyn ToolRouter>,
    options: EndpointOptions,
    metrics: Arc<CallMetrics>,
    state_tx: watch::Sender<EndpointState>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    conn_cancel: Mutex<Option<CancellationToken>>,
    connect_lock: Mutex<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    missed_pongs: AtomicU32,
    /// Upstream ids currently being served; enforces per-endpoint in-flight
    /// id uniqueness.
    inflight_ids: Mutex<HashSet<RequestId>>,
    /// Tracks per-request tasks so shutdown can drain them, bounded.
    tracker: TaskTracker,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
    events: EventBus,
}

impl Endpoint {
    pub fn new(
        url: impl Into<String>,
        router: Arc<dyn ToolRouter>,
        options: EndpointOptions,
        metrics: Arc<CallMetrics>,
        events: EventBus,
    ) -> Result<Self, BridgeError> {
        let url = url.into();
        let parsed = Url::parse(&url)
            .map_err(|e| BridgeError::config(format!("invalid endpoint url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(BridgeError::config(format!(
                "endpoint url must be ws:// or wss://, got '{}'",
                parsed.scheme()
            )));
        }
        let (state_tx, _) = watch::channel(EndpointState::Disconnected);
        Ok(Self {
            inner: Arc::new(EndpointInner {
                url,
                router,
                options,
                metrics,
                state_tx,
                outbound: Mutex::new(None),
                conn_cancel: Mutex::new(None),
                connect_lock: Mutex::new(()),
                reconnect_task: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                missed_pongs: AtomicU32::new(0),
                inflight_ids: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                connected_at: Mutex::new(None),
                last_error: Mutex::new(None),
                shutdown: CancellationToken::new(),
                events,
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> EndpointState {
        self.inner.state()
    }

    /// Open the WebSocket; on failure the reconnect machinery takes over.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        if inner.state().is_connected() {
            return Ok(());
        }
        inner.set_state(EndpointState::Connecting);
        inner.events.emit_endpoint(EndpointEvent::Connecting {
            url: inner.url.clone(),
        });
        match inner.establish().await {
            Ok(()) => Ok(()),
            Err(error) => {
                *inner.last_error.lock().await = Some(error.to_string());
                if matches!(error, BridgeError::Config { .. }) {
                    inner.set_state(EndpointState::Failed);
                    inner.events.emit_endpoint(EndpointEvent::Failed {
                        url: inner.url.clone(),
                        error: error.to_string(),
                    });
                } else {
                    EndpointInner::schedule_reconnect(inner).await;
                }
                Err(error)
            }
        }
    }

    /// Fire-and-forget variant of `connect` for supervisor use; failures
    /// are logged and handed to the reconnect loop.
    pub async fn start(&self) {
        if let Err(error) = self.connect().await {
            warn!(url = %self.inner.url, "endpoint connect failed: {error}");
        }
    }

    /// Close the connection and stop reconnecting; the endpoint stays
    /// registered and can be connected again.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        if let Some(handle) = inner.reconnect_task.lock().await.take() {
            handle.abort();
        }
        inner.teardown_connection().await;
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        if inner.set_state(EndpointState::Disconnected) {
            inner.events.emit_endpoint(EndpointEvent::Disconnected {
                url: inner.url.clone(),
            });
        }
    }

    /// Terminal shutdown: closes the socket, cancels the reconnect timer,
    /// and waits for in-flight tool calls bounded by `call_timeout_ms`.
    /// Idempotent.
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        if let Some(handle) = inner.reconnect_task.lock().await.take() {
            let _ = handle.await;
        }
        inner.tracker.close();
        let drain = Duration::from_millis(inner.options.call_timeout_ms);
        if tokio::time::timeout(drain, inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(url = %inner.url, "shutdown timed out waiting for in-flight calls");
        }
        inner.teardown_connection().await;
        if inner.set_state(EndpointState::Disconnected) {
            inner.events.emit_endpoint(EndpointEvent::Disconnected {
                url: inner.url.clone(),
            });
        }
    }

    /// Wait until the endpoint reaches `Connected` once or gives up
    /// (`Failed`); used by the endpoint manager during initialization.
    pub async fn wait_settled(&self) -> EndpointState {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                EndpointState::Connected | EndpointState::Failed => return state,
                EndpointState::Disconnected if self.inner.shutdown.is_cancelled() => return state,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return self.inner.state();
            }
        }
    }

    pub async fn status(&self) -> EndpointStatus {
        let inner = &self.inner;
        EndpointStatus {
            url: inner.url.clone(),
            state: inner.state(),
            reconnect_attempts: inner.reconnect_attempts.load(Ordering::SeqCst),
            connected_at: *inner.connected_at.lock().await,
            last_error: inner.last_error.lock().await.clone(),
        }
    }
}

impl EndpointInner {
    fn state(&self) -> EndpointState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, new_state: EndpointState) -> bool {
        let old_state = *self.state_tx.borrow();
        if old_state == new_state {
            return false;
        }
        info!(url = %self.url, "endpoint {old_state:?} -> {new_state:?}");
        self.state_tx.send_replace(new_state);
        true
    }

    async fn establish(self: &Arc<Self>) -> Result<(), BridgeError> {
        let _guard = self.connect_lock.lock().await;
        self.teardown_connection().await;

        let connect_timeout = Duration::from_millis(self.options.call_timeout_ms);
        let (socket, _) = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| BridgeError::timeout("WebSocket connect", self.options.call_timeout_ms))?
            .map_err(|e| BridgeError::transport(format!("WebSocket connect failed: {e}")))?;

        let (mut sink, stream) = socket.split();
        let conn = self.shutdown.child_token();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

        // Writer: single owner of the sink; a failed write is a connection
        // loss.
        let writer_inner = Arc::clone(self);
        let writer_conn = conn.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_conn.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    message = out_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(message).await {
                            EndpointInner::on_connection_lost(
                                &writer_inner,
                                format!("WebSocket write failed: {e}"),
                                &writer_conn,
                            )
                            .await;
                            break;
                        }
                    }
                }
            }
        });

        *self.outbound.lock().await = Some(out_tx);
        *self.conn_cancel.lock().await = Some(conn.clone());
        self.missed_pongs.store(0, Ordering::SeqCst);
        *self.connected_at.lock().await = Some(Utc::now());
        *self.last_error.lock().await = None;
        // Each successful connection resets the reconnect budget.
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(EndpointState::Connected);
        self.events.emit_endpoint(EndpointEvent::Connected {
            url: self.url.clone(),
        });

        tokio::spawn(EndpointInner::run_reader(
            Arc::clone(self),
            stream,
            conn.clone(),
        ));
        tokio::spawn(EndpointInner::run_heartbeat(
            Arc::clone(self),
            conn.child_token(),
        ));
        Ok(())
    }

    /// Returns a boxed future (rather than being a plain `async fn`) to
    /// break a recursive-opaque-type cycle: this function calls
    /// `on_connection_lost`, which can schedule a reconnect loop that
    /// awaits `establish`, which in turn spawns this function again.
    /// Giving this one link in the cycle a concrete, explicitly `Send`
    /// boxed type lets rustc's auto-trait inference terminate.
    fn run_reader(
        inner: Arc<EndpointInner>,
        mut stream: WsStream,
        conn: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = conn.cancelled() => break,
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            EndpointInner::handle_text(&inner, text.as_str(), &conn).await;
                        }
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => EndpointInner::handle_text(&inner, text, &conn).await,
                            Err(_) => warn!(url = %inner.url, "dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let sender = inner.outbound.lock().await.clone();
                            if let Some(sender) = sender {
                                let _ = sender.send(Message::Pong(payload)).await;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            inner.missed_pongs.store(0, Ordering::SeqCst);
                        }
                        Some(Ok(Message::Close(_))) => {
                            EndpointInner::on_connection_lost(
                                &inner,
                                "closed by upstream".into(),
                                &conn,
                            )
                            .await;
                            break;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            EndpointInner::on_connection_lost(
                                &inner,
                                format!("WebSocket error: {e}"),
                                &conn,
                            )
                            .await;
                            break;
                        }
                        None => {
                            if !conn.is_cancelled() {
                                EndpointInner::on_connection_lost(
                                    &inner,
                                    "WebSocket stream ended".into(),
                                    &conn,
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

    async fn handle_text(inner: &Arc<EndpointInner>, text: &str, _conn: &CancellationToken) {
        match Frame::parse(text) {
            Ok(Frame::Request(request)) => {
                {
                    let mut inflight = inner.inflight_ids.lock().await;
                    if !inflight.insert(request.id.clone()) {
                        warn!(
                            url = %inner.url,
                            id = %request.id,
                            "duplicate in-flight request id, dropping"
                        );
                        return;
                    }
                }
                let task_inner = Arc::clone(inner);
                inner.tracker.spawn(async move {
                    let id = request.id.clone();
                    let response = dispatch_request(
                        task_inner.router.as_ref(),
                        &task_inner.options,
                        &task_inner.metrics,
                        request,
                    )
                    .await;
                    task_inner.send_response(response).await;
                    task_inner.inflight_ids.lock().await.remove(&id);
                });
            }
            Ok(Frame::Notification(notification)) => {
                if notification.method == methods::INITIALIZED {
                    debug!(url = %inner.url, "upstream finished the initialize handshake");
                } else {
                    debug!(
                        url = %inner.url,
                        method = %notification.method,
                        "ignoring notification from upstream"
                    );
                }
            }
            Ok(Frame::Response(response)) => {
                warn!(
                    url = %inner.url,
                    id = %response.id,
                    "reply matching no outstanding request, dropping"
                );
            }
            Err(error) => {
                warn!(url = %inner.url, "dropping malformed frame: {error}");
            }
        }
    }

    async fn send_response(&self, response: Response) {
        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(url = %self.url, "failed to serialize response: {e}");
                return;
            }
        };
        let sender = self.outbound.lock().await.clone();
        if let Some(sender) = sender {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                debug!(url = %self.url, "response dropped, connection gone");
            }
        }
    }

    /// Heartbeat: send a Ping every interval; `heartbeat_max_missed`
    /// unanswered pings escalate to the reconnect path.
    ///
    /// Returns a boxed future (rather than being a plain `async fn`) to
    /// break a recursive-opaque-type cycle: this function calls
    /// `on_connection_lost`, which can schedule a reconnect loop that
    /// awaits `establish`, which in turn spawns this function again.
    /// Giving this one link in the cycle a concrete, explicitly `Send`
    /// boxed type lets rustc's auto-trait inference terminate.
    fn run_heartbeat(
        inner: Arc<EndpointInner>,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let interval_ms = inner.options.heartbeat_interval_ms;
            if interval_ms == 0 {
                return;
            }
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick; the first ping goes out one interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let outstanding = inner.missed_pongs.fetch_add(1, Ordering::SeqCst);
                if outstanding >= inner.options.heartbeat_max_missed {
                    EndpointInner::on_connection_lost(
                        &inner,
                        format!("{outstanding} heartbeat pings unanswered"),
                        &cancel,
                    )
                    .await;
                    return;
                }
                let sender = inner.outbound.lock().await.clone();
                let Some(sender) = sender else { return };
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        })
    }

    /// Returns a boxed future (rather than being a plain `async fn`) to
    /// break a recursive-opaque-type cycle: every caller of this function
    /// can, through `schedule_reconnect`, end up awaiting `establish`
    /// again, which calls back into this function via the writer/reader/
    /// heartbeat tasks it spawns. Giving this one link in the cycle a
    /// concrete, explicitly `Send` boxed type lets rustc's auto-trait
    /// inference terminate.
    fn on_connection_lost<'a>(
        inner: &'a Arc<EndpointInner>,
        reason: String,
        conn: &'a CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if conn.is_cancelled() || inner.state().is_terminal() {
                return;
            }
            warn!(url = %inner.url, %reason, "endpoint connection lost");
            *inner.last_error.lock().await = Some(reason);
            inner.teardown_connection().await;
            if inner.shutdown.is_cancelled() {
                inner.set_state(EndpointState::Disconnected);
                return;
            }
            EndpointInner::schedule_reconnect(inner).await;
        })
    }

    async fn teardown_connection(&self) {
        if let Some(token) = self.conn_cancel.lock().await.take() {
            token.cancel();
        }
        *self.outbound.lock().await = None;
        *self.connected_at.lock().await = None;
    }

    /// At most one reconnect loop per endpoint.
    async fn schedule_reconnect(inner: &Arc<EndpointInner>) {
        let mut slot = inner.reconnect_task.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let options = &inner.options.reconnect;
        if !options.enabled
            || options.max_attempts == 0
            || inner.reconnect_attempts.load(Ordering::SeqCst) >= options.max_attempts
        {
            if inner.set_state(EndpointState::Failed) {
                let error = inner
                    .last_error
                    .lock()
                    .await
                    .clone()
                    .unwrap_or_else(|| "reconnect exhausted".into());
                inner.events.emit_endpoint(EndpointEvent::Failed {
                    url: inner.url.clone(),
                    error,
                });
            }
            return;
        }
        inner.set_state(EndpointState::Reconnecting);
        *slot = Some(tokio::spawn(EndpointInner::run_reconnect_loop(Arc::clone(
            inner,
        ))));
    }

    async fn run_reconnect_loop(inner: Arc<EndpointInner>) {
        let options = inner.options.reconnect.clone();
        let backoff = Backoff::from_options(&options);
        loop {
            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > options.max_attempts {
                if inner.set_state(EndpointState::Failed) {
                    inner.events.emit_endpoint(EndpointEvent::Failed {
                        url: inner.url.clone(),
                        error: format!(
                            "gave up after {} reconnect attempts",
                            options.max_attempts
                        ),
                    });
                }
                break;
            }
            let delay = backoff.delay_for(attempt);
            info!(
                url = %inner.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "endpoint reconnect scheduled"
            );
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            inner.events.emit_endpoint(EndpointEvent::Reconnecting {
                url: inner.url.clone(),
                attempt,
            });
            match inner.establish().await {
                // `establish` resets the attempt counter on success.
                Ok(()) => break,
                Err(error) => {
                    warn!(
                        url = %inner.url,
                        attempt,
                        "endpoint reconnect failed: {error}"
                    );
                    *inner.last_error.lock().await = Some(error.to_string());
                }
            }
        }
    }
}

/// Translate one upstream request into its response. Pure with respect to
/// connection state, which keeps the protocol surface unit-testable.
pub(crate) async fn dispatch_request(
    router: &dyn ToolRouter,
    options: &EndpointOptions,
    metrics: &CallMetrics,
    request: Request,
) -> Response {
    match request.method.as_str() {
        methods::INITIALIZE => Response::ok(
            request.id,
            json!({
                "protocolVersion": options.protocol_version,
                "serverInfo": {
                    "name": options.server_name,
                    "version": options.server_version,
                },
                "capabilities": { "tools": { "listChanged": true } },
            }),
        ),
        methods::TOOLS_LIST => {
            let tools: Vec<Value> = router
                .list_tools()
                .await
                .iter()
                .map(|tool| tool.to_wire())
                .collect();
            Response::ok(request.id, json!({ "tools": tools }))
        }
        methods::TOOLS_CALL => dispatch_tool_call(router, options, metrics, request).await,
        methods::PING => Response::ok(request.id, json!({})),
        methods::PROMPTS_LIST => Response::ok(request.id, json!({ "prompts": [] })),
        methods::RESOURCES_LIST => Response::ok(request.id, json!({ "resources": [] })),
        other => Response::err(
            request.id,
            JSONRPC_METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

/// The tool-call pipeline: dispatch, measure, retry per policy, translate
/// the final failure into a JSON-RPC error.
async fn dispatch_tool_call(
    router: &dyn ToolRouter,
    options: &EndpointOptions,
    metrics: &CallMetrics,
    request: Request,
) -> Response {
    let params = request.params.unwrap_or_else(|| json!({}));
    let Some(name) = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Response::err(
            request.id,
            ErrorCode::Protocol.jsonrpc_code(),
            "tools/call requires a tool name",
        );
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let policy = &options.retry;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        let started = Instant::now();
        match router.call_tool(&name, arguments.clone()).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                metrics.record_success(&name, elapsed);
                debug!(
                    tool = %name,
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool call succeeded"
                );
                return Response::ok(request.id, result);
            }
            Err(error) => {
                metrics.record_failure(&name, started.elapsed());
                if attempt >= max_attempts || !policy.is_retryable(&error) {
                    warn!(tool = %name, attempt, "tool call failed: {error}");
                    return Response::err(request.id, error.jsonrpc_code(), error.to_string());
                }
                let delay = policy.delay_after(attempt);
                debug!(
                    tool = %name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying tool call: {error}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use switchboard_types::ToolDescriptor;

    struct MockRouter {
        tools: Vec<ToolDescriptor>,
        calls: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Result<Value, BridgeError>>>,
    }

    impl MockRouter {
        fn new(script: Vec<Result<Value, BridgeError>>) -> Self {
            Self {
                tools: vec![ToolDescriptor {
                    name: "add".into(),
                    description: Some("Add two numbers".into()),
                    input_schema: json!({"type": "object"}),
                    owning_service: "calc".into(),
                }],
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            }
        }

        async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl ToolRouter for MockRouter {
        async fn list_tools(&self) -> Vec<ToolDescriptor> {
            self.tools.clone()
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<Value, BridgeError> {
            self.calls.lock().await.push(name.to_string());
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"content": []})))
        }
    }

    fn fast_options(max_attempts: u32) -> EndpointOptions {
        EndpointOptions {
            retry: RetryPolicy {
                max_attempts,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                ..RetryPolicy::default()
            },
            ..EndpointOptions::default()
        }
    }

    fn request(id: i64, method: &str, params: Value) -> Request {
        Request::new(id, method, params)
    }

    #[tokio::test]
    async fn initialize_advertises_tools_capability() {
        let router = MockRouter::new(vec![]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &EndpointOptions::default(),
            &metrics,
            request(1, methods::INITIALIZE, json!({})),
        )
        .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "switchboard");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    }

    #[tokio::test]
    async fn tools_list_serves_the_catalog() {
        let router = MockRouter::new(vec![]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &EndpointOptions::default(),
            &metrics,
            request(2, methods::TOOLS_LIST, json!({})),
        )
        .await;
        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "add");
        assert!(tools[0].get("owningService").is_none());
    }

    #[tokio::test]
    async fn ping_and_stub_lists() {
        let router = MockRouter::new(vec![]);
        let metrics = CallMetrics::new();
        let options = EndpointOptions::default();

        let response =
            dispatch_request(&router, &options, &metrics, request(3, methods::PING, json!({})))
                .await;
        assert_eq!(response.result.unwrap(), json!({}));

        let response = dispatch_request(
            &router,
            &options,
            &metrics,
            request(4, methods::PROMPTS_LIST, json!({})),
        )
        .await;
        assert_eq!(response.result.unwrap()["prompts"], json!([]));

        let response = dispatch_request(
            &router,
            &options,
            &metrics,
            request(5, methods::RESOURCES_LIST, json!({})),
        )
        .await;
        assert_eq!(response.result.unwrap()["resources"], json!([]));
    }

    #[tokio::test]
    async fn unknown_methods_get_method_not_found() {
        let router = MockRouter::new(vec![]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &EndpointOptions::default(),
            &metrics,
            request(6, "sampling/createMessage", json!({})),
        )
        .await;
        assert_eq!(response.error.unwrap().code, JSONRPC_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_to_success() {
        let router = MockRouter::new(vec![
            Err(BridgeError::service_unavailable("calc")),
            Err(BridgeError::service_unavailable("calc")),
            Ok(json!({"content": [{"type": "text", "text": "3"}]})),
        ]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &fast_options(3),
            &metrics,
            request(7, methods::TOOLS_CALL, json!({"name": "add", "arguments": {"a": 1, "b": 2}})),
        )
        .await;

        assert_eq!(response.id, RequestId::Number(7));
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["content"][0]["text"], "3");
        assert_eq!(router.call_count().await, 3);

        let stats = metrics.snapshot();
        assert_eq!(stats["add"].calls, 3);
        assert_eq!(stats["add"].failures, 2);
    }

    #[tokio::test]
    async fn non_retryable_failures_fail_immediately() {
        let router = MockRouter::new(vec![Err(BridgeError::tool_not_found("nope"))]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &fast_options(3),
            &metrics,
            request(8, methods::TOOLS_CALL, json!({"name": "nope"})),
        )
        .await;

        assert_eq!(response.id, RequestId::Number(8));
        let error = response.error.unwrap();
        assert_eq!(error.code, BridgeError::tool_not_found("nope").jsonrpc_code());
        assert_eq!(router.call_count().await, 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let router = MockRouter::new(vec![
            Err(BridgeError::service_unavailable("calc")),
            Err(BridgeError::service_unavailable("calc")),
            Err(BridgeError::service_unavailable("calc")),
            Err(BridgeError::service_unavailable("calc")),
        ]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &fast_options(2),
            &metrics,
            request(9, methods::TOOLS_CALL, json!({"name": "add"})),
        )
        .await;

        assert_eq!(response.error.unwrap().code, -32002);
        assert_eq!(router.call_count().await, 2);
    }

    #[tokio::test]
    async fn tool_call_without_name_is_a_protocol_error() {
        let router = MockRouter::new(vec![]);
        let metrics = CallMetrics::new();
        let response = dispatch_request(
            &router,
            &EndpointOptions::default(),
            &metrics,
            request(10, methods::TOOLS_CALL, json!({"arguments": {}})),
        )
        .await;
        assert_eq!(response.error.unwrap().code, -32600);
        assert_eq!(router.call_count().await, 0);
    }

    #[test]
    fn endpoint_rejects_non_websocket_urls() {
        let router: Arc<dyn ToolRouter> = Arc::new(MockRouter::new(vec![]));
        let result = Endpoint::new(
            "https://example.com/mcp",
            router,
            EndpointOptions::default(),
            Arc::new(CallMetrics::new()),
            EventBus::new(),
        );
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[test]
    fn endpoint_accepts_tokened_websocket_urls() {
        let router: Arc<dyn ToolRouter> = Arc::new(MockRouter::new(vec![]));
        let endpoint = Endpoint::new(
            "wss://api.example.io/mcp/?token=abc123",
            router,
            EndpointOptions::default(),
            Arc::new(CallMetrics::new()),
            EventBus::new(),
        )
        .unwrap();
        assert_eq!(endpoint.state(), EndpointState::Disconnected);
        assert!(endpoint.url().contains("token=abc123"));
    }
}
