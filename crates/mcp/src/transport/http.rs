//! Streamable HTTP transport.
//!
//! Each outbound frame is POSTed to the MCP URL with
//! `Accept: application/json, text/event-stream`. The server answers a
//! request either with a plain JSON body or with a short-lived SSE body
//! whose `message` events carry the response (and any interleaved
//! notifications); notifications we send are usually acknowledged with an
//! empty 202. The `Mcp-Session-Id` header handed out on the first exchange
//! is echoed on every later request.

use super::{FrameSender, TransportEvent, TransportHandle};
use crate::config::ServiceConfig;
use futures_util::{Stream, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;
use sse_stream::SseStream;
use switchboard_types::BridgeError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct HttpTransport {
    service: String,
    url: String,
    headers: IndexMap<String, String>,
}

impl HttpTransport {
    pub(crate) fn from_config(config: &ServiceConfig) -> Result<Self, BridgeError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| BridgeError::config("streamable HTTP transport requires a url"))?;
        Ok(Self {
            service: config.name.clone(),
            url,
            headers: config.headers.clone(),
        })
    }

    pub(crate) async fn open(
        &self,
        cancel: CancellationToken,
    ) -> Result<TransportHandle, BridgeError> {
        // No global timeout: response bodies may be long-lived SSE streams.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| BridgeError::transport(format!("failed to build HTTP client: {e}")))?;

        let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
        let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(64);

        let url = self.url.clone();
        let headers = self.headers.clone();
        let service = self.service.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            // Session id handed out by the server on the first exchange.
            let mut session: Option<String> = None;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let expects_reply = frame.get("id").is_some();
                        let mut request = client
                            .post(&url)
                            .json(&frame)
                            .header(reqwest::header::ACCEPT, "application/json, text/event-stream");
                        for (key, value) in &headers {
                            request = request.header(key.as_str(), value.as_str());
                        }
                        if let Some(session_id) = &session {
                            request = request.header(SESSION_HEADER, session_id.as_str());
                        }

                        let response = match request.send().await {
                            Ok(response) => response,
                            Err(e) => {
                                let _ = evt_tx
                                    .send(TransportEvent::Closed {
                                        reason: format!("HTTP request failed: {e}"),
                                    })
                                    .await;
                                break;
                            }
                        };

                        if let Some(session_id) = response
                            .headers()
                            .get(SESSION_HEADER)
                            .and_then(|value| value.to_str().ok())
                        {
                            session = Some(session_id.to_string());
                        }

                        let status = response.status();
                        if !status.is_success() {
                            warn!(service = %service, %status, "server rejected frame");
                            continue;
                        }

                        let content_type = response
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or("")
                            .to_ascii_lowercase();

                        if content_type.contains("text/event-stream") {
                            // Response rides an SSE body; forward its frames
                            // without blocking the writer.
                            let stream = SseStream::from_byte_stream(response.bytes_stream());
                            tokio::spawn(forward_sse_frames(
                                service.clone(),
                                stream,
                                evt_tx.clone(),
                                task_cancel.clone(),
                            ));
                        } else if content_type.contains("application/json") {
                            match response.json::<Value>().await {
                                Ok(frame) => {
                                    if evt_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(
                                    service = %service,
                                    "discarding unparseable response body: {e}"
                                ),
                            }
                        } else if expects_reply {
                            warn!(
                                service = %service,
                                %content_type,
                                "request got no usable response body"
                            );
                        }
                    }
                }
            }
        });

        Ok(TransportHandle {
            sender: FrameSender::new(out_tx),
            events: evt_rx,
            cancel,
        })
    }
}

async fn forward_sse_frames(
    service: String,
    mut stream: impl Stream<Item = Result<sse_stream::Sse, sse_stream::Error>> + Unpin,
    evt_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    let kind = event.event.as_deref().unwrap_or("message");
                    if kind != "message" {
                        debug!(service = %service, "ignoring SSE event '{kind}'");
                        continue;
                    }
                    let Some(data) = event.data else { continue };
                    let trimmed = data.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(frame) => {
                            if evt_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(service = %service, "discarding unparseable SSE message: {e}");
                        }
                    }
                }
                Some(Err(e)) => {
                    // A broken response stream fails the requests riding on
                    // it (by timeout) but not the transport as a whole.
                    warn!(service = %service, "response stream error: {e}");
                    break;
                }
                // Response bodies ending is the normal case.
                None => break,
            }
        }
    }
}
