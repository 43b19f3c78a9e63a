//! Legacy SSE transport.
//!
//! Old-style SSE MCP servers negotiate in two steps: the client opens
//! `GET <url>` as an event stream, the server answers with an `endpoint`
//! event naming a relative POST URL, and from then on requests go out as
//! POSTs while responses and notifications arrive as `message` events on
//! the stream.

use super::{FrameSender, TransportEvent, TransportHandle};
use crate::config::ServiceConfig;
use futures_util::StreamExt;
use indexmap::IndexMap;
use serde_json::Value;
use sse_stream::SseStream;
use switchboard_types::BridgeError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

pub struct SseTransport {
    service: String,
    url: String,
    headers: IndexMap<String, String>,
}

impl SseTransport {
    pub(crate) fn from_config(config: &ServiceConfig) -> Result<Self, BridgeError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| BridgeError::config("sse transport requires a url"))?;
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
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BridgeError::transport(format!("failed to build HTTP client: {e}")))?;

        let mut request = client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::transport(format!("SSE connect failed: {e}")))?;
        if !response.status().is_success() {
            return Err(BridgeError::transport(format!(
                "SSE endpoint returned status {}",
                response.status()
            )));
        }

        let mut stream = SseStream::from_byte_stream(response.bytes_stream());

        // The server must name its POST endpoint before anything else.
        let post_url = loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    let kind = event.event.as_deref().unwrap_or("message");
                    if kind == "endpoint" {
                        let Some(data) = event.data else { continue };
                        break resolve_endpoint(&self.url, data.trim())?;
                    }
                    debug!(service = %self.service, "ignoring pre-endpoint SSE event '{kind}'");
                }
                Some(Err(e)) => {
                    return Err(BridgeError::transport(format!("SSE stream error: {e}")));
                }
                None => {
                    return Err(BridgeError::transport(
                        "SSE stream ended before endpoint event",
                    ));
                }
            }
        };
        debug!(service = %self.service, %post_url, "SSE message endpoint negotiated");

        let (out_tx, mut out_rx) = mpsc::channel::<Value>(64);
        let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(64);

        // Writer: POST each outbound frame to the negotiated endpoint.
        let writer_cancel = cancel.clone();
        let writer_evt = evt_tx.clone();
        let writer_headers = self.headers.clone();
        let writer_service = self.service.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let mut request = client.post(&post_url).json(&frame);
                        for (key, value) in &writer_headers {
                            request = request.header(key.as_str(), value.as_str());
                        }
                        match request.send().await {
                            Ok(response) if response.status().is_success() => {}
                            Ok(response) => warn!(
                                service = %writer_service,
                                status = %response.status(),
                                "SSE message POST rejected"
                            ),
                            Err(e) => {
                                let _ = writer_evt
                                    .send(TransportEvent::Closed {
                                        reason: format!("SSE message POST failed: {e}"),
                                    })
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        // Reader: message events are inbound frames.
        let reader_cancel = cancel.clone();
        let reader_service = self.service.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(event)) => {
                            let kind = event.event.as_deref().unwrap_or("message");
                            if kind != "message" {
                                debug!(service = %reader_service, "ignoring SSE event '{kind}'");
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
                                Err(e) => warn!(
                                    service = %reader_service,
                                    "discarding unparseable SSE message: {e}"
                                ),
                            }
                        }
                        Some(Err(e)) => {
                            let _ = evt_tx
                                .send(TransportEvent::Closed {
                                    reason: format!("SSE stream error: {e}"),
                                })
                                .await;
                            break;
                        }
                        None => {
                            let _ = evt_tx
                                .send(TransportEvent::Closed { reason: "SSE stream ended".into() })
                                .await;
                            break;
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

/// Resolve the `endpoint` event data (absolute or relative) against the
/// SSE URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> Result<String, BridgeError> {
    let base = Url::parse(base)
        .map_err(|e| BridgeError::config(format!("invalid SSE url '{base}': {e}")))?;
    let resolved = base
        .join(endpoint)
        .map_err(|e| BridgeError::protocol(format!("invalid endpoint '{endpoint}': {e}")))?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_endpoints() {
        let resolved =
            resolve_endpoint("http://host:3000/sse", "/messages?sessionId=abc").unwrap();
        assert_eq!(resolved, "http://host:3000/messages?sessionId=abc");
    }

    #[test]
    fn keeps_absolute_endpoints() {
        let resolved =
            resolve_endpoint("http://host:3000/sse", "http://other:9/messages").unwrap();
        assert_eq!(resolved, "http://other:9/messages");
    }

    #[test]
    fn rejects_bad_base() {
        assert!(resolve_endpoint("not a url", "/messages").is_err());
    }
}
