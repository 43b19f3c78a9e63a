//! Transport variants carrying JSON-RPC frames to downstream services.
//!
//! A transport frames and moves JSON values; it does not interpret MCP
//! semantics. `open()` spawns the I/O tasks for one connection and hands
//! back a channel pair: an outbound frame sender and an inbound event
//! receiver. A `Closed` event means the connection is gone and the service
//! layer should run its failure path; cancelling the token passed to
//! `open()` tears the connection down (including any child process).

mod http;
mod sse;
mod stdio;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::config::{ServiceConfig, TransportKind};
use serde_json::Value;
use switchboard_types::BridgeError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Inbound traffic from a transport.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(Value),
    Closed { reason: String },
}

/// Clonable handle for writing frames to the transport.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Value>,
}

impl FrameSender {
    pub(crate) fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, frame: Value) -> Result<(), BridgeError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| BridgeError::transport("transport channel closed"))
    }
}

/// One open connection: sender, inbound events, and the token that tears
/// the connection down when cancelled.
pub struct TransportHandle {
    pub(crate) sender: FrameSender,
    pub(crate) events: mpsc::Receiver<TransportEvent>,
    pub(crate) cancel: CancellationToken,
}

impl TransportHandle {
    pub(crate) fn split(self) -> (FrameSender, mpsc::Receiver<TransportEvent>, CancellationToken) {
        (self.sender, self.events, self.cancel)
    }
}

/// Closed set of transport implementations, picked from config.
pub enum Transport {
    Stdio(StdioTransport),
    Sse(SseTransport),
    StreamableHttp(HttpTransport),
}

impl Transport {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        match config.transport_kind()? {
            TransportKind::Stdio => Ok(Transport::Stdio(StdioTransport::from_config(config)?)),
            TransportKind::Sse => Ok(Transport::Sse(SseTransport::from_config(config)?)),
            TransportKind::StreamableHttp => {
                Ok(Transport::StreamableHttp(HttpTransport::from_config(config)?))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Stdio(_) => TransportKind::Stdio,
            Transport::Sse(_) => TransportKind::Sse,
            Transport::StreamableHttp(_) => TransportKind::StreamableHttp,
        }
    }

    /// Open the connection. The returned handle's tasks exit when `cancel`
    /// fires or the peer goes away.
    pub async fn open(&self, cancel: CancellationToken) -> Result<TransportHandle, BridgeError> {
        match self {
            Transport::Stdio(t) => t.open(cancel).await,
            Transport::Sse(t) => t.open(cancel).await,
            Transport::StreamableHttp(t) => t.open(cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    #[test]
    fn builds_variant_from_config() {
        let config = ServiceConfig {
            name: "calc".into(),
            command: Some("node".into()),
            ..ServiceConfig::default()
        };
        let transport = Transport::from_config(&config).unwrap();
        assert_eq!(transport.kind(), TransportKind::Stdio);

        let config = ServiceConfig {
            name: "remote".into(),
            url: Some("https://example.com/sse".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            Transport::from_config(&config).unwrap().kind(),
            TransportKind::Sse
        );

        let config = ServiceConfig {
            name: "remote".into(),
            url: Some("https://example.com/mcp".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            Transport::from_config(&config).unwrap().kind(),
            TransportKind::StreamableHttp
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServiceConfig {
            name: "broken".into(),
            ..ServiceConfig::default()
        };
        assert!(Transport::from_config(&config).is_err());
    }
}
