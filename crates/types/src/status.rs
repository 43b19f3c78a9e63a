//! Connection state machines and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a downstream MCP service connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    Disconnected,
    Connecting,
    Connected,
    /// A reconnect loop is scheduled or running.
    Reconnecting,
    /// Reconnect budget exhausted or fatal config error; no automatic retry.
    Failed,
}

impl ServiceState {
    pub fn is_connected(self) -> bool {
        matches!(self, ServiceState::Connected)
    }

    /// Terminal states require an explicit `connect()` to leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Disconnected | ServiceState::Failed)
    }
}

/// Lifecycle state of an upstream endpoint WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl EndpointState {
    pub fn is_connected(self) -> bool {
        matches!(self, EndpointState::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EndpointState::Disconnected | EndpointState::Failed)
    }

    /// Settled means the endpoint will make no further progress on its own:
    /// it is connected, or it has exhausted its attempt budget.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            EndpointState::Connected | EndpointState::Failed | EndpointState::Disconnected
        )
    }
}

/// Point-in-time snapshot of one service, returned by copy to admin callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub transport: String,
    pub tool_count: usize,
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping_at: Option<DateTime<Utc>>,
    pub ping_failure_count: u32,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Point-in-time snapshot of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub url: String,
    pub state: EndpointState,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
