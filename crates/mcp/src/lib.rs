//! Core of the Switchboard bridge: downstream MCP services aggregated into
//! one catalog and served back to upstream WebSocket endpoints.
//!
//! The crate is organized leaves-first:
//!
//! - [`protocol`]: JSON-RPC 2.0 frames and MCP method names.
//! - [`config`]: per-service configuration with transport-kind inference.
//! - [`transport`]: stdio / SSE / streamable-HTTP framing.
//! - [`service`]: one downstream connection: handshake, request muxing,
//!   ping loop, reconnect loop.
//! - [`manager`]: the service registry and the collision-prefixed tool
//!   catalog, behind the [`manager::ToolRouter`] capability.
//! - [`endpoint`] / [`endpoint_manager`]: upstream WebSocket MCP serving
//!   and its supervision.
//! - [`retry`], [`pending`], [`events`], [`metrics`]: shared machinery.

pub mod config;
pub mod endpoint;
pub mod endpoint_manager;
pub mod events;
pub mod manager;
pub mod metrics;
mod pending;
pub mod protocol;
pub mod retry;
pub mod service;
pub mod transport;

pub use config::{PingOptions, ReconnectOptions, ServiceConfig, TransportKind};
pub use endpoint::{Endpoint, EndpointOptions};
pub use endpoint_manager::EndpointManager;
pub use events::{EndpointEvent, EventBus, ServiceEvent};
pub use manager::{ManagerOptions, ServiceManager, ToolRouter};
pub use metrics::{CallMetrics, ToolCallStats};
pub use retry::{Backoff, RetryPolicy};
pub use service::McpService;
