//! Shared vocabulary for the Switchboard aggregator: the error taxonomy,
//! connection state machines, status snapshots, and tool metadata.
//!
//! Everything in this crate is plain data, with no I/O or async. The `mcp`
//! crate drives the state machines; the `cli` crate serializes snapshots
//! over the admin surface.

mod errors;
mod status;
mod tools;

pub use errors::{BridgeError, ErrorCode, JSONRPC_METHOD_NOT_FOUND};
pub use status::{EndpointState, EndpointStatus, ServiceState, ServiceStatus};
pub use tools::ToolDescriptor;
