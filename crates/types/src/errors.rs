//! Error taxonomy for bridge operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC 2.0 standard code for an unknown method.
pub const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;

/// Errors produced by the service, manager, and endpoint layers.
///
/// Every variant maps to a stable [`ErrorCode`], which carries the wire
/// code used in JSON-RPC error responses and the default retry
/// classification applied by the endpoint tool-call pipeline.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Not found in registry: {name}")]
    ServiceNotFound { name: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Service not connected: {name}")]
    ServiceUnavailable { name: String },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn service_not_found(name: impl Into<String>) -> Self {
        Self::ServiceNotFound { name: name.into() }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    pub fn service_unavailable(name: impl Into<String>) -> Self {
        Self::ServiceUnavailable { name: name.into() }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            Self::ToolNotFound { .. } => ErrorCode::ToolNotFound,
            Self::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Protocol { .. } => ErrorCode::Protocol,
            Self::ToolExecution { .. } => ErrorCode::ToolExecution,
            Self::Config { .. } => ErrorCode::Config,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// The JSON-RPC error code emitted to an upstream endpoint.
    pub fn jsonrpc_code(&self) -> i64 {
        self.code().jsonrpc_code()
    }

    /// Default retry classification; the endpoint retry policy may
    /// override this with a configured code set.
    pub fn is_retryable(&self) -> bool {
        self.code().retryable_by_default()
    }
}

/// Stable identifiers for the error taxonomy.
///
/// Serialized in camelCase so retryable-code sets can be written in the
/// config file (`"retryableCodes": ["serviceUnavailable", ...]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    ServiceNotFound,
    ToolNotFound,
    ServiceUnavailable,
    Timeout,
    Transport,
    Protocol,
    ToolExecution,
    Config,
    Internal,
}

impl ErrorCode {
    /// Wire mapping. Taxonomy codes sit in the JSON-RPC vendor range;
    /// `Protocol` and `Internal` reuse the standard codes.
    pub fn jsonrpc_code(self) -> i64 {
        match self {
            Self::ServiceNotFound => -32001,
            Self::ToolNotFound => -32602,
            Self::ServiceUnavailable => -32002,
            Self::Timeout => -32003,
            Self::Transport => -32004,
            Self::Protocol => -32600,
            Self::ToolExecution => -32000,
            Self::Config => -32005,
            Self::Internal => -32603,
        }
    }

    pub fn retryable_by_default(self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable | Self::Timeout | Self::Transport | Self::ToolExecution
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = BridgeError::tool_not_found("nope");
        assert_eq!(err.code(), ErrorCode::ToolNotFound);
        assert_eq!(err.jsonrpc_code(), -32602);

        let err = BridgeError::service_unavailable("calc");
        assert_eq!(err.jsonrpc_code(), -32002);

        let err = BridgeError::timeout("tools/call", 5000);
        assert_eq!(err.jsonrpc_code(), -32003);
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn default_retry_classification() {
        assert!(BridgeError::service_unavailable("a").is_retryable());
        assert!(BridgeError::timeout("op", 1).is_retryable());
        assert!(BridgeError::transport("reset").is_retryable());
        assert!(BridgeError::tool_execution("add", "boom").is_retryable());

        assert!(!BridgeError::tool_not_found("x").is_retryable());
        assert!(!BridgeError::protocol("bad frame").is_retryable());
        assert!(!BridgeError::config("missing url").is_retryable());
        assert!(!BridgeError::internal("bug").is_retryable());
        assert!(!BridgeError::service_not_found("x").is_retryable());
    }

    #[test]
    fn error_code_serde_is_camel_case() {
        let json = serde_json::to_string(&ErrorCode::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"serviceUnavailable\"");

        let parsed: ErrorCode = serde_json::from_str("\"toolExecution\"").unwrap();
        assert_eq!(parsed, ErrorCode::ToolExecution);
    }
}
