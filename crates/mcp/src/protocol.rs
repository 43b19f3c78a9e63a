//! JSON-RPC 2.0 frame model for the MCP wire protocol.
//!
//! Both sides of the bridge speak the same framing: downstream we are the
//! MCP client (over stdio/SSE/streamable HTTP), upstream we are the MCP
//! server (over WebSocket). Frames are classified structurally: a `method`
//! with an `id` is a request, a `method` without an `id` is a notification,
//! and an `id` with `result` or `error` is a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use switchboard_types::BridgeError;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision advertised to both sides unless overridden.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used on the wire.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const RESOURCES_LIST: &str = "resources/list";
}

/// A JSON-RPC id: number or string, compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Any inbound JSON-RPC frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Frame, BridgeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| BridgeError::protocol(format!("invalid JSON frame: {e}")))?;
        Frame::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Frame, BridgeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| BridgeError::protocol("frame is not a JSON object"))?;

        if obj.contains_key("method") {
            if obj.contains_key("id") {
                let request: Request = serde_json::from_value(value.clone())
                    .map_err(|e| BridgeError::protocol(format!("malformed request: {e}")))?;
                Ok(Frame::Request(request))
            } else {
                let notification: Notification = serde_json::from_value(value.clone())
                    .map_err(|e| BridgeError::protocol(format!("malformed notification: {e}")))?;
                Ok(Frame::Notification(notification))
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            let response: Response = serde_json::from_value(value.clone())
                .map_err(|e| BridgeError::protocol(format!("malformed response: {e}")))?;
            Ok(Frame::Response(response))
        } else {
            Err(BridgeError::protocol(
                "frame is neither a request, notification, nor response",
            ))
        }
    }
}

/// `tools/list` result payload from a downstream service.
#[derive(Debug, Deserialize)]
pub struct ToolListResult {
    #[serde(default)]
    pub tools: Vec<WireTool>,
}

/// One tool as described on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// True when a `tools/call` result carries the MCP `isError` flag.
pub fn tool_result_is_error(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Best-effort extraction of a human-readable message from tool-result
/// content, used when a downstream tool reports `isError`.
pub fn tool_result_text(result: &Value) -> String {
    let Some(items) = result.get("content").and_then(Value::as_array) else {
        return "tool reported an error".into();
    };
    let texts: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        "tool reported an error".into()
    } else {
        texts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_request_notification_response() {
        let frame = Frame::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(frame, Frame::Request(_)));

        let frame =
            Frame::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(frame, Frame::Notification(_)));

        let frame = Frame::parse(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(frame, Frame::Response(_)));

        let frame = Frame::parse(
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Response(resp) => {
                assert_eq!(resp.id, RequestId::String("abc".into()));
                assert_eq!(resp.error.unwrap().code, -32601);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse("[1,2,3]").is_err());
        assert!(Frame::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
    }

    #[test]
    fn request_ids_accept_numbers_and_strings() {
        let n: RequestId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(n, RequestId::Number(7));
        let s: RequestId = serde_json::from_value(json!("req-1")).unwrap();
        assert_eq!(s, RequestId::String("req-1".into()));
        assert_eq!(serde_json::to_value(&n).unwrap(), json!(7));
    }

    #[test]
    fn response_serialization_omits_absent_halves() {
        let ok = serde_json::to_value(Response::ok(RequestId::Number(7), json!({"x": 1}))).unwrap();
        assert!(ok.get("error").is_none());
        assert_eq!(ok["result"]["x"], 1);

        let err = serde_json::to_value(Response::err(RequestId::Number(8), -32601, "nope")).unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], -32601);
    }

    #[test]
    fn wire_tool_reads_input_schema_alias() {
        let result: ToolListResult = serde_json::from_value(json!({
            "tools": [
                {"name": "add", "description": "Add", "inputSchema": {"type": "object"}},
                {"name": "mul"}
            ]
        }))
        .unwrap();
        assert_eq!(result.tools.len(), 2);
        assert_eq!(result.tools[0].input_schema["type"], "object");
        assert!(result.tools[1].description.is_none());
    }

    #[test]
    fn tool_error_flag_and_text() {
        let ok = json!({"content": [{"type": "text", "text": "3"}]});
        assert!(!tool_result_is_error(&ok));

        let err = json!({
            "isError": true,
            "content": [{"type": "text", "text": "division by zero"}]
        });
        assert!(tool_result_is_error(&err));
        assert_eq!(tool_result_text(&err), "division by zero");
    }
}
