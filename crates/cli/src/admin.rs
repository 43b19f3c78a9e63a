//! Loopback HTTP adapter over the service and endpoint managers.
//!
//! The core exposes every admin operation as a plain method call; this
//! module only frames them as JSON over HTTP. Subsystem failures never
//! become 5xx responses: handlers reply 200 with either a result or an
//! error payload carrying the taxonomy code.

use anyhow::Result;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use switchboard_mcp::{EndpointManager, ServiceConfig, ServiceManager};
use switchboard_types::BridgeError;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct AdminState {
    pub services: ServiceManager,
    pub endpoints: EndpointManager,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/services", get(list_services).post(add_service))
        .route(
            "/api/services/{name}",
            put(update_service).delete(remove_service),
        )
        .route(
            "/api/endpoints",
            get(list_endpoints).post(add_endpoint).delete(remove_endpoint),
        )
        .route("/api/endpoints/connect", post(connect_endpoint))
        .route("/api/endpoints/disconnect", post(disconnect_endpoint))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/call", post(call_tool))
        .with_state(state)
}

pub async fn serve(state: AdminState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "admin API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Uniform reply envelope: `{ok, result}` or `{ok, error}`.
fn reply<T: serde::Serialize>(result: Result<T, BridgeError>) -> Json<Value> {
    match result {
        Ok(value) => Json(json!({ "ok": true, "result": value })),
        Err(error) => Json(json!({
            "ok": false,
            "error": {
                "code": error.code(),
                "jsonrpcCode": error.jsonrpc_code(),
                "message": error.to_string(),
            }
        })),
    }
}

async fn get_status(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "services": state.services.status().await,
        "endpoints": state.endpoints.status().await,
        "toolCount": state.services.list_tools().await.len(),
        "metrics": state.endpoints.metrics().snapshot(),
    }))
}

async fn list_services(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "services": state.services.status().await }))
}

async fn add_service(
    State(state): State<AdminState>,
    Json(config): Json<ServiceConfig>,
) -> Json<Value> {
    reply(state.services.add_service(config).await)
}

async fn update_service(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(mut config): Json<ServiceConfig>,
) -> Json<Value> {
    config.name = name;
    reply(state.services.update_service(config).await)
}

async fn remove_service(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Json<Value> {
    reply(state.services.remove_service(&name).await)
}

#[derive(Debug, Deserialize)]
struct UrlBody {
    url: String,
}

async fn list_endpoints(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "endpoints": state.endpoints.status().await }))
}

async fn add_endpoint(
    State(state): State<AdminState>,
    Json(body): Json<UrlBody>,
) -> Json<Value> {
    reply(state.endpoints.add_endpoint(&body.url).await)
}

async fn remove_endpoint(
    State(state): State<AdminState>,
    Json(body): Json<UrlBody>,
) -> Json<Value> {
    reply(state.endpoints.remove_endpoint(&body.url).await)
}

async fn connect_endpoint(
    State(state): State<AdminState>,
    Json(body): Json<UrlBody>,
) -> Json<Value> {
    reply(state.endpoints.connect_endpoint(&body.url).await)
}

async fn disconnect_endpoint(
    State(state): State<AdminState>,
    Json(body): Json<UrlBody>,
) -> Json<Value> {
    reply(state.endpoints.disconnect_endpoint(&body.url).await)
}

async fn list_tools(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({ "tools": state.services.list_tools().await }))
}

#[derive(Debug, Deserialize)]
struct CallBody {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn call_tool(State(state): State<AdminState>, Json(body): Json<CallBody>) -> Json<Value> {
    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };
    reply(state.services.call_tool(&body.name, arguments).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_envelope_carries_taxonomy_codes() {
        let ok = reply(Ok(json!({"x": 1})));
        assert_eq!(ok.0["ok"], true);
        assert_eq!(ok.0["result"]["x"], 1);

        let err = reply::<Value>(Err(BridgeError::service_unavailable("calc")));
        assert_eq!(err.0["ok"], false);
        assert_eq!(err.0["error"]["code"], "serviceUnavailable");
        assert_eq!(err.0["error"]["jsonrpcCode"], -32002);
    }

    #[test]
    fn call_body_defaults_arguments() {
        let body: CallBody = serde_json::from_str(r#"{"name": "add"}"#).unwrap();
        assert!(body.arguments.is_null());

        let body: CallBody =
            serde_json::from_str(r#"{"name": "add", "arguments": {"a": 1}}"#).unwrap();
        assert_eq!(body.arguments["a"], 1);
    }
}
