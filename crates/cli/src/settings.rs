//! Config file model for the switchboard binary.
//!
//! One JSON file drives the whole process: upstream endpoint URLs, the
//! downstream service map, the endpoint retry/heartbeat tuning, and the
//! admin listen address. Everything except the file itself has defaults.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use switchboard_mcp::protocol::PROTOCOL_VERSION;
use switchboard_mcp::{
    EndpointOptions, ManagerOptions, ReconnectOptions, RetryPolicy, ServiceConfig,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Settings {
    /// Upstream WebSocket endpoints (`ws://` / `wss://`, tokens verbatim).
    pub mcp_endpoints: Vec<String>,
    /// Downstream services keyed by name; declaration order drives the
    /// catalog collision policy.
    pub mcp_servers: IndexMap<String, ServiceConfig>,
    /// MCP protocol revision advertised on both sides.
    pub protocol_version: Option<String>,
    /// Endpoint-level tool-call retry policy.
    pub retry: RetryPolicy,
    pub endpoint: EndpointTuning,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EndpointTuning {
    pub reconnect: ReconnectOptions,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_max_missed: u32,
    pub call_timeout_ms: u64,
}

impl Default for EndpointTuning {
    fn default() -> Self {
        Self {
            reconnect: ReconnectOptions::default(),
            heartbeat_interval_ms: 30_000,
            heartbeat_max_missed: 3,
            call_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AdminSettings {
    pub host: String,
    pub port: u16,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9430,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        // Map keys are the authoritative service names.
        for (name, config) in settings.mcp_servers.iter_mut() {
            config.name = name.clone();
        }
        Ok(settings)
    }

    pub fn service_configs(&self) -> Vec<ServiceConfig> {
        self.mcp_servers.values().cloned().collect()
    }

    pub fn protocol_version(&self) -> String {
        self.protocol_version
            .clone()
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string())
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            protocol_version: self.protocol_version(),
        }
    }

    pub fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions {
            protocol_version: self.protocol_version(),
            retry: self.retry.clone(),
            reconnect: self.endpoint.reconnect.clone(),
            heartbeat_interval_ms: self.endpoint.heartbeat_interval_ms,
            heartbeat_max_missed: self.endpoint.heartbeat_max_missed,
            call_timeout_ms: self.endpoint.call_timeout_ms,
            ..EndpointOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_full_config() {
        let file = write_config(
            r#"{
                "mcpEndpoints": ["wss://api.example.io/mcp/?token=abc"],
                "mcpServers": {
                    "calculator": {"command": "node", "args": ["calc.js"]},
                    "weather": {"url": "https://example.com/mcp"}
                },
                "protocolVersion": "2025-03-26",
                "retry": {"maxAttempts": 5},
                "endpoint": {"heartbeatIntervalMs": 15000},
                "admin": {"port": 9000}
            }"#,
        );
        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.mcp_endpoints.len(), 1);
        let configs = settings.service_configs();
        assert_eq!(configs.len(), 2);
        // Declaration order preserved, names filled from map keys.
        assert_eq!(configs[0].name, "calculator");
        assert_eq!(configs[1].name, "weather");
        assert_eq!(settings.protocol_version(), "2025-03-26");
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.endpoint.heartbeat_interval_ms, 15_000);
        assert_eq!(settings.endpoint.heartbeat_max_missed, 3);
        assert_eq!(settings.admin.port, 9000);
        assert_eq!(settings.admin.host, "127.0.0.1");
    }

    #[test]
    fn defaults_apply_to_an_empty_config() {
        let file = write_config("{}");
        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.mcp_endpoints.is_empty());
        assert!(settings.mcp_servers.is_empty());
        assert_eq!(settings.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(settings.admin.port, 9430);
        assert_eq!(settings.endpoint_options().heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let file = write_config(r#"{"mcpEndpoint": "wss://typo.example"}"#);
        assert!(Settings::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Settings::load(Path::new("/nonexistent/switchboard.json")).is_err());
    }
}
