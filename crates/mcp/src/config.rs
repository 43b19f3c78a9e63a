//! Service configuration model and transport-kind inference.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use switchboard_types::BridgeError;
use url::Url;

/// How a service is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamableHttp",
        }
    }
}

/// Immutable descriptor of one downstream MCP service.
///
/// In the config file these live in a map keyed by service name; the loader
/// copies the key into `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,

    /// Explicit transport kind. When absent the kind is inferred:
    /// `command` present ⇒ stdio; URL path containing `/sse` ⇒ sse;
    /// any other URL ⇒ streamableHttp.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransportKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Overlaid on the inherited parent environment for stdio children.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,

    #[serde(default)]
    pub reconnect: ReconnectOptions,

    #[serde(default)]
    pub ping: PingOptions,

    /// Per-operation default timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: None,
            command: None,
            args: Vec::new(),
            env: IndexMap::new(),
            url: None,
            headers: IndexMap::new(),
            reconnect: ReconnectOptions::default(),
            ping: PingOptions::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ServiceConfig {
    /// Resolve the transport kind, explicit over inferred.
    pub fn transport_kind(&self) -> Result<TransportKind, BridgeError> {
        if let Some(kind) = self.kind {
            return Ok(kind);
        }
        if self.command.is_some() {
            return Ok(TransportKind::Stdio);
        }
        let Some(url) = &self.url else {
            return Err(BridgeError::config(format!(
                "service '{}' has neither command nor url",
                self.name
            )));
        };
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.clone());
        if path.contains("/sse") {
            Ok(TransportKind::Sse)
        } else {
            Ok(TransportKind::StreamableHttp)
        }
    }

    /// Check internal consistency; returns `Config` errors, which are fatal.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.name.is_empty() {
            return Err(BridgeError::config("service name must not be empty"));
        }
        match self.transport_kind()? {
            TransportKind::Stdio => {
                let command = self.command.as_deref().unwrap_or("");
                if command.trim().is_empty() {
                    return Err(BridgeError::config(format!(
                        "service '{}': stdio transport requires a command",
                        self.name
                    )));
                }
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                let Some(url) = &self.url else {
                    return Err(BridgeError::config(format!(
                        "service '{}': http transport requires a url",
                        self.name
                    )));
                };
                Url::parse(url).map_err(|e| {
                    BridgeError::config(format!("service '{}': invalid url: {e}", self.name))
                })?;
            }
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(BridgeError::config(format!(
                "service '{}': backoffMultiplier must be >= 1.0",
                self.name
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Reconnect backoff knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ReconnectOptions {
    pub enabled: bool,
    /// Cap on attempts before the connection is marked failed.
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_interval_ms: 2_000,
            max_interval_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Liveness ping knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PingOptions {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Consecutive failures before the connection is declared dead.
    pub max_failures: u32,
    /// Grace period after connect before the first ping.
    pub start_delay_ms: u64,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            max_failures: 3,
            start_delay_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config() -> ServiceConfig {
        ServiceConfig {
            name: "calc".into(),
            command: Some("node".into()),
            args: vec!["server.js".into()],
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn infers_stdio_from_command() {
        assert_eq!(stdio_config().transport_kind().unwrap(), TransportKind::Stdio);
    }

    #[test]
    fn infers_sse_from_url_path() {
        let config = ServiceConfig {
            name: "remote".into(),
            url: Some("https://example.com/api/sse".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(config.transport_kind().unwrap(), TransportKind::Sse);
    }

    #[test]
    fn infers_streamable_http_otherwise() {
        let config = ServiceConfig {
            name: "remote".into(),
            url: Some("https://example.com/mcp".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.transport_kind().unwrap(),
            TransportKind::StreamableHttp
        );
    }

    #[test]
    fn explicit_kind_wins_over_inference() {
        let config = ServiceConfig {
            name: "remote".into(),
            kind: Some(TransportKind::StreamableHttp),
            url: Some("https://example.com/sse".into()),
            ..ServiceConfig::default()
        };
        assert_eq!(
            config.transport_kind().unwrap(),
            TransportKind::StreamableHttp
        );
    }

    #[test]
    fn validation_catches_missing_fields() {
        let config = ServiceConfig {
            name: "broken".into(),
            ..ServiceConfig::default()
        };
        assert!(config.transport_kind().is_err());

        let config = ServiceConfig {
            name: "broken".into(),
            kind: Some(TransportKind::Stdio),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            name: "broken".into(),
            url: Some("not a url".into()),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(stdio_config().validate().is_ok());
    }

    #[test]
    fn deserializes_config_file_entry() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "command": "uvx",
                "args": ["weather-server"],
                "env": {"API_KEY": "secret"},
                "reconnect": {"maxAttempts": 3, "initialIntervalMs": 500},
                "ping": {"enabled": false},
                "timeoutMs": 10000
            }"#,
        )
        .unwrap();
        assert_eq!(config.command.as_deref(), Some("uvx"));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_interval_ms, 500);
        // Unspecified knobs keep their defaults.
        assert_eq!(config.reconnect.max_interval_ms, 60_000);
        assert!(!config.ping.enabled);
        assert_eq!(config.timeout_ms, 10_000);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<ServiceConfig, _> =
            serde_json::from_str(r#"{"command": "npx", "bogus": true}"#);
        assert!(result.is_err());
    }
}
