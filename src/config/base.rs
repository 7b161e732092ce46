//! Gateway configuration.

use super::token::generate_random_token;
use std::{str::FromStr, time::Duration};

/// Configuration for the gateway binary.
///
/// Reads from environment variables with sensible defaults:
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `HOST` | `127.0.0.1` | Server bind address |
/// | `MCP_SERVER_PORT` / `PORT` | `3000` | Server port |
/// | `MCP_SERVER_NAME` | `My MCP Server` | Name reported in `serverInfo` |
/// | `MCP_SERVER_VERSION` | `1.0.0` | Version reported in `serverInfo` |
/// | `MCP_PATH` | `/mcp` | Endpoint path |
/// | `API_KEY` | (none) | API key; generated when absent |
/// | `MCP_JSON_RESPONSE` | `true` | Answer POSTs with JSON instead of SSE |
/// | `MCP_EVENT_RETENTION` | `1024` | Events kept per stream |
/// | `MCP_MAX_STREAMS` | `64` | Streams kept per session |
/// | `MCP_CLOSE_ON_DISCONNECT` | `false` | Close a session when its GET stream drops |
/// | `MCP_SHUTDOWN_TIMEOUT_SECS` | `5` | Per-session close timeout at shutdown |
///
/// # Example
///
/// ```rust
/// use mcp_gateway::GatewayConfig;
///
/// let config = GatewayConfig::from_env();
/// let (api_key, was_generated) = config.get_or_generate_api_key();
///
/// if was_generated {
///     println!("Generated API key: {}", api_key);
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub server_version: String,
    /// Endpoint path, always starting with `/`.
    pub path: String,
    pub api_key: Option<String>,
    pub json_response: bool,
    pub event_retention: usize,
    pub max_streams: usize,
    pub close_on_disconnect: bool,
    pub shutdown_timeout_secs: u64,
}

impl GatewayConfig {
    /// Create a new config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create a config from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let flag = |name: &str, default: bool| {
            var(name).map_or(default, |value| parse_flag(&value, default))
        };

        let path = var("MCP_PATH").unwrap_or_else(|| "/mcp".to_string());
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(var("MCP_SERVER_PORT"))
                .or_else(|| parse_var(var("PORT")))
                .unwrap_or(3000),
            server_name: var("MCP_SERVER_NAME").unwrap_or_else(|| "My MCP Server".to_string()),
            server_version: var("MCP_SERVER_VERSION").unwrap_or_else(|| "1.0.0".to_string()),
            path,
            api_key: var("API_KEY"),
            json_response: flag("MCP_JSON_RESPONSE", true),
            event_retention: parse_var(var("MCP_EVENT_RETENTION"))
                .filter(|n| *n > 0)
                .unwrap_or(1024),
            max_streams: parse_var(var("MCP_MAX_STREAMS"))
                .filter(|n| *n > 0)
                .unwrap_or(64),
            close_on_disconnect: flag("MCP_CLOSE_ON_DISCONNECT", false),
            shutdown_timeout_secs: parse_var(var("MCP_SHUTDOWN_TIMEOUT_SECS")).unwrap_or(5),
        }
    }

    /// Check if an API key was configured.
    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Get the configured API key or generate a new one.
    ///
    /// Returns a tuple of (api_key, was_generated).
    pub fn get_or_generate_api_key(&self) -> (String, bool) {
        match &self.api_key {
            Some(key) => (key.clone(), false),
            None => (generate_random_token(), true),
        }
    }

    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.trim().parse().ok())
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
