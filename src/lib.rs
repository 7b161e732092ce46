//! MCP Gateway - Session-multiplexed Streamable HTTP front door for MCP servers.
//!
//! This crate puts one MCP server behind a single HTTP endpoint and keeps an
//! independent session per client:
//!
//! - **transport**: Streamable HTTP transport, session registry, dispatcher,
//!   per-session event store with `Last-Event-ID` replay, and shutdown draining
//! - **auth**: API key middleware (`x-api-key`, Bearer, or Basic Auth)
//! - **config**: Configuration management with environment variable support
//! - **bootstrap**: Tracing initialization utilities
//!
//! # Features
//!
//! - `transport` - rmcp server role, tools and the Streamable HTTP gateway
//! - `auth` - API key authentication middleware
//! - `config` - Configuration utilities
//! - `bootstrap` - Tracing setup
//! - `full` - All features (enabled by default)
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_gateway::{
//!     init_tracing, ApiKeyAuthLayer, GatewayConfig, GatewayOptions, Implementation, McpServer,
//!     StreamableHttpGateway, ToolRegistry,
//! };
//!
//! let _ = init_tracing("mcp_gateway=debug,info");
//! let config = GatewayConfig::from_env();
//! let (api_key, _generated) = config.get_or_generate_api_key();
//!
//! let server = Arc::new(McpServer::new(
//!     Implementation {
//!         name: config.server_name.clone(),
//!         version: config.server_version.clone(),
//!     },
//!     ToolRegistry::new(),
//! ));
//! let gateway = StreamableHttpGateway::new(server, GatewayOptions::default());
//! let router = gateway.router().layer(ApiKeyAuthLayer::new(api_key));
//! ```

#[cfg(feature = "transport")]
pub mod error;

#[cfg(feature = "transport")]
pub mod protocol;

#[cfg(feature = "transport")]
pub mod server;

#[cfg(feature = "transport")]
pub mod tools;

#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "auth")]
pub mod auth;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "bootstrap")]
pub mod bootstrap;

// Re-exports for convenience
#[cfg(feature = "transport")]
pub use error::{GatewayError, Result};

#[cfg(feature = "transport")]
pub use server::McpServer;

#[cfg(feature = "transport")]
pub use rmcp::model::Implementation;

#[cfg(feature = "transport")]
pub use tools::{CallToolResult, Content, Tool, ToolDefinition, ToolError, ToolRegistry};

#[cfg(feature = "transport")]
pub use transport::{
    serve, shutdown_signal, EventId, EventStore, GatewayOptions, RetentionPolicy,
    SessionRegistry, ShutdownCoordinator, ShutdownReport, StreamableHttpGateway,
    StreamableHttpTransport, TransportOptions, TransportState,
};

#[cfg(feature = "auth")]
pub use auth::{ApiKeyAuthLayer, ApiKeyAuthService};

#[cfg(feature = "config")]
pub use config::{generate_random_token, GatewayConfig};

#[cfg(feature = "bootstrap")]
pub use bootstrap::init_tracing;
