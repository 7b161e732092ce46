use std::sync::Arc;

use mcp_gateway::{
    init_tracing, serve, shutdown_signal, ApiKeyAuthLayer, CallToolResult, Content,
    GatewayConfig, GatewayOptions, Implementation, McpServer, RetentionPolicy,
    StreamableHttpGateway, Tool, ToolRegistry, TransportOptions,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

fn echo_tool() -> Tool {
    Tool::new(
        "echo",
        "Echo the given message back",
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"],
            "additionalProperties": false
        }),
        |args: Map<String, Value>| async move {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(CallToolResult::success(vec![Content::text(message)]))
        },
    )
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = init_tracing("mcp_gateway=info,info") {
        eprintln!("failed to initialize tracing: {err}");
    }

    let config = GatewayConfig::from_env();
    let (api_key, generated) = config.get_or_generate_api_key();
    if generated {
        warn!("API_KEY not set, generated a key for this run");
        eprintln!("Generated API key: {api_key}");
    }

    let tools = ToolRegistry::new()
        .with_tool(echo_tool())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let info = Implementation {
        name: config.server_name.clone(),
        version: config.server_version.clone(),
    };
    let server = Arc::new(McpServer::new(info, tools));

    let options = GatewayOptions {
        path: config.path.clone(),
        transport: TransportOptions {
            json_response: config.json_response,
            retention: RetentionPolicy {
                max_events_per_stream: config.event_retention,
                max_streams: config.max_streams,
            },
            close_on_disconnect: config.close_on_disconnect,
            ..TransportOptions::default()
        },
    };
    let gateway = StreamableHttpGateway::new(server, options);
    let router = gateway.router().layer(ApiKeyAuthLayer::new(api_key));
    let coordinator = gateway.shutdown_coordinator(config.shutdown_timeout());

    let addr = config.socket_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|err| {
        error!(%addr, error = %err, "failed to bind");
        err
    })?;
    info!(
        name = %config.server_name,
        version = %config.server_version,
        path = %config.path,
        "starting MCP gateway"
    );

    serve(listener, router, coordinator, shutdown_signal()).await
}
