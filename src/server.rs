//! MCP server role bound to each session's transport.
//!
//! One [`McpServer`] holds what every session shares (identity, tools,
//! instructions). [`McpServer::connect`] gives a session its own rmcp
//! service, driven over that session's [`SessionPipe`].

use std::{
    sync::{Arc, Weak},
    time::Instant,
};

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ErrorData as McpError, Implementation,
        InitializeRequestParam, InitializeResult, ListToolsResult, LoggingLevel,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, SetLevelRequestParam,
    },
    service::{RequestContext, ServiceExt},
    RoleServer, ServerHandler,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::negotiate_protocol_version;
use crate::tools::ToolRegistry;
use crate::transport::{SessionPipe, StreamableHttpTransport};

/// Messages buffered in each direction between a transport and its server role.
const PIPE_CAPACITY: usize = 64;

/// Answers MCP requests for every session it is connected to.
///
/// Per-session state (client info, log level, event history) lives on the
/// transport.
#[derive(Debug)]
pub struct McpServer {
    info: Implementation,
    tools: ToolRegistry,
    instructions: Option<String>,
}

impl McpServer {
    pub fn new(info: Implementation, tools: ToolRegistry) -> Self {
        Self {
            info,
            tools,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The `initialize` result before protocol negotiation.
    pub fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .build(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
            ..Default::default()
        }
    }

    /// Bind this server to a new session's transport and start serving it.
    ///
    /// A transport accepts exactly one server. The session's service runs
    /// until the transport closes; if it stops first (for example because
    /// the client broke the initialization handshake) the transport closes.
    pub fn connect(self: &Arc<Self>, transport: &Arc<StreamableHttpTransport>) -> Result<()> {
        let (to_server, from_client) = mpsc::channel(PIPE_CAPACITY);
        let (to_client, from_server) = mpsc::channel(PIPE_CAPACITY);
        transport.bind(to_server, from_server)?;

        let session_id = transport.session_id().clone();
        let pipe = SessionPipe::new(
            session_id.clone(),
            from_client,
            to_client,
            transport.shutdown_token(),
        );
        let handler = SessionHandler {
            server: Arc::clone(self),
            transport: Arc::downgrade(transport),
        };
        let weak = Arc::downgrade(transport);

        tokio::spawn(async move {
            match handler.serve(pipe).await {
                Ok(service) => {
                    if let Err(err) = service.waiting().await {
                        warn!(%session_id, error = %err, "MCP service task failed");
                    }
                }
                Err(err) => warn!(%session_id, error = %err, "MCP session failed to initialize"),
            }
            debug!(%session_id, "MCP service stopped");
            if let Some(transport) = weak.upgrade() {
                transport.server_stopped().await;
            }
        });

        debug!(session_id = %transport.session_id(), server = %self.info.name, "server connected to transport");
        Ok(())
    }
}

/// The server as one session sees it.
#[derive(Clone)]
struct SessionHandler {
    server: Arc<McpServer>,
    transport: Weak<StreamableHttpTransport>,
}

impl SessionHandler {
    fn transport(&self) -> std::result::Result<Arc<StreamableHttpTransport>, McpError> {
        self.transport
            .upgrade()
            .ok_or_else(|| McpError::internal_error("session is gone", None))
    }
}

impl ServerHandler for SessionHandler {
    fn get_info(&self) -> ServerInfo {
        self.server.get_info()
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<InitializeResult, McpError> {
        let transport = self.transport()?;
        if !transport.record_client_info(request.client_info.clone()) {
            return Err(McpError::invalid_request(
                "Invalid Request: Server already initialized",
                None,
            ));
        }
        info!(
            session_id = %transport.session_id(),
            client = %request.client_info.name,
            client_version = %request.client_info.version,
            "client initialized session"
        );

        let mut info = self.server.get_info();
        info.protocol_version = negotiate_protocol_version(&request.protocol_version);
        Ok(info)
    }

    async fn list_tools(
        &self,
        _request: PaginatedRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: self.server.tools.definitions(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let transport = self.transport()?;
        let started = Instant::now();
        let result = self
            .server
            .tools
            .call(&request.name, request.arguments)
            .await
            .map_err(|err| McpError::invalid_params(err.to_string(), None))?;

        // Stored before the response leaves, so a client that saw the
        // response can always resume past the log event.
        let is_error = result.is_error.unwrap_or(false);
        let level = if is_error {
            LoggingLevel::Error
        } else {
            LoggingLevel::Info
        };
        let summary = json!({
            "tool": request.name,
            "isError": is_error,
            "elapsedMs": started.elapsed().as_millis() as u64
        });
        if let Err(err) = transport.log(level, &self.server.info.name, summary).await {
            debug!(session_id = %transport.session_id(), error = %err, "tool log notification not delivered");
        }
        Ok(result)
    }

    async fn set_level(
        &self,
        request: SetLevelRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<(), McpError> {
        self.transport()?.set_log_level(request.level).await;
        Ok(())
    }
}
