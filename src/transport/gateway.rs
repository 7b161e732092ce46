//! HTTP dispatcher for the Streamable HTTP endpoint.
//!
//! Routes `GET`, `POST` and `DELETE` on one path to the session's
//! [`StreamableHttpTransport`], creating sessions on `initialize`.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    SessionId, SessionRegistry, ShutdownCoordinator, StreamableHttpTransport, TransportOptions,
    TransportRequest, LAST_EVENT_ID_HEADER, MCP_SESSION_ID_HEADER,
};
use crate::error::{GatewayError, Result};
use crate::protocol::{is_initialize_request, parse_messages, ClientMessage};
use crate::server::McpServer;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Route serving all three verbs.
    pub path: String,
    pub transport: TransportOptions,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            path: "/mcp".to_string(),
            transport: TransportOptions::default(),
        }
    }
}

/// Session-multiplexing front door for one [`McpServer`].
///
/// # Example
///
/// ```rust,ignore
/// use mcp_gateway::{GatewayOptions, Implementation, McpServer, StreamableHttpGateway, ToolRegistry};
///
/// let info = Implementation { name: "demo".into(), version: "1.0.0".into() };
/// let server = Arc::new(McpServer::new(info, ToolRegistry::new()));
/// let gateway = StreamableHttpGateway::new(server, GatewayOptions::default());
/// let router = gateway.router();
/// ```
#[derive(Clone)]
pub struct StreamableHttpGateway {
    registry: SessionRegistry,
    server: Arc<McpServer>,
    options: Arc<GatewayOptions>,
}

impl StreamableHttpGateway {
    pub fn new(server: Arc<McpServer>, options: GatewayOptions) -> Self {
        Self {
            registry: SessionRegistry::new(),
            server,
            options: Arc::new(options),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Coordinator that drains this gateway's sessions on shutdown.
    pub fn shutdown_coordinator(&self, close_timeout: Duration) -> ShutdownCoordinator {
        ShutdownCoordinator::new(self.registry.clone(), close_timeout)
    }

    /// Router exposing the endpoint; layer middleware on it as needed.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.options.path,
                get(get_handler).post(post_handler).delete(delete_handler),
            )
            .with_state(self.clone())
    }

    /// Resolve a GET to its session and open (or resume) the SSE stream.
    pub async fn dispatch_get(&self, headers: &HeaderMap) -> Result<Response> {
        let session_id = required_session_id(headers)?;
        let transport = self.registry.get(session_id).await?;
        let last_event_id = header_str(headers, LAST_EVENT_ID_HEADER).map(str::to_string);
        match &last_event_id {
            Some(marker) => info!(session_id, last_event_id = %marker, "client resuming SSE stream"),
            None => debug!(session_id, "establishing SSE stream"),
        }
        transport
            .handle_request(TransportRequest::Get { last_event_id })
            .await
    }

    /// Route a POST to its session, or create one for an `initialize`.
    pub async fn dispatch_post(&self, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
        if let Some(session_id) = header_str(headers, MCP_SESSION_ID_HEADER) {
            let transport = self.registry.get(session_id).await?;
            let messages = parse_messages(body)?;
            return transport
                .handle_request(TransportRequest::Post(messages))
                .await;
        }

        let messages = parse_messages(body)?;
        if !messages.iter().any(is_initialize_request) {
            return Err(GatewayError::BadRequest(
                "No valid session ID provided".to_string(),
            ));
        }
        if messages.len() > 1 {
            return Err(GatewayError::Protocol(
                "Only one initialization request is allowed".to_string(),
            ));
        }

        self.initialize_session(messages).await
    }

    /// Terminate the session named by the request.
    pub async fn dispatch_delete(&self, headers: &HeaderMap) -> Result<Response> {
        let session_id = required_session_id(headers)?;
        let transport = self.registry.get(session_id).await?;
        info!(session_id, "session termination requested");
        transport.handle_request(TransportRequest::Delete).await
    }

    async fn initialize_session(&self, messages: Vec<ClientMessage>) -> Result<Response> {
        if self.registry.is_draining() {
            return Err(GatewayError::ShuttingDown);
        }

        let session_id: SessionId = Uuid::new_v4().to_string().into();
        let transport = Arc::new(StreamableHttpTransport::new(
            session_id.clone(),
            self.options.transport.clone(),
        ));

        transport.begin_initialize()?;
        self.server.connect(&transport)?;
        // Registered (and Active) before the initialize response exists.
        if let Err(error) = self.registry.create(transport.clone()).await {
            transport.close().await;
            return Err(error);
        }
        info!(%session_id, "session initialized");

        match transport
            .handle_request(TransportRequest::Post(messages))
            .await
        {
            Ok(response) => Ok(response),
            Err(error) => {
                transport.close().await;
                Err(error)
            }
        }
    }
}

async fn get_handler(
    State(gateway): State<StreamableHttpGateway>,
    headers: HeaderMap,
) -> Response {
    observe(Method::GET, &headers, 0, gateway.dispatch_get(&headers)).await
}

async fn post_handler(
    State(gateway): State<StreamableHttpGateway>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    observe(
        Method::POST,
        &headers,
        body.len(),
        gateway.dispatch_post(&headers, &body),
    )
    .await
}

async fn delete_handler(
    State(gateway): State<StreamableHttpGateway>,
    headers: HeaderMap,
) -> Response {
    observe(Method::DELETE, &headers, 0, gateway.dispatch_delete(&headers)).await
}

/// Logging hook around every dispatch; the only place errors become responses.
async fn observe<F>(method: Method, headers: &HeaderMap, body_len: usize, dispatch: F) -> Response
where
    F: Future<Output = Result<Response>>,
{
    let session_id = header_str(headers, MCP_SESSION_ID_HEADER).unwrap_or("-");
    let started = Instant::now();
    debug!(%method, session_id, body_len, "MCP request received");

    let response = match dispatch.await {
        Ok(response) => response,
        Err(err) => {
            if err.status().is_server_error() {
                error!(%method, session_id, error = %err, "MCP request failed");
            } else {
                warn!(%method, session_id, error = %err, "MCP request rejected");
            }
            err.into_response()
        }
    };

    info!(
        %method,
        session_id,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "MCP request handled"
    );
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required_session_id(headers: &HeaderMap) -> Result<&str> {
    header_str(headers, MCP_SESSION_ID_HEADER).ok_or(GatewayError::MissingSessionId)
}
