//! Classification of inbound MCP messages.
//!
//! The wire model is `rmcp`'s. This module turns a POST body into messages
//! the session's server role can take, and answers the requests that model
//! cannot represent (unknown methods, malformed params) without bothering it.

use rmcp::model::{
    ClientJsonRpcMessage, ClientRequest, ErrorCode, ErrorData, JsonRpcMessage, LoggingLevel,
    ProtocolVersion, RequestId, ServerJsonRpcMessage,
};
use serde_json::Value;

use crate::error::{GatewayError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revisions this gateway can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Implementation-defined JSON-RPC code for session and transport failures.
pub const SERVER_ERROR: ErrorCode = ErrorCode(-32000);

/// Request methods the client-side model knows. A request naming one of
/// these that still fails to parse has bad params rather than a bad method.
const CLIENT_REQUEST_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "completion/complete",
    "logging/setLevel",
    "prompts/get",
    "prompts/list",
    "resources/list",
    "resources/templates/list",
    "resources/read",
    "resources/subscribe",
    "resources/unsubscribe",
    "tools/call",
    "tools/list",
];

/// One inbound element of a POST body.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Handed to the session's server role.
    Rpc(ClientJsonRpcMessage),
    /// A request the transport answers itself with `error`.
    Rejected { id: RequestId, error: ErrorData },
    /// A notification nobody understands; dropped.
    Ignored { method: String },
}

impl ClientMessage {
    /// Classify a single JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = &value else {
            return Err(GatewayError::Protocol(
                "JSON-RPC message must be an object".to_string(),
            ));
        };
        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(GatewayError::Protocol(
                "jsonrpc version must be \"2.0\"".to_string(),
            ));
        }
        let method = object
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = object.get("id").filter(|id| !id.is_null()).cloned();

        let err = match serde_json::from_value::<ClientJsonRpcMessage>(value) {
            Ok(message) => return Ok(Self::Rpc(message)),
            Err(err) => err,
        };

        match (method, id) {
            (Some(method), _) if method == "initialize" => Err(GatewayError::Protocol(format!(
                "invalid initialize request: {err}"
            ))),
            (Some(method), Some(id)) => {
                let id = serde_json::from_value::<RequestId>(id)
                    .map_err(|e| GatewayError::Protocol(format!("invalid request id: {e}")))?;
                let error = if CLIENT_REQUEST_METHODS.contains(&method.as_str()) {
                    ErrorData::invalid_params(format!("Invalid params for {method}: {err}"), None)
                } else {
                    ErrorData::new(
                        ErrorCode::METHOD_NOT_FOUND,
                        format!("Method not found: {method}"),
                        None,
                    )
                };
                Ok(Self::Rejected { id, error })
            }
            (Some(method), None) => Ok(Self::Ignored { method }),
            (None, _) => Err(GatewayError::Protocol(format!("invalid message: {err}"))),
        }
    }

    /// Id of a message that expects a reply.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Rpc(JsonRpcMessage::Request(request)) => Some(&request.id),
            Self::Rejected { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Parse a POST body holding one message or a batch array.
pub fn parse_messages(body: &[u8]) -> Result<Vec<ClientMessage>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Protocol(format!("Parse error: {e}")))?;

    match value {
        Value::Array(items) if items.is_empty() => {
            Err(GatewayError::Protocol("empty batch".to_string()))
        }
        Value::Array(items) => items.into_iter().map(ClientMessage::from_value).collect(),
        single => Ok(vec![ClientMessage::from_value(single)?]),
    }
}

/// Whether `message` is a well-formed `initialize` request.
///
/// Malformed ones never get this far: [`ClientMessage::from_value`] turns
/// them into protocol errors.
pub fn is_initialize_request(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::Rpc(JsonRpcMessage::Request(request))
            if matches!(request.request, ClientRequest::InitializeRequest(_))
    )
}

/// Id a server message answers, if it is a response at all.
pub fn response_id(message: &ServerJsonRpcMessage) -> Option<&RequestId> {
    match message {
        JsonRpcMessage::Response(response) => Some(&response.id),
        JsonRpcMessage::Error(error) => Some(&error.id),
        _ => None,
    }
}

/// Stable map key for a request id.
pub fn request_key(id: &RequestId) -> String {
    serde_json::to_string(id).unwrap_or_default()
}

/// Pick the protocol revision to answer an `initialize` with.
pub fn negotiate_protocol_version(requested: &ProtocolVersion) -> ProtocolVersion {
    let supported = serde_json::to_value(requested)
        .ok()
        .and_then(|value| value.as_str().map(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v)))
        .unwrap_or(false);
    if supported {
        requested.clone()
    } else {
        ProtocolVersion::LATEST
    }
}

/// Rank of a logging level, least severe first.
pub fn severity(level: &LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}
