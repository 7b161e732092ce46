//! Gateway error taxonomy and its HTTP / JSON-RPC rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rmcp::model::{ErrorCode, ErrorData};
use serde_json::{json, Value};

use crate::protocol::{JSONRPC_VERSION, SERVER_ERROR};
use crate::transport::TransportState;

/// Errors surfaced by the session gateway.
///
/// Every variant is recovered at the dispatcher boundary and rendered as a
/// JSON-RPC error envelope with `id: null`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Bad Request: Mcp-Session-Id header is required")]
    MissingSessionId,

    #[error("Bad Request: Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already registered: {0}")]
    DuplicateSession(String),

    #[error("Bad Request: Session {session_id} is {state}")]
    InvalidSessionState {
        session_id: String,
        state: TransportState,
    },

    #[error("Bad Request: {0}")]
    Protocol(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Cannot resume stream {stream_id} after event {event_id}; reinitialize the session")]
    ReplayGap { stream_id: String, event_id: u64 },

    #[error("Conflict: Only one SSE stream is allowed per session ({0})")]
    StreamConflict(String),

    #[error("Service Unavailable: gateway is shutting down")]
    ShuttingDown,

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status class for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSessionId
            | Self::SessionNotFound(_)
            | Self::InvalidSessionState { .. }
            | Self::Protocol(_)
            | Self::BadRequest(_)
            | Self::ReplayGap { .. } => StatusCode::BAD_REQUEST,
            Self::StreamConflict(_) => StatusCode::CONFLICT,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::DuplicateSession(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code placed in the envelope.
    pub fn code(&self) -> ErrorCode {
        if self.status().is_server_error() {
            ErrorCode::INTERNAL_ERROR
        } else {
            SERVER_ERROR
        }
    }

    /// Render the `{jsonrpc, error, id: null}` envelope. Typed error
    /// messages require a request id, so this one is assembled as JSON.
    pub fn to_envelope(&self) -> Value {
        let error = ErrorData::new(self.code(), self.to_string(), None);
        json!({ "jsonrpc": JSONRPC_VERSION, "error": error, "id": Value::Null })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        let errors = [
            GatewayError::MissingSessionId,
            GatewayError::SessionNotFound("abc".into()),
            GatewayError::BadRequest("no session".into()),
            GatewayError::Protocol("bad json".into()),
            GatewayError::ReplayGap {
                stream_id: "standalone".into(),
                event_id: 3,
            },
        ];
        for error in errors {
            assert_eq!(error.status(), StatusCode::BAD_REQUEST);
            assert_eq!(error.code(), SERVER_ERROR);
        }
    }

    #[test]
    fn internal_errors_map_to_server_error() {
        let error = GatewayError::Internal("boom".into());
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), ErrorCode::INTERNAL_ERROR);

        let error = GatewayError::DuplicateSession("abc".into());
        assert_eq!(error.code(), ErrorCode::INTERNAL_ERROR);

        let error = GatewayError::ShuttingDown;
        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.code(), ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn envelope_has_null_id() {
        let envelope = GatewayError::MissingSessionId.to_envelope();
        assert_eq!(envelope["jsonrpc"], "2.0");
        assert_eq!(envelope["error"]["code"], -32000);
        assert!(envelope["id"].is_null());
        assert!(envelope.as_object().unwrap().contains_key("id"));
    }
}
