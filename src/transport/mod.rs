//! Streamable HTTP transport for MCP.
//!
//! One endpoint path serves `POST` (JSON-RPC in, JSON or SSE out), `GET`
//! (standalone SSE stream with `Last-Event-ID` resumption) and `DELETE`
//! (session termination). Sessions are keyed by the `mcp-session-id`
//! header and live in a [`SessionRegistry`] until closed.

mod event_store;
mod gateway;
mod pipe;
mod registry;
mod session;
mod shutdown;

use std::sync::Arc;

pub use event_store::{EventId, EventStore, RetentionPolicy, StoredEvent, StreamId};
pub use gateway::{GatewayOptions, StreamableHttpGateway};
pub(crate) use pipe::SessionPipe;
pub use registry::SessionRegistry;
pub use session::{StreamableHttpTransport, TransportOptions, TransportRequest, TransportState};
pub use shutdown::{serve, shutdown_signal, ShutdownCoordinator, ShutdownReport};

/// Opaque session identifier issued on `initialize`.
pub type SessionId = Arc<str>;

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Stream carrying server-initiated messages delivered over `GET`.
pub const STANDALONE_STREAM_ID: &str = "standalone";
