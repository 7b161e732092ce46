//! Per-session Streamable HTTP transport.
//!
//! A [`StreamableHttpTransport`] owns one session's event store and its
//! (at most one) live SSE attachment. POSTed messages are fed to the
//! session's server role; its responses are matched back to the waiting
//! POST by request id, and everything else it emits goes to the standalone
//! stream. GET streams support `Last-Event-ID` replay, and DELETE tears the
//! session down.

use std::{
    collections::HashMap,
    convert::Infallible,
    fmt,
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, StreamExt};
use rmcp::model::{
    ClientJsonRpcMessage, Implementation, JsonRpcError, JsonRpcMessage, JsonRpcVersion2_0,
    LoggingLevel, ServerJsonRpcMessage,
};
use serde_json::{json, Value};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot, watch, Mutex,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event_store::{EventId, EventStore, RetentionPolicy, StoredEvent};
use super::registry::RegistryLink;
use super::{SessionId, MCP_SESSION_ID_HEADER, STANDALONE_STREAM_ID};
use crate::error::{GatewayError, Result};
use crate::protocol::{request_key, response_id, severity, ClientMessage, JSONRPC_VERSION};

/// Lifecycle of a transport. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Initializing,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Behaviour switches shared by every transport a gateway creates.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Answer POSTs with a JSON body instead of an SSE stream.
    pub json_response: bool,
    pub retention: RetentionPolicy,
    /// Close the session when its GET stream's connection drops.
    pub close_on_disconnect: bool,
    /// Live events buffered per GET stream before the client is considered lagging.
    pub live_buffer: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            json_response: true,
            retention: RetentionPolicy::default(),
            close_on_disconnect: false,
            live_buffer: 64,
        }
    }
}

/// A request routed to a transport by the dispatcher.
#[derive(Debug)]
pub enum TransportRequest {
    Post(Vec<ClientMessage>),
    Get { last_event_id: Option<String> },
    Delete,
}

struct Channels {
    events: EventStore,
    standalone: Option<mpsc::Sender<StoredEvent>>,
    /// POSTed requests waiting for the server role's answer, by request id.
    pending: HashMap<String, oneshot::Sender<ServerJsonRpcMessage>>,
    log_level: LoggingLevel,
}

enum Reply {
    Ready(ServerJsonRpcMessage),
    Pending(oneshot::Receiver<ServerJsonRpcMessage>),
}

pub struct StreamableHttpTransport {
    session_id: SessionId,
    options: TransportOptions,
    state: watch::Sender<TransportState>,
    channels: Mutex<Channels>,
    server: OnceLock<mpsc::Sender<ClientJsonRpcMessage>>,
    client_info: OnceLock<Implementation>,
    registry: OnceLock<RegistryLink>,
    shutdown: CancellationToken,
}

impl fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamableHttpTransport {
    pub fn new(session_id: SessionId, options: TransportOptions) -> Self {
        let (state, _) = watch::channel(TransportState::New);
        let events = EventStore::new(options.retention).pin(STANDALONE_STREAM_ID);
        Self {
            session_id,
            options,
            state,
            channels: Mutex::new(Channels {
                events,
                standalone: None,
                pending: HashMap::new(),
                log_level: LoggingLevel::Info,
            }),
            server: OnceLock::new(),
            client_info: OnceLock::new(),
            registry: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Wait until the transport reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = state.wait_for(|s| *s == TransportState::Closed).await;
    }

    /// `New → Initializing`: an initialization request is being handled.
    pub fn begin_initialize(&self) -> Result<()> {
        self.transition(&[TransportState::New], TransportState::Initializing)
            .map(|_| ())
    }

    /// `Initializing → Active`. Called by the registry while it holds the
    /// slot for this session, so registration and activation are atomic.
    pub(crate) fn activate(&self) -> Result<()> {
        self.transition(&[TransportState::Initializing], TransportState::Active)
            .map(|_| ())
    }

    pub(crate) fn attach_registry(&self, link: RegistryLink) {
        if self.registry.set(link).is_err() {
            warn!(session_id = %self.session_id, "transport already attached to a registry");
        }
    }

    /// Bind the server role that answers this session's requests: client
    /// messages go to `to_server`, and whatever arrives on `from_server` is
    /// routed back to the client.
    pub(crate) fn bind(
        self: &Arc<Self>,
        to_server: mpsc::Sender<ClientJsonRpcMessage>,
        from_server: mpsc::Receiver<ServerJsonRpcMessage>,
    ) -> Result<()> {
        self.server.set(to_server).map_err(|_| {
            GatewayError::Internal(format!(
                "transport for session {} is already connected",
                self.session_id
            ))
        })?;
        tokio::spawn(forward_server_messages(Arc::downgrade(self), from_server));
        Ok(())
    }

    /// Token cancelled when the transport starts closing.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Remember the client's `initialize` info; `false` if already initialized.
    pub(crate) fn record_client_info(&self, client_info: Implementation) -> bool {
        self.client_info.set(client_info).is_ok()
    }

    pub fn client_info(&self) -> Option<&Implementation> {
        self.client_info.get()
    }

    pub async fn set_log_level(&self, level: LoggingLevel) {
        self.channels.lock().await.log_level = level;
    }

    /// Whether a GET stream is currently attached and its client still connected.
    pub async fn has_live_stream(&self) -> bool {
        self.channels
            .lock()
            .await
            .standalone
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Entry point for requests resolved to this session.
    pub async fn handle_request(self: &Arc<Self>, request: TransportRequest) -> Result<Response> {
        match request {
            TransportRequest::Post(messages) => self.handle_post(messages).await,
            TransportRequest::Get { last_event_id } => {
                self.handle_get(last_event_id.as_deref()).await
            }
            TransportRequest::Delete => self.handle_delete().await,
        }
    }

    async fn handle_post(&self, messages: Vec<ClientMessage>) -> Result<Response> {
        self.ensure_active()?;
        let server = self.server.get().cloned().ok_or_else(|| {
            GatewayError::Internal(format!(
                "transport for session {} is not connected",
                self.session_id
            ))
        })?;

        let mut replies = Vec::new();
        for message in messages {
            match message {
                ClientMessage::Rpc(message) => {
                    if let JsonRpcMessage::Request(request) = &message {
                        let (sender, receiver) = oneshot::channel();
                        self.channels
                            .lock()
                            .await
                            .pending
                            .insert(request_key(&request.id), sender);
                        replies.push(Reply::Pending(receiver));
                    }
                    server
                        .send(message)
                        .await
                        .map_err(|_| self.server_gone())?;
                }
                ClientMessage::Rejected { id, error } => {
                    replies.push(Reply::Ready(JsonRpcMessage::Error(JsonRpcError {
                        jsonrpc: JsonRpcVersion2_0,
                        id,
                        error,
                    })));
                }
                ClientMessage::Ignored { method } => {
                    debug!(session_id = %self.session_id, %method, "ignoring unknown notification");
                }
            }
        }

        if replies.is_empty() {
            return Ok(self.with_session_header(StatusCode::ACCEPTED.into_response()));
        }

        let mut responses = Vec::with_capacity(replies.len());
        for reply in replies {
            let message = match reply {
                Reply::Ready(message) => message,
                Reply::Pending(receiver) => tokio::select! {
                    answer = receiver => answer.map_err(|_| self.server_gone())?,
                    _ = self.shutdown.cancelled() => {
                        return Err(GatewayError::InvalidSessionState {
                            session_id: self.session_id.to_string(),
                            state: self.state(),
                        })
                    }
                },
            };
            let value = serde_json::to_value(message)
                .map_err(|e| GatewayError::Internal(format!("failed to encode response: {e}")))?;
            responses.push(value);
        }

        if self.options.json_response {
            let response = if responses.len() == 1 {
                Json(responses.remove(0)).into_response()
            } else {
                Json(Value::Array(responses)).into_response()
            };
            return Ok(self.with_session_header(response));
        }

        // One SSE stream per POST, stored so the client can resume it.
        let stream_id = format!("post-{}", Uuid::new_v4().simple());
        let events = {
            let mut channels = self.channels.lock().await;
            responses
                .into_iter()
                .map(|response| {
                    let payload = Arc::new(response);
                    let id = channels.events.append(&stream_id, payload.clone());
                    StoredEvent { id, payload }
                })
                .collect::<Vec<_>>()
        };
        debug!(session_id = %self.session_id, %stream_id, events = events.len(), "answering POST over SSE");

        let body = stream::iter(events).map(|event| Ok::<_, Infallible>(sse_event(&event)));
        Ok(self.with_session_header(Sse::new(body).into_response()))
    }

    async fn handle_get(self: &Arc<Self>, last_event_id: Option<&str>) -> Result<Response> {
        self.ensure_active()?;
        let marker = last_event_id.map(str::parse::<EventId>).transpose()?;
        let live = marker
            .as_ref()
            .map_or(true, |m| m.stream_id().as_ref() == STANDALONE_STREAM_ID);

        let (sender, receiver) = mpsc::channel(self.options.live_buffer.max(1));
        let replayed = {
            let mut channels = self.channels.lock().await;
            let replayed = match &marker {
                Some(marker) => channels.events.replay_after(marker)?,
                None => Vec::new(),
            };
            if live {
                if channels
                    .standalone
                    .as_ref()
                    .is_some_and(|existing| !existing.is_closed())
                {
                    return Err(GatewayError::StreamConflict(self.session_id.to_string()));
                }
                channels.standalone = Some(sender);
            }
            replayed
        };

        info!(
            session_id = %self.session_id,
            last_event_id = last_event_id.unwrap_or("-"),
            replayed = replayed.len(),
            live,
            "SSE stream established"
        );

        let mut guard = StreamGuard {
            transport: Arc::downgrade(self),
            last_delivered: marker,
            live,
        };
        let shutdown = self.shutdown.clone();
        let events = stream::iter(replayed)
            .chain(ReceiverStream::new(receiver))
            .map(move |event| {
                guard.last_delivered = Some(event.id.clone());
                Ok::<_, Infallible>(sse_event(&event))
            })
            .take_until(async move { shutdown.cancelled().await });

        let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
        Ok(self.with_session_header(sse.into_response()))
    }

    async fn handle_delete(&self) -> Result<Response> {
        match self.state() {
            TransportState::Active => {
                self.close().await;
            }
            // A concurrent close already won; termination is idempotent.
            TransportState::Closing | TransportState::Closed => {
                debug!(session_id = %self.session_id, "DELETE on a session that is already closing");
            }
            state => {
                return Err(GatewayError::InvalidSessionState {
                    session_id: self.session_id.to_string(),
                    state,
                })
            }
        }
        Ok(StatusCode::OK.into_response())
    }

    /// Send a server-initiated notification on the standalone stream.
    ///
    /// The event is stored first, then pushed to the attached GET stream if
    /// there is one. A lagging or vanished client is detached and can catch
    /// up with `Last-Event-ID`.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<EventId> {
        let mut notification = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
        if let Some(params) = params {
            notification["params"] = params;
        }
        self.publish(notification).await
    }

    /// Store `payload` on the standalone stream and push it live.
    async fn publish(&self, payload: Value) -> Result<EventId> {
        self.ensure_active()?;
        let payload = Arc::new(payload);

        let mut channels = self.channels.lock().await;
        let id = channels.events.append(STANDALONE_STREAM_ID, payload.clone());

        let outcome = channels.standalone.as_ref().map(|sender| {
            sender.try_send(StoredEvent {
                id: id.clone(),
                payload,
            })
        });
        match outcome {
            None | Some(Ok(())) => {}
            Some(Err(TrySendError::Full(_))) => {
                warn!(session_id = %self.session_id, event_id = %id, "SSE client is lagging, detaching live stream");
                channels.standalone = None;
            }
            Some(Err(TrySendError::Closed(_))) => {
                debug!(session_id = %self.session_id, "SSE client went away, detaching live stream");
                channels.standalone = None;
            }
        }

        Ok(id)
    }

    /// Emit a `notifications/message` log event if `level` passes the
    /// session's threshold.
    pub async fn log(
        &self,
        level: LoggingLevel,
        logger: &str,
        data: Value,
    ) -> Result<Option<EventId>> {
        if severity(&level) < severity(&self.channels.lock().await.log_level) {
            return Ok(None);
        }
        let params = json!({"level": level, "logger": logger, "data": data});
        self.send_notification("notifications/message", Some(params))
            .await
            .map(Some)
    }

    /// Close the transport. Returns `true` for the call that performed the
    /// close; later calls are no-ops.
    pub async fn close(&self) -> bool {
        let live = [
            TransportState::New,
            TransportState::Initializing,
            TransportState::Active,
        ];
        if self.transition(&live, TransportState::Closing).is_err() {
            return false;
        }

        self.shutdown.cancel();
        {
            let mut channels = self.channels.lock().await;
            channels.standalone = None;
            channels.pending.clear();
        }
        if let Some(registry) = self.registry.get() {
            registry.release(&self.session_id).await;
        }

        self.state.send_replace(TransportState::Closed);
        info!(session_id = %self.session_id, "transport closed");
        true
    }

    /// Called when a GET stream's connection goes away.
    async fn connection_closed(&self) {
        {
            let mut channels = self.channels.lock().await;
            if channels
                .standalone
                .as_ref()
                .is_some_and(|sender| sender.is_closed())
            {
                channels.standalone = None;
            }
        }
        if self.options.close_on_disconnect && self.state() == TransportState::Active {
            info!(session_id = %self.session_id, "SSE connection closed, tearing down session");
            self.close().await;
        }
    }

    /// Route one message emitted by the server role.
    async fn deliver(&self, message: ServerJsonRpcMessage) {
        if let Some(id) = response_id(&message) {
            let key = request_key(id);
            let waiter = self.channels.lock().await.pending.remove(&key);
            match waiter {
                Some(waiter) => {
                    if waiter.send(message).is_err() {
                        debug!(session_id = %self.session_id, request_id = %key, "POST went away before its response");
                    }
                }
                None => {
                    warn!(session_id = %self.session_id, request_id = %key, "response for a request nobody awaits")
                }
            }
            return;
        }

        let outcome = match serde_json::to_value(&message) {
            Ok(payload) => self.publish(payload).await.map(|_| ()),
            Err(e) => Err(GatewayError::Internal(format!(
                "failed to encode server message: {e}"
            ))),
        };
        if let Err(err) = outcome {
            debug!(session_id = %self.session_id, error = %err, "server message dropped");
        }
    }

    /// Called when the session's server role stops; the session cannot
    /// answer requests any more, so it closes.
    pub(crate) async fn server_stopped(&self) {
        self.channels.lock().await.pending.clear();
        if self.close().await {
            warn!(session_id = %self.session_id, "server role stopped, session closed");
        }
    }

    fn server_gone(&self) -> GatewayError {
        GatewayError::Internal(format!(
            "server for session {} stopped before answering",
            self.session_id
        ))
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            TransportState::Active => Ok(()),
            state => Err(GatewayError::InvalidSessionState {
                session_id: self.session_id.to_string(),
                state,
            }),
        }
    }

    fn transition(&self, from: &[TransportState], to: TransportState) -> Result<TransportState> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                previous = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        previous.ok_or_else(|| GatewayError::InvalidSessionState {
            session_id: self.session_id.to_string(),
            state: self.state(),
        })
    }

    fn with_session_header(&self, mut response: Response) -> Response {
        match HeaderValue::from_str(&self.session_id) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
            }
            Err(_) => warn!(session_id = %self.session_id, "session id is not a valid header value"),
        }
        response
    }
}

/// Pump the server role's output into the transport until either side goes.
async fn forward_server_messages(
    transport: Weak<StreamableHttpTransport>,
    mut from_server: mpsc::Receiver<ServerJsonRpcMessage>,
) {
    while let Some(message) = from_server.recv().await {
        let Some(transport) = transport.upgrade() else {
            break;
        };
        transport.deliver(message).await;
    }
}

fn sse_event(event: &StoredEvent) -> Event {
    Event::default()
        .event("message")
        .id(event.id.to_string())
        .data(event.payload.to_string())
}

/// Lives inside a GET stream; dropping the stream means the client is gone.
struct StreamGuard {
    transport: Weak<StreamableHttpTransport>,
    last_delivered: Option<EventId>,
    live: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        debug!(
            session_id = %transport.session_id,
            last_event_id = ?self.last_delivered.as_ref().map(ToString::to_string),
            "SSE stream closed"
        );
        if !self.live {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { transport.connection_closed().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_messages;
    use crate::server::McpServer;
    use crate::tools::ToolRegistry;

    fn server(name: &str) -> Arc<McpServer> {
        let info = Implementation {
            name: name.into(),
            version: "0.0.1".into(),
        };
        Arc::new(McpServer::new(info, ToolRegistry::new()))
    }

    fn connected(options: TransportOptions) -> Arc<StreamableHttpTransport> {
        let transport = Arc::new(StreamableHttpTransport::new(Arc::from("s-1"), options));
        transport.begin_initialize().unwrap();
        server("test").connect(&transport).unwrap();
        transport.activate().unwrap();
        transport
    }

    async fn post(transport: &Arc<StreamableHttpTransport>, body: &[u8]) -> Response {
        transport
            .handle_request(TransportRequest::Post(parse_messages(body).unwrap()))
            .await
            .unwrap()
    }

    /// A connected transport whose client finished the initialization handshake.
    async fn active_transport(options: TransportOptions) -> Arc<StreamableHttpTransport> {
        let transport = connected(options);
        let initialize = br#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"c","version":"1"}}}"#;
        assert_eq!(post(&transport, initialize).await.status(), StatusCode::OK);
        let initialized = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert_eq!(
            post(&transport, initialized).await.status(),
            StatusCode::ACCEPTED
        );
        transport
    }

    #[test]
    fn state_machine_rejects_skipped_steps() {
        let transport = StreamableHttpTransport::new(Arc::from("s"), TransportOptions::default());
        assert_eq!(transport.state(), TransportState::New);
        assert!(matches!(
            transport.activate(),
            Err(GatewayError::InvalidSessionState {
                state: TransportState::New,
                ..
            })
        ));
        transport.begin_initialize().unwrap();
        assert!(transport.begin_initialize().is_err());
        transport.activate().unwrap();
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn requests_require_active_state() {
        let transport = Arc::new(StreamableHttpTransport::new(
            Arc::from("s"),
            TransportOptions::default(),
        ));
        transport.begin_initialize().unwrap();
        let err = transport
            .handle_request(TransportRequest::Get {
                last_event_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidSessionState {
                state: TransportState::Initializing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_bind_fails() {
        let transport = connected(TransportOptions::default());
        assert!(matches!(
            server("other").connect(&transport),
            Err(GatewayError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = active_transport(TransportOptions::default()).await;
        assert!(transport.close().await);
        assert!(!transport.close().await);
        assert_eq!(transport.state(), TransportState::Closed);
        transport.closed().await;

        let err = transport.send_notification("x", None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSessionState { .. }));
    }

    #[tokio::test]
    async fn delete_after_close_is_acknowledged() {
        let transport = active_transport(TransportOptions::default()).await;
        transport.close().await;
        let response = transport
            .handle_request(TransportRequest::Delete)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn notifications_are_stored_for_replay() {
        let transport = active_transport(TransportOptions::default()).await;
        for n in 1..=3 {
            let id = transport
                .send_notification("notifications/progress", Some(json!({"n": n})))
                .await
                .unwrap();
            assert_eq!(id.sequence(), n);
            assert_eq!(id.stream_id().as_ref(), STANDALONE_STREAM_ID);
        }
        let channels = transport.channels.lock().await;
        let replay = channels.events.replay_from(STANDALONE_STREAM_ID, 1).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].payload["params"]["n"], 2);
    }

    #[tokio::test]
    async fn standalone_ids_survive_many_post_streams() {
        let transport = active_transport(TransportOptions {
            json_response: false,
            retention: RetentionPolicy {
                max_events_per_stream: 16,
                max_streams: 2,
            },
            ..TransportOptions::default()
        })
        .await;

        transport.send_notification("notifications/a", None).await.unwrap();
        transport.send_notification("notifications/b", None).await.unwrap();
        // Each SSE-mode POST opens a stream; together they exceed the cap.
        for id in 1..=2 {
            let ping = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#);
            assert_eq!(post(&transport, ping.as_bytes()).await.status(), StatusCode::OK);
        }

        let third = transport
            .send_notification("notifications/c", None)
            .await
            .unwrap();
        assert_eq!(third, EventId::new(STANDALONE_STREAM_ID, 3));

        let channels = transport.channels.lock().await;
        let resumed = channels
            .events
            .replay_from(STANDALONE_STREAM_ID, 1)
            .unwrap();
        let methods: Vec<_> = resumed
            .iter()
            .map(|event| event.payload["method"].clone())
            .collect();
        assert_eq!(methods, [json!("notifications/b"), json!("notifications/c")]);
    }

    #[tokio::test]
    async fn only_one_live_stream_per_session() {
        let transport = active_transport(TransportOptions::default()).await;
        let first = transport
            .handle_request(TransportRequest::Get {
                last_event_id: None,
            })
            .await
            .unwrap();
        assert!(transport.has_live_stream().await);

        let err = transport
            .handle_request(TransportRequest::Get {
                last_event_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StreamConflict(_)));

        // Client went away: the slot frees up for a reconnect.
        drop(first);
        assert!(!transport.has_live_stream().await);
        transport
            .handle_request(TransportRequest::Get {
                last_event_id: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_marker_is_replay_gap() {
        let transport = active_transport(TransportOptions::default()).await;
        let err = transport
            .handle_request(TransportRequest::Get {
                last_event_id: Some(format!("{STANDALONE_STREAM_ID}_7")),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ReplayGap { event_id: 7, .. }));
    }

    #[tokio::test]
    async fn post_with_only_notifications_is_accepted() {
        let transport = active_transport(TransportOptions::default()).await;
        let response = post(
            &transport,
            br#"{"jsonrpc":"2.0","method":"notifications/roots/list_changed"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[MCP_SESSION_ID_HEADER], "s-1");
    }

    #[tokio::test]
    async fn batch_answers_keep_request_order() {
        let transport = active_transport(TransportOptions::default()).await;
        let response = post(
            &transport,
            br#"[{"jsonrpc":"2.0","id":"a","method":"ping"},{"jsonrpc":"2.0","id":"b","method":"nope"},{"jsonrpc":"2.0","id":"c","method":"tools/list"}]"#,
        )
        .await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let answers: Vec<Value> = serde_json::from_slice(&bytes).unwrap();
        let ids: Vec<_> = answers.iter().map(|a| a["id"].clone()).collect();
        assert_eq!(ids, [json!("a"), json!("b"), json!("c")]);
        assert_eq!(answers[1]["error"]["code"], -32601);
        assert!(answers[2]["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn post_in_sse_mode_stores_responses() {
        let transport = active_transport(TransportOptions {
            json_response: false,
            ..TransportOptions::default()
        })
        .await;
        let streams_before = transport.channels.lock().await.events.stream_count();
        let response = post(&transport, br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(
            transport.channels.lock().await.events.stream_count(),
            streams_before + 1
        );
    }

    #[tokio::test]
    async fn log_respects_session_level() {
        let transport = active_transport(TransportOptions::default()).await;
        assert!(transport
            .log(LoggingLevel::Debug, "test", json!("quiet"))
            .await
            .unwrap()
            .is_none());
        transport.set_log_level(LoggingLevel::Debug).await;
        assert!(transport
            .log(LoggingLevel::Debug, "test", json!("loud"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn closed_session_rejects_posts() {
        let transport = active_transport(TransportOptions::default()).await;
        transport.close().await;
        let err = transport
            .handle_request(TransportRequest::Post(
                parse_messages(br#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).unwrap(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSessionState { .. }));
    }
}
