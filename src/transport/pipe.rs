//! The channel pair an rmcp server role is served over.
//!
//! Client messages POSTed to a session flow in through the stream half;
//! everything the server role emits leaves through the sink half and is
//! routed by the transport (responses to their waiting POST, the rest to the
//! standalone stream).

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{stream::BoxStream, Sink, SinkExt, Stream, StreamExt};
use rmcp::{
    service::{RxJsonRpcMessage, TxJsonRpcMessage},
    RoleServer,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};

use super::SessionId;

/// Bidirectional transport for one session's server role.
///
/// The stream half ends when the session shuts down, which stops the
/// server role.
pub(crate) struct SessionPipe {
    stream: BoxStream<'static, RxJsonRpcMessage<RoleServer>>,
    sink: PollSender<TxJsonRpcMessage<RoleServer>>,
    session_id: SessionId,
}

impl SessionPipe {
    pub(crate) fn new(
        session_id: SessionId,
        from_client: mpsc::Receiver<RxJsonRpcMessage<RoleServer>>,
        to_client: mpsc::Sender<TxJsonRpcMessage<RoleServer>>,
        shutdown: CancellationToken,
    ) -> Self {
        let stream = ReceiverStream::new(from_client)
            .take_until(async move { shutdown.cancelled().await })
            .boxed();
        Self {
            stream,
            sink: PollSender::new(to_client),
            session_id,
        }
    }
}

impl Sink<TxJsonRpcMessage<RoleServer>> for SessionPipe {
    type Error = std::io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_ready_unpin(cx)
            .map_err(std::io::Error::other)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TxJsonRpcMessage<RoleServer>,
    ) -> Result<(), Self::Error> {
        self.sink
            .start_send_unpin(item)
            .map_err(std::io::Error::other)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink
            .poll_flush_unpin(cx)
            .map_err(std::io::Error::other)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let result = self
            .sink
            .poll_close_unpin(cx)
            .map_err(std::io::Error::other);
        if result.is_ready() {
            tracing::debug!(session_id = %self.session_id, "server role closed its pipe");
        }
        result
    }
}

impl Stream for SessionPipe {
    type Item = RxJsonRpcMessage<RoleServer>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rmcp::model::ClientJsonRpcMessage;
    use serde_json::json;

    fn ping(id: u32) -> ClientJsonRpcMessage {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": id, "method": "ping"})).unwrap()
    }

    #[tokio::test]
    async fn stream_ends_on_shutdown() {
        let (to_server, from_client) = mpsc::channel(4);
        let (to_client, _from_server) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let mut pipe = SessionPipe::new(Arc::from("s"), from_client, to_client, shutdown.clone());

        to_server.send(ping(1)).await.unwrap();
        assert!(pipe.next().await.is_some());

        shutdown.cancel();
        assert!(pipe.next().await.is_none());
    }

    #[tokio::test]
    async fn sink_forwards_to_the_transport() {
        let (_to_server, from_client) = mpsc::channel(4);
        let (to_client, mut from_server) = mpsc::channel(4);
        let mut pipe = SessionPipe::new(
            Arc::from("s"),
            from_client,
            to_client,
            CancellationToken::new(),
        );

        let message: TxJsonRpcMessage<RoleServer> =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).unwrap();
        pipe.send(message).await.unwrap();

        let forwarded = from_server.recv().await.unwrap();
        assert_eq!(serde_json::to_value(forwarded).unwrap()["id"], 1);
    }
}
