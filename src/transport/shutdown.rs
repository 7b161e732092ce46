//! Process-shutdown draining of live sessions.

use std::{future::Future, sync::Arc, time::Duration};

use axum::Router;
use futures::future::join_all;
use tokio::{net::TcpListener, sync::OnceCell, time::timeout};
use tracing::{error, info, warn};

use super::{SessionId, SessionRegistry};

/// Outcome of draining the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: Vec<(SessionId, String)>,
}

/// Closes every registered session once, no matter how often it is asked to.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    registry: SessionRegistry,
    close_timeout: Duration,
    report: Arc<OnceCell<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry, close_timeout: Duration) -> Self {
        Self {
            registry,
            close_timeout,
            report: Arc::new(OnceCell::new()),
        }
    }

    /// Close all sessions. The first call does the work; later and
    /// concurrent calls wait for and return the same report. New sessions
    /// are refused from the moment the first call starts.
    pub async fn drain(&self) -> ShutdownReport {
        self.report.get_or_init(|| self.close_all()).await.clone()
    }

    async fn close_all(&self) -> ShutdownReport {
        self.registry.begin_draining();
        let transports = self.registry.transports().await;
        info!(sessions = transports.len(), "closing live sessions");

        // Sessions close concurrently so one stuck transport only costs its own timeout.
        let outcomes = join_all(transports.into_iter().map(|transport| async move {
            let session_id = transport.session_id().clone();
            info!(%session_id, "closing transport");
            match timeout(self.close_timeout, transport.close()).await {
                Ok(_) => Ok(session_id),
                Err(_) => Err(session_id),
            }
        }))
        .await;

        let mut report = ShutdownReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(_) => report.closed += 1,
                Err(session_id) => {
                    let reason = format!("close timed out after {:?}", self.close_timeout);
                    warn!(%session_id, %reason, "failed to close transport");
                    self.registry.remove(&session_id).await;
                    report.failed.push((session_id, reason));
                }
            }
        }
        report
    }
}

/// Serve `router` until `signal` resolves, then drain sessions and stop.
///
/// Live SSE streams end when their session closes, which lets the graceful
/// shutdown of the listener complete.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    coordinator: ShutdownCoordinator,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "MCP Streamable HTTP gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutting down gateway");
            let report = coordinator.drain().await;
            info!(
                closed = report.closed,
                failed = report.failed.len(),
                "sessions drained"
            );
        })
        .await?;

    info!("gateway shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
