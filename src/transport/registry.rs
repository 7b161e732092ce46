//! Process-wide session table.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{SessionId, StreamableHttpTransport};
use crate::error::{GatewayError, Result};

type Sessions = RwLock<HashMap<SessionId, Arc<StreamableHttpTransport>>>;

/// Maps session ids to their live transports.
///
/// Holds exactly the sessions in the `Active` state: [`create`](Self::create)
/// activates the transport while holding the write lock, and a transport
/// removes itself when it closes. Once draining starts no session can be
/// created, so a drain's snapshot cannot miss one.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Sessions>,
    draining: Arc<AtomicBool>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an initializing transport under its session id and activate it.
    ///
    /// Fails with [`GatewayError::DuplicateSession`] if the id is taken and
    /// with [`GatewayError::ShuttingDown`] once draining has started.
    pub async fn create(&self, transport: Arc<StreamableHttpTransport>) -> Result<()> {
        let session_id = transport.session_id().clone();
        let mut sessions = self.sessions.write().await;
        // Checked under the write lock: a drain flags first and snapshots after.
        if self.is_draining() {
            return Err(GatewayError::ShuttingDown);
        }
        let Entry::Vacant(slot) = sessions.entry(session_id.clone()) else {
            return Err(GatewayError::DuplicateSession(session_id.to_string()));
        };

        transport.activate()?;
        transport.attach_registry(RegistryLink {
            sessions: Arc::downgrade(&self.sessions),
        });
        slot.insert(transport);
        info!(%session_id, "session registered");
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<StreamableHttpTransport>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<StreamableHttpTransport>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            debug!(session_id, "session removed from registry");
        }
        removed
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of every registered transport.
    pub async fn transports(&self) -> Vec<Arc<StreamableHttpTransport>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Refuse new sessions from now on.
    pub fn begin_draining(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            info!("session registry draining, new sessions refused");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Non-owning handle a transport uses to deregister itself on close.
pub(crate) struct RegistryLink {
    sessions: Weak<Sessions>,
}

impl RegistryLink {
    pub(crate) async fn release(&self, session_id: &str) {
        let Some(sessions) = self.sessions.upgrade() else {
            return;
        };
        if sessions.write().await.remove(session_id).is_some() {
            debug!(session_id, "transport deregistered on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportOptions, TransportState};

    fn initializing(id: &str) -> Arc<StreamableHttpTransport> {
        let transport = Arc::new(StreamableHttpTransport::new(
            Arc::from(id),
            TransportOptions::default(),
        ));
        transport.begin_initialize().unwrap();
        transport
    }

    #[tokio::test]
    async fn create_activates_and_registers() {
        let registry = SessionRegistry::new();
        let transport = initializing("a");
        assert!(!registry.contains("a").await);

        registry.create(transport.clone()).await.unwrap();
        assert!(registry.contains("a").await);
        assert_eq!(transport.state(), TransportState::Active);
        assert!(Arc::ptr_eq(&registry.get("a").await.unwrap(), &transport));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let registry = SessionRegistry::new();
        registry.create(initializing("a")).await.unwrap();

        let second = initializing("a");
        let err = registry.create(second.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSession(id) if id == "a"));
        assert_eq!(second.state(), TransportState::Initializing);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("missing").await,
            Err(GatewayError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.create(initializing("a")).await.unwrap();
        assert!(registry.remove("a").await.is_some());
        assert!(registry.remove("a").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn draining_refuses_new_sessions() {
        let registry = SessionRegistry::new();
        registry.create(initializing("a")).await.unwrap();

        registry.begin_draining();
        let late = initializing("b");
        let err = registry.create(late.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ShuttingDown));
        assert_eq!(late.state(), TransportState::Initializing);
        assert!(!registry.contains("b").await);
        assert_eq!(registry.len().await, 1);

        // Clones share the flag.
        assert!(registry.clone().is_draining());
    }

    #[tokio::test]
    async fn closing_a_transport_deregisters_it() {
        let registry = SessionRegistry::new();
        let transport = initializing("a");
        registry.create(transport.clone()).await.unwrap();

        assert!(transport.close().await);
        assert!(!registry.contains("a").await);

        // Explicit removal racing the close callback is harmless.
        assert!(registry.remove("a").await.is_none());
        assert!(!transport.close().await);
    }
}
