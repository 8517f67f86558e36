//! Session registry: id → live shell session.
//!
//! One mutex guards the map. Session teardown always happens outside it:
//! `close_all` snapshots and clears under the lock, then closes each
//! session after releasing it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use haven_core::transport::{DestinationHash, MeshTransport};

use crate::session::{SessionError, SessionSettings, ShellSession};

pub struct SessionRegistry {
    transport: Arc<dyn MeshTransport>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<ShellSession>>>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn MeshTransport>, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build and connect a session, then register it under `id`. The table
    /// lock is not held while connecting.
    pub async fn create(
        &self,
        destination: DestinationHash,
        id: &str,
        rows: u16,
        cols: u16,
    ) -> Result<Arc<ShellSession>, SessionError> {
        let session = Arc::new(ShellSession::new(
            self.transport.clone(),
            id,
            destination,
            self.settings.clone(),
        ));
        session.connect(rows, cols).await?;
        self.insert(session.clone()).await;
        Ok(session)
    }

    /// Register a session. One already registered under the same id is
    /// replaced and closed.
    pub async fn insert(&self, session: Arc<ShellSession>) {
        let id = session.id().to_string();
        let previous = self.sessions.lock().await.insert(id.clone(), session);
        if let Some(previous) = previous {
            tracing::info!(session = %id, "replacing existing session");
            previous.close();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ShellSession>> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<ShellSession>> {
        self.sessions.lock().await.remove(id)
    }

    /// Remove and close one session. Unknown ids are ignored.
    pub async fn close(&self, id: &str) -> bool {
        match self.remove(id).await {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<ShellSession>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all sessions");
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All registered sessions, sorted by id.
    pub async fn sessions(&self) -> Vec<Arc<ShellSession>> {
        let mut all: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }
}
