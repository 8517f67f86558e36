//! Synchronous view of the transport's path and identity primitives.

use std::sync::Arc;
use std::time::Duration;

use haven_core::transport::{DestinationHash, MeshTransport, RemoteIdentity};
use tokio::time::Instant;

#[derive(Clone)]
pub struct TransportFacade {
    transport: Arc<dyn MeshTransport>,
    poll_interval: Duration,
}

impl TransportFacade {
    pub fn new(transport: Arc<dyn MeshTransport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    pub fn transport(&self) -> &Arc<dyn MeshTransport> {
        &self.transport
    }

    pub fn has_path(&self, destination: &DestinationHash) -> bool {
        self.transport.has_path(destination)
    }

    /// Fire a path request without waiting. Returns the path state as it is
    /// right now; the response lands in the discovery cache via announce.
    pub fn request_path(&self, destination: &DestinationHash) -> bool {
        if self.transport.has_path(destination) {
            return true;
        }
        self.transport.request_path(destination);
        tracing::debug!(destination = %destination.short(), "path requested");
        false
    }

    pub fn recall_identity(&self, destination: &DestinationHash) -> Option<RemoteIdentity> {
        self.transport.recall_identity(destination)
    }

    /// Wait up to `max_wait` for a path to `destination`.
    ///
    /// Issues one path request if the path is unknown, then re-checks every
    /// poll interval until the deadline.
    pub async fn resolve_destination(&self, destination: &DestinationHash, max_wait: Duration) -> bool {
        if self.transport.has_path(destination) {
            return true;
        }

        self.transport.request_path(destination);
        tracing::debug!(
            destination = %destination.short(),
            max_wait_ms = max_wait.as_millis() as u64,
            "resolving destination"
        );

        let deadline = Instant::now() + max_wait;
        while Instant::now() < deadline {
            tokio::time::sleep(self.poll_interval).await;
            if self.transport.has_path(destination) {
                tracing::debug!(destination = %destination.short(), "path resolved");
                return true;
            }
        }

        tracing::info!(destination = %destination.short(), "path resolution timed out");
        false
    }
}
