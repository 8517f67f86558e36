//! Discovery cache: remote shell endpoints learned from announces.
//!
//! The transport delivers every announce matching the shell aspect to a
//! single `AnnounceListener`, whether broadcast or an answer to a path
//! request. The listener upserts the endpoint with the hop count read from
//! the routing table at that moment. Entries are never removed unless an
//! eviction age is configured.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use haven_core::transport::{AnnounceHandler, DestinationHash, HopCount, MeshTransport, RemoteIdentity};

/// Aspect the remote shell endpoints announce under.
pub const SHELL_ASPECT: &str = "rnsh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub hash: DestinationHash,
    pub hops: HopCount,
    pub last_seen: Instant,
}

/// Shared, cloneable handle to the discovered endpoint table.
#[derive(Clone, Default)]
pub struct DiscoveryCache {
    entries: Arc<DashMap<DestinationHash, DiscoveredEndpoint>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an endpoint. The latest announce wins.
    pub fn upsert(&self, hash: DestinationHash, hops: HopCount) {
        self.entries.insert(
            hash,
            DiscoveredEndpoint {
                hash,
                hops,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn get(&self, hash: &DestinationHash) -> Option<DiscoveredEndpoint> {
        self.entries.get(hash).map(|e| e.value().clone())
    }

    /// All endpoints, nearest first, unknown distance last, ties by hash.
    pub fn snapshot(&self) -> Vec<DiscoveredEndpoint> {
        let mut all: Vec<DiscoveredEndpoint> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.hops.cmp(&b.hops).then_with(|| a.hash.cmp(&b.hash)));
        all
    }

    /// Drop entries not refreshed within `max_age`. Returns how many went.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen.elapsed() < max_age);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "expired discovered endpoints");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Announce handler feeding the cache. Runs on transport threads, so it
/// only reads the routing table and inserts.
pub struct AnnounceListener {
    cache: DiscoveryCache,
    transport: Arc<dyn MeshTransport>,
}

impl AnnounceListener {
    pub fn new(cache: DiscoveryCache, transport: Arc<dyn MeshTransport>) -> Self {
        Self { cache, transport }
    }
}

impl AnnounceHandler for AnnounceListener {
    fn aspect_filter(&self) -> &str {
        SHELL_ASPECT
    }

    fn received_announce(&self, destination: DestinationHash, _identity: &RemoteIdentity) {
        let hops = self.transport.hops_to(&destination);
        self.cache.upsert(destination, hops);
        tracing::debug!(
            destination = %destination.short(),
            hops = ?hops.as_option(),
            "shell endpoint announced"
        );
    }
}

/// Periodically evict stale entries. Runs until the task is dropped.
pub async fn expiry_loop(cache: DiscoveryCache, max_age: Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        cache.evict_older_than(max_age);
    }
}
