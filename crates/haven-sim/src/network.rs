//! SimNetwork: routing table, announce fan-out and transport factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use haven_core::config::{InterfaceConfig, TransportConfig};
use haven_core::transport::{
    AnnounceHandler, DestinationHash, HopCount, Link, LinkCallbacks, MeshTransport,
    RemoteIdentity, SignalPolicy, TransportError, TransportFactory,
};

use crate::link::SimLink;
use crate::lock;
use crate::remote::{LinkBehavior, SimRemoteShell};

/// Aspect simulated shell endpoints announce under.
const SHELL_ASPECT: &str = "rnsh";

struct SimEndpoint {
    remote: SimRemoteShell,
    identity: RemoteIdentity,
    hops: Option<u8>,
    path_known: bool,
}

#[derive(Default)]
struct State {
    endpoints: HashMap<DestinationHash, SimEndpoint>,
    path_requests: HashMap<DestinationHash, usize>,
    answer_after: Option<Duration>,
    handlers: Vec<Arc<dyn AnnounceHandler>>,
    interfaces: Vec<InterfaceConfig>,
    fail_attach: bool,
    attach_delay: Option<Duration>,
    attach_attempts: usize,
    fail_start: bool,
    starts: usize,
    last_signals: Option<SignalPolicy>,
    last_config: Option<TransportConfig>,
    last_config_dir: Option<PathBuf>,
}

#[derive(Default)]
struct NetInner {
    state: Mutex<State>,
    next_link: AtomicU64,
    links_opened: AtomicUsize,
    teardowns: Arc<AtomicUsize>,
}

/// Shared simulated mesh. Clones observe and drive the same network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<NetInner>,
}

/// Identity an endpoint is registered with. Derived from the destination so
/// tests can predict it.
fn identity_for(destination: &DestinationHash) -> RemoteIdentity {
    let mut public_key = [0u8; 32];
    public_key[..16].copy_from_slice(destination.as_bytes());
    public_key[16..].copy_from_slice(destination.as_bytes());
    RemoteIdentity { public_key }
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Arc<dyn MeshTransport> {
        Arc::new(SimTransport {
            inner: self.inner.clone(),
        })
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(SimFactory {
            inner: self.inner.clone(),
        })
    }

    // ── Topology ──────────────────────────────────────────────────────────

    /// Register an endpoint whose path and identity are already known.
    pub fn add_endpoint(&self, destination: DestinationHash, remote: &SimRemoteShell, hops: Option<u8>) {
        self.insert_endpoint(destination, remote, hops, true);
    }

    /// Register an endpoint that only becomes known through an announce or
    /// an answered path request.
    pub fn add_hidden_endpoint(&self, destination: DestinationHash, remote: &SimRemoteShell, hops: Option<u8>) {
        self.insert_endpoint(destination, remote, hops, false);
    }

    fn insert_endpoint(&self, destination: DestinationHash, remote: &SimRemoteShell, hops: Option<u8>, path_known: bool) {
        lock(&self.inner.state).endpoints.insert(
            destination,
            SimEndpoint {
                remote: remote.clone(),
                identity: identity_for(&destination),
                hops,
                path_known,
            },
        );
    }

    /// Answer path requests for hidden endpoints after `delay`.
    pub fn answer_path_requests_after(&self, delay: Duration) {
        lock(&self.inner.state).answer_after = Some(delay);
    }

    pub fn fail_interface_attach(&self, fail: bool) {
        lock(&self.inner.state).fail_attach = fail;
    }

    /// Make every interface attach block its caller for `delay`.
    pub fn delay_interface_attach(&self, delay: Duration) {
        lock(&self.inner.state).attach_delay = Some(delay);
    }

    pub fn fail_start(&self, fail: bool) {
        lock(&self.inner.state).fail_start = fail;
    }

    // ── Announces ─────────────────────────────────────────────────────────

    /// Broadcast an announce for a registered endpoint and wait until every
    /// handler has seen it. Makes the path known.
    pub fn announce(&self, destination: &DestinationHash) {
        let inner = self.inner.clone();
        let destination = *destination;
        let _ = std::thread::Builder::new()
            .name("sim-announce".into())
            .spawn(move || reveal_and_announce(&inner, &destination))
            .map(|handle| handle.join());
    }

    /// Announce an unregistered destination under some other aspect.
    pub fn announce_foreign(&self, destination: DestinationHash, aspect: &str) {
        let inner = self.inner.clone();
        let aspect = aspect.to_string();
        let _ = std::thread::Builder::new()
            .name("sim-announce".into())
            .spawn(move || {
                let identity = identity_for(&destination);
                fan_out(&inner, &destination, &identity, &aspect);
            })
            .map(|handle| handle.join());
    }

    // ── Observations ──────────────────────────────────────────────────────

    pub fn path_requests(&self, destination: &DestinationHash) -> usize {
        lock(&self.inner.state)
            .path_requests
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Interfaces attached after start, in attach order.
    pub fn attached_interfaces(&self) -> Vec<InterfaceConfig> {
        lock(&self.inner.state).interfaces.clone()
    }

    /// Attach calls seen so far, counted as soon as they start.
    pub fn attach_attempts(&self) -> usize {
        lock(&self.inner.state).attach_attempts
    }

    pub fn links_opened(&self) -> usize {
        self.inner.links_opened.load(Ordering::Relaxed)
    }

    /// Links torn down by the local side.
    pub fn teardowns(&self) -> usize {
        self.inner.teardowns.load(Ordering::Relaxed)
    }

    pub fn start_count(&self) -> usize {
        lock(&self.inner.state).starts
    }

    pub fn last_signal_policy(&self) -> Option<SignalPolicy> {
        lock(&self.inner.state).last_signals
    }

    pub fn last_config(&self) -> Option<TransportConfig> {
        lock(&self.inner.state).last_config.clone()
    }

    pub fn last_config_dir(&self) -> Option<PathBuf> {
        lock(&self.inner.state).last_config_dir.clone()
    }
}

fn reveal_and_announce(inner: &NetInner, destination: &DestinationHash) {
    let identity = {
        let mut state = lock(&inner.state);
        let Some(endpoint) = state.endpoints.get_mut(destination) else {
            tracing::warn!(destination = %destination.short(), "announce for unknown endpoint");
            return;
        };
        endpoint.path_known = true;
        endpoint.identity.clone()
    };
    fan_out(inner, destination, &identity, SHELL_ASPECT);
}

fn fan_out(inner: &NetInner, destination: &DestinationHash, identity: &RemoteIdentity, aspect: &str) {
    let handlers: Vec<_> = lock(&inner.state)
        .handlers
        .iter()
        .filter(|h| h.aspect_filter() == aspect)
        .cloned()
        .collect();
    for handler in handlers {
        handler.received_announce(*destination, identity);
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct SimTransport {
    inner: Arc<NetInner>,
}

impl MeshTransport for SimTransport {
    fn has_path(&self, destination: &DestinationHash) -> bool {
        lock(&self.inner.state)
            .endpoints
            .get(destination)
            .is_some_and(|e| e.path_known)
    }

    fn request_path(&self, destination: &DestinationHash) {
        let answer_after = {
            let mut state = lock(&self.inner.state);
            *state.path_requests.entry(*destination).or_default() += 1;
            match state.endpoints.get(destination) {
                Some(endpoint) if !endpoint.path_known => state.answer_after,
                _ => None,
            }
        };

        if let Some(delay) = answer_after {
            let inner = self.inner.clone();
            let destination = *destination;
            let _ = std::thread::Builder::new()
                .name("sim-path-answer".into())
                .spawn(move || {
                    std::thread::sleep(delay);
                    reveal_and_announce(&inner, &destination);
                });
        }
    }

    fn recall_identity(&self, destination: &DestinationHash) -> Option<RemoteIdentity> {
        lock(&self.inner.state)
            .endpoints
            .get(destination)
            .filter(|e| e.path_known)
            .map(|e| e.identity.clone())
    }

    fn hops_to(&self, destination: &DestinationHash) -> HopCount {
        lock(&self.inner.state)
            .endpoints
            .get(destination)
            .filter(|e| e.path_known)
            .and_then(|e| e.hops)
            .into()
    }

    fn open_link(
        &self,
        identity: &RemoteIdentity,
        aspect: &str,
        callbacks: Arc<dyn LinkCallbacks>,
    ) -> Result<Arc<dyn Link>, TransportError> {
        if aspect != SHELL_ASPECT {
            return Err(TransportError::LinkUnavailable(format!("no endpoint serves aspect {aspect}")));
        }
        let remote = lock(&self.inner.state)
            .endpoints
            .values()
            .find(|e| e.identity == *identity)
            .map(|e| e.remote.clone())
            .ok_or_else(|| TransportError::LinkUnavailable("identity not reachable".into()))?;

        let id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        self.inner.links_opened.fetch_add(1, Ordering::Relaxed);
        let link = SimLink::open(id, remote.clone(), callbacks, self.inner.teardowns.clone());

        match remote.behavior() {
            LinkBehavior::Accept => {
                remote.attach(link.clone());
                link.establish();
            }
            LinkBehavior::Stall => remote.attach(link.clone()),
            LinkBehavior::Refuse => link.refuse(),
        }
        tracing::debug!(link = id, behavior = ?remote.behavior(), "sim link opened");
        Ok(link)
    }

    fn register_announce_handler(&self, handler: Arc<dyn AnnounceHandler>) {
        lock(&self.inner.state).handlers.push(handler);
    }

    fn attach_interface(&self, interface: &InterfaceConfig) -> Result<(), TransportError> {
        let delay = {
            let mut state = lock(&self.inner.state);
            state.attach_attempts += 1;
            state.attach_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = lock(&self.inner.state);
        if state.fail_attach {
            return Err(TransportError::InterfaceFailed {
                endpoint: format!("{}:{}", interface.target_host, interface.target_port),
                reason: "simulated attach failure".into(),
            });
        }
        state.interfaces.push(interface.clone());
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Starts the simulated transport. Like a real transport, installing signal
/// handlers off the main thread fails.
pub struct SimFactory {
    inner: Arc<NetInner>,
}

impl TransportFactory for SimFactory {
    fn start(
        &self,
        config: &TransportConfig,
        config_dir: &Path,
        signals: SignalPolicy,
    ) -> Result<Arc<dyn MeshTransport>, TransportError> {
        let mut state = lock(&self.inner.state);
        state.starts += 1;
        state.last_signals = Some(signals);
        state.last_config = Some(config.clone());
        state.last_config_dir = Some(config_dir.to_path_buf());

        if state.fail_start {
            return Err(TransportError::StartFailed("simulated start failure".into()));
        }
        if signals == SignalPolicy::Install && std::thread::current().name() != Some("main") {
            return Err(TransportError::StartFailed(
                "signal handlers can only be installed from the main thread".into(),
            ));
        }
        drop(state);

        tracing::info!(config_dir = %config_dir.display(), ?signals, "sim transport started");
        Ok(Arc::new(SimTransport {
            inner: self.inner.clone(),
        }))
    }
}
