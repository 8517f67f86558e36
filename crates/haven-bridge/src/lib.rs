//! haven-bridge: synchronous host API over the Haven session layer.
//!
//! Hosts that cannot take part in an event loop drive everything through
//! `Bridge`: bootstrap the transport once, resolve a destination, open a
//! session, then poll it for output. Every method blocks only the calling
//! thread. None of them may be called from inside a tokio runtime.

pub mod bootstrap;
pub mod logging;
pub mod status;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Runtime;

use haven_core::config::{is_loopback_host, BridgeConfig, ConfigError, InstanceMode};
use haven_core::crypto::IdentityError;
use haven_core::transport::{DestinationHash, HashError, TransportError, TransportFactory};
use haven_services::{ReadOutcome, SessionError, ShellSession};

use bootstrap::Instance;
pub use status::{BridgeStatus, DiscoveredEndpointInfo, GatewayInfo, SessionInfo};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is not bootstrapped")]
    NotInitialized,
    #[error(transparent)]
    InvalidHash(#[from] HashError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub struct Bridge {
    runtime: Runtime,
    factory: Arc<dyn TransportFactory>,
    config: BridgeConfig,
    instance: Mutex<Option<Arc<Instance>>>,
    // Serializes first start. The slot lock is only held to read or publish.
    starting: Mutex<()>,
}

impl Bridge {
    /// Bridge configured from the environment and `bridge.toml`. A config
    /// file that cannot be read falls back to defaults with a warning.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Result<Self, BridgeError> {
        let config = BridgeConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            BridgeConfig::default()
        });
        Self::with_config(factory, config)
    }

    pub fn with_config(factory: Arc<dyn TransportFactory>, config: BridgeConfig) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("haven-worker")
            .build()
            .map_err(BridgeError::Runtime)?;
        Ok(Self {
            runtime,
            factory,
            config,
            instance: Mutex::new(None),
            starting: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ── Bootstrap ─────────────────────────────────────────────────────────

    /// Start the transport on first call; afterwards only add `host:port`
    /// as a gateway when legal. Returns the local identity hash.
    pub fn bootstrap(&self, config_dir: &Path, host: &str, port: u16) -> Result<String, BridgeError> {
        let instance = match self.instance() {
            Some(instance) => {
                instance.gateways.ensure_gateway(host, port);
                instance
            }
            None => self.start_once(config_dir, host, port)?,
        };
        instance.ensure_identity()
    }

    /// Whether a transport endpoint answers at `host:port`. A shared-instance
    /// target can never be used once the bridge runs in direct-gateway mode,
    /// so that case reports false without connecting.
    pub fn probe(&self, config_dir: &Path, host: &str, port: u16) -> bool {
        let _span = tracing::debug_span!("probe", config_dir = %config_dir.display()).entered();

        if let Some(instance) = self.instance() {
            if instance.mode == InstanceMode::DirectGateway && is_loopback_host(host) {
                tracing::debug!(host, port, "shared instance unusable in direct-gateway mode");
                return false;
            }
        }

        let limit = self.config.timeouts.probe();
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let reachable = self.runtime.block_on(async move {
            matches!(
                tokio::time::timeout(limit, tokio::net::TcpStream::connect((host.as_str(), port))).await,
                Ok(Ok(_))
            )
        });
        tracing::debug!(port, reachable, "probe finished");
        reachable
    }

    pub fn identity_hash(&self) -> Option<String> {
        self.instance().and_then(|i| i.identity_hash())
    }

    // ── Discovery and paths ───────────────────────────────────────────────

    /// Discovered shell endpoints, nearest first.
    pub fn list_discovered(&self) -> Vec<DiscoveredEndpointInfo> {
        match self.instance() {
            Some(instance) => instance.discovery.snapshot().iter().map(Into::into).collect(),
            None => Vec::new(),
        }
    }

    /// Wait up to the configured resolve timeout for a path.
    pub fn resolve_destination(&self, hash_hex: &str) -> Result<bool, BridgeError> {
        let instance = self.require()?;
        let destination = DestinationHash::from_hex(hash_hex)?;
        let max_wait = self.config.timeouts.resolve();
        Ok(self
            .runtime
            .block_on(instance.facade.resolve_destination(&destination, max_wait)))
    }

    /// Request a path without waiting. Returns whether one is known now.
    pub fn request_path(&self, hash_hex: &str) -> Result<bool, BridgeError> {
        let instance = self.require()?;
        let destination = DestinationHash::from_hex(hash_hex)?;
        Ok(instance.facade.request_path(&destination))
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    /// Open a shell on `hash_hex` registered as `session_id`. Zero rows or
    /// columns fall back to the configured defaults.
    pub fn create_session(&self, hash_hex: &str, session_id: &str, rows: u16, cols: u16) -> Result<(), BridgeError> {
        let instance = self.require()?;
        let destination = DestinationHash::from_hex(hash_hex)?;
        let rows = if rows == 0 { self.config.shell.default_rows } else { rows };
        let cols = if cols == 0 { self.config.shell.default_cols } else { cols };

        self.runtime
            .block_on(instance.sessions.create(destination, session_id, rows, cols))?;
        Ok(())
    }

    /// Next output chunk of a session. Unknown sessions read as disconnected.
    pub fn read_output(&self, session_id: &str, timeout_ms: u64) -> ReadOutcome {
        let Some(session) = self.session(session_id) else {
            return ReadOutcome::Disconnected;
        };
        self.runtime
            .block_on(session.read_output(Duration::from_millis(timeout_ms)))
    }

    pub fn send_input(&self, session_id: &str, data: &[u8]) -> bool {
        self.session(session_id)
            .map(|s| s.send_input(data))
            .unwrap_or(false)
    }

    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        if let Some(session) = self.session(session_id) {
            session.resize(cols, rows);
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.session(session_id)
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    pub fn close_session(&self, session_id: &str) {
        if let Some(instance) = self.instance() {
            self.runtime.block_on(instance.sessions.close(session_id));
        }
    }

    /// Close every session. The transport keeps running.
    pub fn close_all(&self) -> usize {
        match self.instance() {
            Some(instance) => self.runtime.block_on(instance.sessions.close_all()),
            None => 0,
        }
    }

    // ── Status ────────────────────────────────────────────────────────────

    pub fn status(&self) -> BridgeStatus {
        let Some(instance) = self.instance() else {
            return BridgeStatus::uninitialized();
        };

        let sessions = self.runtime.block_on(instance.sessions.sessions());
        BridgeStatus {
            initialized: true,
            mode: Some(instance.mode),
            identity: instance.identity_hash(),
            active_sessions: sessions.len(),
            sessions: sessions
                .iter()
                .map(|s| SessionInfo {
                    session_id: s.id().to_string(),
                    destination: s.destination().to_hex(),
                    connected: s.is_connected(),
                    suppressed_errors: s.suppressed_errors(),
                })
                .collect(),
            gateways: instance
                .gateways
                .gateways()
                .into_iter()
                .map(|(endpoint, state)| GatewayInfo::new(endpoint, state))
                .collect(),
            discovered: instance.discovery.snapshot().iter().map(Into::into).collect(),
        }
    }

    pub fn status_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.status())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Start the transport unless a concurrent bootstrap already did. Session
    /// calls never wait on this; they only touch the slot.
    fn start_once(&self, config_dir: &Path, host: &str, port: u16) -> Result<Arc<Instance>, BridgeError> {
        let _starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = self.instance() {
            instance.gateways.ensure_gateway(host, port);
            return Ok(instance);
        }

        let instance = Arc::new(Instance::start(
            self.factory.as_ref(),
            &self.config,
            self.runtime.handle(),
            config_dir,
            host,
            port,
        )?);
        *self.slot() = Some(instance.clone());
        Ok(instance)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Instance>>> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn instance(&self) -> Option<Arc<Instance>> {
        self.slot().clone()
    }

    fn require(&self) -> Result<Arc<Instance>, BridgeError> {
        self.instance().ok_or(BridgeError::NotInitialized)
    }

    fn session(&self, session_id: &str) -> Option<Arc<ShellSession>> {
        let instance = self.instance()?;
        self.runtime.block_on(instance.sessions.get(session_id))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(instance) = self.instance() {
            let closed = self.runtime.block_on(instance.sessions.close_all());
            if closed > 0 {
                tracing::debug!(closed, "sessions closed on shutdown");
            }
        }
    }
}
