//! Process bootstrap: the one transport instance and the local identity.
//!
//! The first bootstrap fixes the instance mode for the life of the bridge.
//! Later calls only add gateways that are legal in that mode.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

use haven_core::config::{BridgeConfig, InstanceMode, TransportConfig, IDENTITY_FILE};
use haven_core::crypto::Identity;
use haven_core::transport::{MeshTransport, SignalPolicy, TransportFactory};
use haven_services::discovery::expiry_loop;
use haven_services::{
    AnnounceListener, DiscoveryCache, GatewayRegistry, SessionRegistry,
    SessionSettings, TransportFacade,
};

use crate::BridgeError;

/// Transport handlers may only be installed from the process main thread.
/// Anywhere else they must be suppressed for the duration of start-up.
pub fn signal_policy() -> SignalPolicy {
    if std::thread::current().name() == Some("main") {
        SignalPolicy::Install
    } else {
        SignalPolicy::Suppress
    }
}

/// Everything that exists once the transport is running.
pub struct Instance {
    pub transport: Arc<dyn MeshTransport>,
    pub mode: InstanceMode,
    pub gateways: GatewayRegistry,
    pub discovery: DiscoveryCache,
    pub facade: TransportFacade,
    pub sessions: SessionRegistry,
    config_dir: PathBuf,
    identity: Mutex<Option<Identity>>,
}

impl Instance {
    /// Write the transport configuration for `host:port`, start the
    /// transport and wire discovery into it. The identity is loaded
    /// separately so a failure there does not lose the running transport.
    pub fn start(
        factory: &dyn TransportFactory,
        config: &BridgeConfig,
        runtime: &Handle,
        config_dir: &Path,
        host: &str,
        port: u16,
    ) -> Result<Self, BridgeError> {
        let mode = InstanceMode::for_host(host);
        let transport_config = TransportConfig::for_target(mode, host, port);
        let path = transport_config.write_to(config_dir)?;
        tracing::debug!(path = %path.display(), ?mode, "transport configuration written");

        let signals = signal_policy();
        let transport = factory.start(&transport_config, config_dir, signals)?;
        tracing::info!(?mode, target = %format!("{host}:{port}"), ?signals, "transport started");

        let discovery = DiscoveryCache::new();
        transport.register_announce_handler(Arc::new(AnnounceListener::new(
            discovery.clone(),
            transport.clone(),
        )));
        if let Some(max_age) = config.discovery.max_age() {
            runtime.spawn(expiry_loop(discovery.clone(), max_age));
        }

        let gateways = GatewayRegistry::new(transport.clone(), mode);
        gateways.record_initial(host, port);

        Ok(Self {
            facade: TransportFacade::new(transport.clone(), config.timeouts.poll_interval()),
            sessions: SessionRegistry::new(transport.clone(), SessionSettings::from_config(config)),
            transport,
            mode,
            gateways,
            discovery,
            config_dir: config_dir.to_path_buf(),
            identity: Mutex::new(None),
        })
    }

    /// Load or create the identity if that has not succeeded yet. Returns
    /// the identity hash as hex.
    pub fn ensure_identity(&self) -> Result<String, BridgeError> {
        let mut slot = self.identity.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = slot.as_ref() {
            return Ok(identity.hex_hash());
        }

        let path = self.config_dir.join(IDENTITY_FILE);
        let (identity, _created) = Identity::load_or_create(&path)?;
        let hash = identity.hex_hash();
        *slot = Some(identity);
        Ok(hash)
    }

    pub fn identity_hash(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Identity::hex_hash)
    }
}
