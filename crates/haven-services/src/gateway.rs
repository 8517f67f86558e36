//! Gateway registry: which network entry points are attached to the
//! running transport instance.
//!
//! Membership only grows. The instance mode is fixed when the registry is
//! created and decides which further endpoints are legal:
//!
//!   SharedInstance  any new endpoint is attached as a direct TCP client
//!   DirectGateway   shared-instance style endpoints are rejected with a
//!                   warning; the transport cannot become a shared-instance
//!                   client after start

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use haven_core::config::{is_loopback_host, InstanceMode, InterfaceConfig};
use haven_core::transport::MeshTransport;

/// (host, port) of a gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim().to_ascii_lowercase(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Interface attached and handed to the transport.
    Online,
    /// Attachment failed; the interface sits idle.
    Inert,
}

/// A shared-instance endpoint was offered to a process that bootstrapped in
/// direct-gateway mode. Reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot attach shared instance {endpoint}: transport already running in direct-gateway mode")]
pub struct ModeConflict {
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    AlreadyAttached,
    Attached,
    AttachedInert,
    Rejected(ModeConflict),
}

pub struct GatewayRegistry {
    transport: Arc<dyn MeshTransport>,
    mode: InstanceMode,
    gateways: Mutex<BTreeMap<Endpoint, GatewayState>>,
}

impl GatewayRegistry {
    pub fn new(transport: Arc<dyn MeshTransport>, mode: InstanceMode) -> Self {
        Self {
            transport,
            mode,
            gateways: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// Record the endpoint the transport was started with. It is attached
    /// through the written configuration, not through `attach_interface`.
    pub fn record_initial(&self, host: &str, port: u16) {
        let endpoint = Endpoint::new(host, port);
        tracing::info!(gateway = %endpoint, mode = ?self.mode, "initial gateway recorded");
        self.table().insert(endpoint, GatewayState::Online);
    }

    /// Attach `host:port` unless it is already present or illegal in the
    /// current mode. Idempotent.
    pub fn ensure_gateway(&self, host: &str, port: u16) -> GatewayOutcome {
        let endpoint = Endpoint::new(host, port);
        let mut gateways = self.table();

        if gateways.contains_key(&endpoint) {
            tracing::debug!(gateway = %endpoint, "gateway already attached");
            return GatewayOutcome::AlreadyAttached;
        }

        if self.mode == InstanceMode::DirectGateway && is_loopback_host(&endpoint.host) {
            let conflict = ModeConflict { endpoint };
            tracing::warn!(error = %conflict, mode = ?self.mode, "gateway rejected");
            return GatewayOutcome::Rejected(conflict);
        }

        let interface = InterfaceConfig::tcp_client(format!("Gateway {endpoint}"), &endpoint.host, port);
        let (state, outcome) = match self.transport.attach_interface(&interface) {
            Ok(()) => {
                tracing::info!(gateway = %endpoint, "gateway attached");
                (GatewayState::Online, GatewayOutcome::Attached)
            }
            Err(e) => {
                tracing::warn!(gateway = %endpoint, error = %e, "gateway attach failed, interface left idle");
                (GatewayState::Inert, GatewayOutcome::AttachedInert)
            }
        };
        gateways.insert(endpoint, state);
        outcome
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.table().contains_key(&Endpoint::new(host, port))
    }

    /// Sorted snapshot of attached gateways.
    pub fn gateways(&self) -> Vec<(Endpoint, GatewayState)> {
        self.table().iter().map(|(e, s)| (e.clone(), *s)).collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, BTreeMap<Endpoint, GatewayState>> {
        self.gateways.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
