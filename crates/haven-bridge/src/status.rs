//! Status report: bridge state as plain serializable data.

use serde::Serialize;

use haven_core::config::InstanceMode;
use haven_services::{DiscoveredEndpoint, GatewayState};

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub initialized:     bool,
    pub mode:            Option<InstanceMode>,
    pub identity:        Option<String>,
    pub active_sessions: usize,
    pub sessions:        Vec<SessionInfo>,
    pub gateways:        Vec<GatewayInfo>,
    pub discovered:      Vec<DiscoveredEndpointInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id:        String,
    pub destination:       String,
    pub connected:         bool,
    pub suppressed_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayInfo {
    pub endpoint: String,
    pub online:   bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredEndpointInfo {
    pub hash:           String,
    pub hops:           Option<u8>,
    pub last_seen_secs: u64,
}

impl From<&DiscoveredEndpoint> for DiscoveredEndpointInfo {
    fn from(e: &DiscoveredEndpoint) -> Self {
        Self {
            hash:           e.hash.to_hex(),
            hops:           e.hops.as_option(),
            last_seen_secs: e.last_seen.elapsed().as_secs(),
        }
    }
}

impl GatewayInfo {
    pub fn new(endpoint: impl ToString, state: GatewayState) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            online:   state == GatewayState::Online,
        }
    }
}

impl BridgeStatus {
    pub fn uninitialized() -> Self {
        Self {
            initialized:     false,
            mode:            None,
            identity:        None,
            active_sessions: 0,
            sessions:        Vec::new(),
            gateways:        Vec::new(),
            discovered:      Vec::new(),
        }
    }
}
