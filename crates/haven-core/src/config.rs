//! Configuration for Haven.
//!
//! Two files are involved:
//!
//!   bridge.toml  tunables of the session layer (timeouts, terminal, discovery).
//!                Resolution order: environment variables → config file → defaults.
//!                Location: $HAVEN_CONFIG, else $XDG_CONFIG_HOME/haven/bridge.toml,
//!                else ~/.config/haven/bridge.toml.
//!
//!   <dir>/config the transport configuration written by bootstrap into the
//!                caller-supplied directory. Rewritten on every first bootstrap.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File name of the transport configuration inside the config directory.
pub const TRANSPORT_CONFIG_FILE: &str = "config";

/// File name of the persisted local identity inside the config directory.
pub const IDENTITY_FILE: &str = "haven_identity";

// ── Bridge configuration ──────────────────────────────────────────────────────

/// Top-level configuration of the session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub timeouts: TimeoutConfig,
    pub shell: ShellConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for path resolution.
    pub resolve_secs: u64,
    /// Upper bound for link establishment.
    pub link_secs: u64,
    /// Tick of the path and link polling loops.
    pub poll_interval_ms: u64,
    /// Upper bound for the shared-instance reachability probe.
    pub probe_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Terminal type requested for the remote login shell.
    pub term: String,
    pub default_rows: u16,
    pub default_cols: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Drop discovered endpoints not re-announced within N seconds. 0 = never.
    pub max_age_secs: u64,
}

impl TimeoutConfig {
    pub fn resolve(&self) -> Duration {
        Duration::from_secs(self.resolve_secs)
    }

    pub fn link(&self) -> Duration {
        Duration::from_secs(self.link_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_millis)
    }
}

impl DiscoveryConfig {
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            shell: ShellConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve_secs: 15,
            link_secs: 30,
            poll_interval_ms: 100,
            probe_millis: 2000,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            term: std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
            default_rows: 24,
            default_cols: 80,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { max_age_secs: 0 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("haven")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file, falling back to defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            BridgeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HAVEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("bridge.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BridgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HAVEN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HAVEN_TIMEOUTS__RESOLVE_SECS") {
            if let Ok(n) = v.parse() {
                self.timeouts.resolve_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HAVEN_TIMEOUTS__LINK_SECS") {
            if let Ok(n) = v.parse() {
                self.timeouts.link_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HAVEN_SHELL__TERM") {
            self.shell.term = v;
        }
        if let Ok(v) = std::env::var("HAVEN_DISCOVERY__MAX_AGE_SECS") {
            if let Ok(n) = v.parse() {
                self.discovery.max_age_secs = n;
            }
        }
    }
}

// ── Transport configuration ───────────────────────────────────────────────────

/// How the transport instance reaches the mesh. Fixed at first bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    /// Attach to another transport process running on this host.
    SharedInstance,
    /// Own routing and reach the mesh through directly configured gateways.
    DirectGateway,
}

impl InstanceMode {
    /// Loopback targets are shared-instance style; anything else is a gateway.
    pub fn for_host(host: &str) -> Self {
        if is_loopback_host(host) {
            InstanceMode::SharedInstance
        } else {
            InstanceMode::DirectGateway
        }
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    TcpClient,
}

/// One network interface entry of the transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKind,
    pub enabled: bool,
    pub target_host: String,
    pub target_port: u16,
}

impl InterfaceConfig {
    pub fn tcp_client(name: impl Into<String>, host: &str, port: u16) -> Self {
        Self {
            name: name.into(),
            kind: InterfaceKind::TcpClient,
            enabled: true,
            target_host: host.to_string(),
            target_port: port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSection {
    pub mode: InstanceMode,
    /// This process never routes for others.
    pub enable_transport: bool,
    /// This process never offers itself as a shared instance.
    pub share_instance: bool,
    pub shared_instance_port: u16,
    pub instance_control_port: u16,
}

/// Contents of `<config_dir>/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub transport: TransportSection,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

impl TransportConfig {
    /// Configuration for a client attached to `host:port` in `mode`.
    pub fn for_target(mode: InstanceMode, host: &str, port: u16) -> Self {
        let name = match mode {
            InstanceMode::SharedInstance => "Shared Instance".to_string(),
            InstanceMode::DirectGateway => format!("Gateway {host}:{port}"),
        };
        Self {
            transport: TransportSection {
                mode,
                enable_transport: false,
                share_instance: false,
                shared_instance_port: port,
                instance_control_port: port.wrapping_add(1),
            },
            interfaces: vec![InterfaceConfig::tcp_client(name, host, port)],
        }
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(TRANSPORT_CONFIG_FILE)
    }

    /// Write to `<dir>/config`, replacing any previous content.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = Self::path_in(dir);
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        let text = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        Ok(path)
    }

    pub fn read_from(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(dir);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path, e))
    }
}
