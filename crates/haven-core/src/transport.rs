//! Mesh transport contract.
//!
//! Haven never routes, encrypts, or discovers paths itself. Everything it
//! needs from the mesh is expressed by the traits in this module:
//!
//!   MeshTransport     path knowledge, identity recall, links, announces
//!   Link / Channel    an established circuit and its message sub-protocol
//!   LinkCallbacks     lifecycle notifications fired on transport threads
//!   AnnounceHandler   discovery notifications fired on transport threads
//!   TransportFactory  one-shot start of the process-wide instance
//!
//! Callback methods run on threads owned by the transport. Implementors of
//! the callback traits must return quickly and never block.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::{InterfaceConfig, TransportConfig};
use crate::protocol::ShellMessage;

/// Length of a destination hash in bytes.
pub const HASH_LEN: usize = 16;

// ── Destination hash ──────────────────────────────────────────────────────────

/// Fixed-length opaque identifier of a mesh endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationHash([u8; HASH_LEN]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("destination hash is not valid hex: {0}")]
    InvalidHex(String),
    #[error("destination hash must be 16 bytes, got {0}")]
    WrongLength(usize),
}

impl DestinationHash {
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a lowercase or uppercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s.trim()).map_err(|_| HashError::InvalidHex(s.to_string()))?;
        let arr: [u8; HASH_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::WrongLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl FromStr for DestinationHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationHash({})", self.to_hex())
    }
}

impl Serialize for DestinationHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

// ── Hop count ─────────────────────────────────────────────────────────────────

/// Route cost to an endpoint as reported by the routing table.
///
/// `Unknown` is distinct from zero hops and orders after every known value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HopCount {
    Known(u8),
    Unknown,
}

impl HopCount {
    pub fn as_option(self) -> Option<u8> {
        match self {
            HopCount::Known(h) => Some(h),
            HopCount::Unknown => None,
        }
    }
}

impl From<Option<u8>> for HopCount {
    fn from(hops: Option<u8>) -> Self {
        hops.map(HopCount::Known).unwrap_or(HopCount::Unknown)
    }
}

// ── Identities ────────────────────────────────────────────────────────────────

/// Public identity of a remote endpoint, learned from an announce or a
/// resolved path. Required before a link can be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub public_key: [u8; 32],
}

impl RemoteIdentity {
    /// Truncated identity hash, same derivation as the local identity.
    pub fn hash(&self) -> [u8; HASH_LEN] {
        crate::crypto::truncated_hash(&self.public_key)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("interface {endpoint} failed: {reason}")]
    InterfaceFailed { endpoint: String, reason: String },
    #[error("transport start failed: {0}")]
    StartFailed(String),
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// How the transport should treat its process-global signal handler
/// installation during start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    /// Install handlers normally. Only valid on the process main thread.
    Install,
    /// Turn handler installation into a no-op for the duration of start-up.
    Suppress,
}

/// Invoked on a transport thread for every message received on a channel.
pub type MessageHandler = Box<dyn Fn(ShellMessage) + Send + Sync>;

/// Message-oriented sub-protocol layered on an established link.
pub trait Channel: Send + Sync {
    /// Queue a typed shell message for transmission.
    fn send(&self, message: ShellMessage) -> Result<(), TransportError>;

    /// Register the shell message types and the handler for inbound traffic.
    /// Replaces any previously registered handler.
    fn set_message_handler(&self, handler: MessageHandler);
}

/// An encrypted virtual circuit to a destination.
pub trait Link: Send + Sync {
    /// Derive the message channel. Only valid once the link is established.
    fn channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Tear the link down. Idempotent.
    fn teardown(&self);
}

/// Lifecycle notifications for a link under construction.
pub trait LinkCallbacks: Send + Sync {
    fn link_established(&self, link: Arc<dyn Link>);
    fn link_closed(&self);
}

/// Receives announces whose aspect matches `aspect_filter`.
pub trait AnnounceHandler: Send + Sync {
    fn aspect_filter(&self) -> &str;
    fn received_announce(&self, destination: DestinationHash, identity: &RemoteIdentity);
}

/// The running transport instance. One per process.
pub trait MeshTransport: Send + Sync {
    fn has_path(&self, destination: &DestinationHash) -> bool;

    /// Fire-and-forget path request. The answer arrives as an announce.
    fn request_path(&self, destination: &DestinationHash);

    fn recall_identity(&self, destination: &DestinationHash) -> Option<RemoteIdentity>;

    /// Routing-table lookup at the moment of the call.
    fn hops_to(&self, destination: &DestinationHash) -> HopCount;

    /// Begin establishing a link to `aspect` on the given identity. The
    /// callbacks fire later on a transport thread.
    fn open_link(
        &self,
        identity: &RemoteIdentity,
        aspect: &str,
        callbacks: Arc<dyn LinkCallbacks>,
    ) -> Result<Arc<dyn Link>, TransportError>;

    fn register_announce_handler(&self, handler: Arc<dyn AnnounceHandler>);

    /// Attach an additional network interface to the running instance.
    fn attach_interface(&self, interface: &InterfaceConfig) -> Result<(), TransportError>;
}

/// Starts the process-wide transport instance from a written configuration.
pub trait TransportFactory: Send + Sync {
    fn start(
        &self,
        config: &TransportConfig,
        config_dir: &Path,
        signals: SignalPolicy,
    ) -> Result<Arc<dyn MeshTransport>, TransportError>;
}
