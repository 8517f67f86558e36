//! Haven integration test harness.
//!
//! Tests in this crate drive the public `Bridge` API end to end against the
//! in-memory mesh from `haven-sim`. No network or privileges are needed.
//!
//!   cargo test --test integration
//!
//! Every test builds its own `Node` (simulated mesh + bridge + config
//! directory), so tests never share transport state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use haven_bridge::Bridge;
use haven_core::config::BridgeConfig;
use haven_core::DestinationHash;
use haven_services::ReadOutcome;
use haven_sim::{SimNetwork, SimRemoteShell};

mod discovery;
mod failures;
mod sessions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SHARED_HOST: &str = "127.0.0.1";
pub const SHARED_PORT: u16 = 37428;
pub const GATEWAY_HOST: &str = "10.0.0.5";
pub const GATEWAY_PORT: u16 = 4242;

static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fresh config directory, unique per process and call.
pub fn temp_config_dir(tag: &str) -> PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("haven-it-{tag}-{}-{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Bridge configuration with timeouts short enough for tests.
pub fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.timeouts.resolve_secs = 1;
    config.timeouts.link_secs = 1;
    config.timeouts.poll_interval_ms = 10;
    config.timeouts.probe_millis = 200;
    config.shell.term = "xterm-256color".to_string();
    config
}

pub fn dest(n: u8) -> DestinationHash {
    DestinationHash::new([n; 16])
}

/// A simulated mesh with one bridge attached to it.
pub struct Node {
    pub net: SimNetwork,
    pub bridge: Bridge,
    pub dir: PathBuf,
}

impl Node {
    pub fn new(tag: &str) -> Result<Self> {
        let net = SimNetwork::new();
        let bridge = Bridge::with_config(net.factory(), fast_config())?;
        Ok(Self {
            net,
            bridge,
            dir: temp_config_dir(tag),
        })
    }

    /// Node already bootstrapped against the local shared instance.
    pub fn bootstrapped(tag: &str) -> Result<Self> {
        let node = Self::new(tag)?;
        node.bridge.bootstrap(&node.dir, SHARED_HOST, SHARED_PORT)?;
        Ok(node)
    }

    /// Register a reachable remote shell on the mesh.
    pub fn shell(&self, n: u8, hops: Option<u8>) -> (DestinationHash, SimRemoteShell) {
        let remote = SimRemoteShell::new();
        self.net.add_endpoint(dest(n), &remote, hops);
        (dest(n), remote)
    }

    /// Register a shell and open a session to it.
    pub fn session(&self, n: u8, id: &str) -> Result<SimRemoteShell> {
        let (hash, remote) = self.shell(n, Some(1));
        self.bridge.create_session(&hash.to_hex(), id, 24, 80)?;
        Ok(remote)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Read until `expected` bytes have arrived, or fail after `timeout`.
pub fn read_exact(bridge: &Bridge, id: &str, expected: usize, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < expected {
        if Instant::now() >= deadline {
            bail!("timed out with {} of {expected} bytes: {:?}", out.len(), String::from_utf8_lossy(&out));
        }
        match bridge.read_output(id, 100) {
            ReadOutcome::Data(bytes) => out.extend_from_slice(&bytes),
            ReadOutcome::Empty => {}
            ReadOutcome::Disconnected => bail!("session {id} disconnected after {} bytes", out.len()),
        }
    }
    Ok(out)
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ── Smoke ─────────────────────────────────────────────────────────────────────

#[test]
fn test_shell_round_trip() {
    let node = Node::bootstrapped("smoke").unwrap();

    let result = (|| -> Result<()> {
        let remote = node.session(1, "tab")?;
        assert!(node.bridge.is_connected("tab"));

        assert!(node.bridge.send_input("tab", b"echo hi\n"));
        assert_eq!(remote.stdin(), b"echo hi\n".to_vec());

        remote.emit_stdout(b"hi\r\n");
        let out = read_exact(&node.bridge, "tab", 4, Duration::from_secs(2))?;
        assert_eq!(out, b"hi\r\n");

        remote.exit(0);
        assert!(wait_for(Duration::from_secs(2), || {
            node.bridge.read_output("tab", 50) == ReadOutcome::Disconnected
        }));
        assert!(!node.bridge.is_connected("tab"));
        Ok(())
    })();

    result.unwrap();
}
