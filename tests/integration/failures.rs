use crate::*;

use haven_bridge::BridgeError;
use haven_services::SessionError;

/// Creating a session to an endpoint whose identity is unknown fails fast
/// and never opens a link.
#[test]
fn test_unresolved_identity() {
    let node = Node::bootstrapped("unresolved").unwrap();

    let err = node
        .bridge
        .create_session(&dest(0x55).to_hex(), "s", 24, 80)
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Session(SessionError::IdentityUnresolved(_))
    ));
    assert_eq!(node.net.links_opened(), 0);
    assert_eq!(node.bridge.read_output("s", 10), ReadOutcome::Disconnected);
}

/// A remote that never answers the link request times out and the link is
/// torn down.
#[test]
fn test_link_timeout() {
    let node = Node::bootstrapped("stall").unwrap();
    let (hash, remote) = node.shell(1, Some(1));
    remote.stall_links();

    let started = Instant::now();
    let err = node.bridge.create_session(&hash.to_hex(), "s", 24, 80).unwrap_err();
    assert!(matches!(err, BridgeError::Session(SessionError::LinkTimeout(..))));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(node.net.teardowns(), 1);
    assert!(!node.bridge.is_connected("s"));
}

/// A remote that refuses the link reports it closed before establishment.
#[test]
fn test_link_refused() {
    let node = Node::bootstrapped("refuse").unwrap();
    let (hash, remote) = node.shell(1, Some(1));
    remote.refuse_links();

    let err = node.bridge.create_session(&hash.to_hex(), "s", 24, 80).unwrap_err();
    assert!(matches!(err, BridgeError::Session(SessionError::LinkClosed(_))));
}

/// Non-fatal remote errors are counted and otherwise ignored.
#[test]
fn test_non_fatal_errors_suppressed() {
    let node = Node::bootstrapped("nonfatal").unwrap();
    let remote = node.session(1, "s").unwrap();

    remote.error("could not set window size", false);
    remote.emit_stdout(b"$ ");
    let out = read_exact(&node.bridge, "s", 2, Duration::from_secs(2)).unwrap();
    assert_eq!(out, b"$ ");

    assert!(node.bridge.is_connected("s"));
    let status = node.bridge.status();
    assert_eq!(status.sessions[0].suppressed_errors, 1);
}

/// A fatal remote error ends the session.
#[test]
fn test_fatal_error_disconnects() {
    let node = Node::bootstrapped("fatal").unwrap();
    let remote = node.session(1, "s").unwrap();

    remote.error("shell not permitted", true);
    assert!(wait_for(Duration::from_secs(2), || {
        node.bridge.read_output("s", 50) == ReadOutcome::Disconnected
    }));
    assert!(!node.bridge.is_connected("s"));
}

/// The remote dropping the link mid-session surfaces as a disconnect.
#[test]
fn test_remote_link_drop() {
    let node = Node::bootstrapped("drop").unwrap();
    let remote = node.session(1, "s").unwrap();

    remote.emit_stdout(b"partial");
    remote.drop_link();

    let out = read_exact(&node.bridge, "s", 7, Duration::from_secs(2)).unwrap();
    assert_eq!(out, b"partial");
    assert_eq!(node.bridge.read_output("s", 1000), ReadOutcome::Disconnected);
    assert!(!node.bridge.send_input("s", b"more"));
}

/// Operations on unknown sessions are neutral.
#[test]
fn test_unknown_session_is_neutral() {
    let node = Node::bootstrapped("unknown").unwrap();

    assert_eq!(node.bridge.read_output("ghost", 10), ReadOutcome::Disconnected);
    assert!(!node.bridge.send_input("ghost", b"x"));
    assert!(!node.bridge.is_connected("ghost"));
    node.bridge.resize("ghost", 80, 24);
    node.bridge.close_session("ghost");
    node.bridge.close_session("ghost");
}
