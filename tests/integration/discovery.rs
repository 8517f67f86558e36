use crate::*;

/// Only announced endpoints show up, nearest first, unknown distance last.
#[test]
fn test_discovered_sorted_by_hops() {
    let node = Node::bootstrapped("sorted").unwrap();

    let (far, _) = node.shell(1, Some(5));
    let (near, _) = node.shell(2, Some(1));
    let (unknown, _) = node.shell(3, None);
    let (_silent, _) = node.shell(4, Some(0));

    node.net.announce(&far);
    node.net.announce(&unknown);
    node.net.announce(&near);

    let listed = node.bridge.list_discovered();
    let order: Vec<_> = listed.iter().map(|e| (e.hash.clone(), e.hops)).collect();
    assert_eq!(
        order,
        vec![
            (near.to_hex(), Some(1)),
            (far.to_hex(), Some(5)),
            (unknown.to_hex(), None),
        ]
    );
}

/// Re-announcing keeps a single entry with the latest hop count.
#[test]
fn test_reannounce_keeps_latest() {
    let node = Node::bootstrapped("reannounce").unwrap();
    let remote = SimRemoteShell::new();

    node.net.add_endpoint(dest(7), &remote, Some(4));
    node.net.announce(&dest(7));
    node.net.add_endpoint(dest(7), &remote, Some(2));
    node.net.announce(&dest(7));

    let listed = node.bridge.list_discovered();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].hops, Some(2));
    assert_eq!(listed[0].last_seen_secs, 0);
}

/// Announces for other aspects never reach the shell listing.
#[test]
fn test_foreign_announces_ignored() {
    let node = Node::bootstrapped("foreign").unwrap();
    node.net.announce_foreign(dest(9), "lxmf.delivery");
    assert!(node.bridge.list_discovered().is_empty());
}

/// An unknown path is requested once and times out; a known one resolves
/// immediately.
#[test]
fn test_resolve_destination() {
    let node = Node::bootstrapped("resolve").unwrap();
    let (known, _) = node.shell(1, Some(1));

    assert!(node.bridge.resolve_destination(&known.to_hex()).unwrap());
    assert_eq!(node.net.path_requests(&known), 0);

    let missing = dest(0xee);
    assert!(!node.bridge.resolve_destination(&missing.to_hex()).unwrap());
    assert_eq!(node.net.path_requests(&missing), 1);
}

/// A fire-and-forget path request is answered by an announce, which lands
/// in the discovery listing.
#[test]
fn test_request_path_answer_is_discovered() {
    let node = Node::bootstrapped("request").unwrap();
    let remote = SimRemoteShell::new();
    node.net.add_hidden_endpoint(dest(5), &remote, Some(3));
    node.net.answer_path_requests_after(Duration::from_millis(20));

    assert!(!node.bridge.request_path(&dest(5).to_hex()).unwrap());
    assert!(wait_for(Duration::from_secs(2), || !node.bridge.list_discovered().is_empty()));

    let listed = node.bridge.list_discovered();
    assert_eq!(listed[0].hash, dest(5).to_hex());
    assert_eq!(listed[0].hops, Some(3));
    assert!(node.bridge.request_path(&dest(5).to_hex()).unwrap());
}

/// Resolution followed by session creation, the way hosts use it.
#[test]
fn test_resolve_then_connect() {
    let node = Node::bootstrapped("resolve-connect").unwrap();
    let remote = SimRemoteShell::new();
    node.net.add_hidden_endpoint(dest(6), &remote, Some(2));
    node.net.answer_path_requests_after(Duration::from_millis(30));

    let hash = dest(6).to_hex();
    assert!(node.bridge.resolve_destination(&hash).unwrap());
    node.bridge.create_session(&hash, "s", 30, 100).unwrap();
    assert!(node.bridge.is_connected("s"));
    assert!(remote.is_linked());
}
