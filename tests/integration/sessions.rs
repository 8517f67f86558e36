use crate::*;

use haven_core::protocol::{Geometry, ShellMessage};

/// The handshake is VersionInfo then ExecuteCommand with the requested
/// geometry and an empty command line. No WindowSize goes out first.
#[test]
fn test_handshake_order() {
    let node = Node::bootstrapped("handshake").unwrap();
    let (hash, remote) = node.shell(1, Some(1));

    node.bridge.create_session(&hash.to_hex(), "s", 40, 120).unwrap();

    let received = remote.received();
    assert_eq!(received.len(), 2, "{received:?}");
    assert!(matches!(received[0], ShellMessage::VersionInfo { .. }));
    match &received[1] {
        ShellMessage::ExecuteCommand { cmdline, rows, cols, term, pipe_stdin, .. } => {
            assert!(cmdline.is_empty());
            assert_eq!((*rows, *cols), (40, 120));
            assert_eq!(term, "xterm-256color");
            assert!(!pipe_stdin);
        }
        other => panic!("expected ExecuteCommand, got {other:?}"),
    }
    assert!(!received.iter().any(|m| matches!(m, ShellMessage::WindowSize { .. })));
}

/// Input never comes back as output of the same session.
#[test]
fn test_input_not_echoed() {
    let node = Node::bootstrapped("echo").unwrap();
    let remote = node.session(1, "s").unwrap();

    assert!(node.bridge.send_input("s", b"secret"));
    assert_eq!(remote.stdin(), b"secret".to_vec());
    assert_eq!(node.bridge.read_output("s", 100), ReadOutcome::Empty);
}

/// Output is delivered in order across many chunks.
#[test]
fn test_output_order_preserved() {
    let node = Node::bootstrapped("order").unwrap();
    let remote = node.session(1, "s").unwrap();

    let mut expected = Vec::new();
    for i in 0..50u8 {
        let chunk = format!("line {i}\n");
        expected.extend_from_slice(chunk.as_bytes());
        remote.emit_stdout(chunk.as_bytes());
    }

    let out = read_exact(&node.bridge, "s", expected.len(), Duration::from_secs(5)).unwrap();
    assert_eq!(out, expected);
}

/// After the command exits the next read reports disconnect, and so does
/// every read after it.
#[test]
fn test_exit_disconnects_permanently() {
    let node = Node::bootstrapped("exit").unwrap();
    let remote = node.session(1, "s").unwrap();

    remote.emit_stdout(b"logout\n");
    remote.exit(0);

    assert_eq!(node.bridge.read_output("s", 1000), ReadOutcome::Data(b"logout\n".to_vec().into()));
    assert_eq!(node.bridge.read_output("s", 1000), ReadOutcome::Disconnected);
    for _ in 0..3 {
        assert_eq!(node.bridge.read_output("s", 10), ReadOutcome::Disconnected);
    }
    assert!(!node.bridge.send_input("s", b"x"));
}

/// Resize after the handshake sends a WindowSize message.
#[test]
fn test_resize() {
    let node = Node::bootstrapped("resize").unwrap();
    let remote = node.session(1, "s").unwrap();

    node.bridge.resize("s", 132, 43);
    assert_eq!(
        remote.received().last(),
        Some(&ShellMessage::window_size(Geometry::new(43, 132)))
    );

    // Unknown sessions are ignored.
    node.bridge.resize("nope", 1, 1);
}

/// Closing one session leaves another one untouched.
#[test]
fn test_close_is_isolated() {
    let node = Node::bootstrapped("isolate").unwrap();
    let _remote_a = node.session(1, "a").unwrap();
    let remote_b = node.session(2, "b").unwrap();

    node.bridge.close_session("a");
    assert_eq!(node.bridge.read_output("a", 10), ReadOutcome::Disconnected);
    assert!(!node.bridge.is_connected("a"));

    remote_b.emit_stdout(b"still here");
    let out = read_exact(&node.bridge, "b", 10, Duration::from_secs(2)).unwrap();
    assert_eq!(out, b"still here");
    assert!(node.bridge.is_connected("b"));
}

/// A read blocked on a session wakes up when another thread closes it.
#[test]
fn test_close_wakes_reader() {
    let node = Node::bootstrapped("wake").unwrap();
    let _remote = node.session(1, "s").unwrap();

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let started = Instant::now();
            let outcome = node.bridge.read_output("s", 10_000);
            (outcome, started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(100));
        node.bridge.close_session("s");

        let (outcome, waited) = reader.join().unwrap();
        assert_eq!(outcome, ReadOutcome::Disconnected);
        assert!(waited < Duration::from_secs(5), "reader waited {waited:?}");
    });
    assert_eq!(node.net.teardowns(), 1);
}

/// close_all tears every session down but leaves the transport usable.
#[test]
fn test_close_all_keeps_transport() {
    let node = Node::bootstrapped("close-all").unwrap();
    for (n, id) in [(1, "a"), (2, "b"), (3, "c")] {
        node.session(n, id).unwrap();
    }
    assert_eq!(node.bridge.status().active_sessions, 3);

    assert_eq!(node.bridge.close_all(), 3);
    assert_eq!(node.bridge.status().active_sessions, 0);
    assert!(node.bridge.status().sessions.is_empty());
    assert_eq!(node.net.teardowns(), 3);

    node.session(4, "d").unwrap();
    assert!(node.bridge.is_connected("d"));
    assert_eq!(node.net.start_count(), 1);
}

/// Many sessions driven from many threads at once.
#[test]
fn test_concurrent_sessions() {
    let node = Node::bootstrapped("concurrent").unwrap();
    let remotes: Vec<_> = (0..8u8)
        .map(|n| node.session(n + 1, &format!("s{n}")).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for (n, remote) in remotes.iter().enumerate() {
            let node = &node;
            scope.spawn(move || {
                let id = format!("s{n}");
                let payload = format!("output of {id}");
                remote.emit_stdout(payload.as_bytes());
                let out = read_exact(&node.bridge, &id, payload.len(), Duration::from_secs(5)).unwrap();
                assert_eq!(out, payload.as_bytes());
                assert!(node.bridge.send_input(&id, b"q"));
            });
        }
    });

    for remote in &remotes {
        assert_eq!(remote.stdin(), b"q".to_vec());
    }
}

/// Two sessions created in parallel; closing one while the other is in the
/// middle of a read leaves the other's output intact.
#[test]
fn test_parallel_create_and_isolated_close() {
    let node = Node::bootstrapped("parallel").unwrap();
    let (hash_a, _remote_a) = node.shell(1, Some(1));
    let (hash_b, remote_b) = node.shell(2, Some(1));

    std::thread::scope(|scope| {
        let a = scope.spawn(|| node.bridge.create_session(&hash_a.to_hex(), "a", 24, 80));
        let b = scope.spawn(|| node.bridge.create_session(&hash_b.to_hex(), "b", 24, 80));
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
    });
    assert_eq!(node.bridge.status().active_sessions, 2);

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| read_exact(&node.bridge, "b", 10, Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(50));

        node.bridge.close_session("a");
        assert_eq!(node.bridge.read_output("a", 10), ReadOutcome::Disconnected);
        remote_b.emit_stdout(b"still here");

        assert_eq!(reader.join().unwrap().unwrap(), b"still here");
    });
    assert!(node.bridge.is_connected("b"));
    assert!(!node.bridge.is_connected("a"));
}

/// A create racing close_all ends in a consistent table: the new session is
/// either registered and live or gone and closed.
#[test]
fn test_create_racing_close_all() {
    let node = Node::bootstrapped("create-vs-close-all").unwrap();
    for (n, id) in [(1, "a"), (2, "b")] {
        node.session(n, id).unwrap();
    }
    let (hash, _remote) = node.shell(3, Some(1));

    std::thread::scope(|scope| {
        let create = scope.spawn(|| node.bridge.create_session(&hash.to_hex(), "c", 24, 80));
        node.bridge.close_all();
        create.join().unwrap().unwrap();
    });

    let status = node.bridge.status();
    let listed = status.sessions.iter().any(|s| s.session_id == "c");
    assert_eq!(listed, node.bridge.is_connected("c"));
    assert!(status.sessions.iter().all(|s| s.session_id == "c"));
    assert_eq!(status.active_sessions, status.sessions.len());
}
