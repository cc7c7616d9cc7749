use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use natlink::signal::{BlobStore, MemoryBlobStore, RendezvousServer, ServerConfig};
use natlink::{PathKind, Session, SessionConfig, SessionState, SignalingMode};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rendezvous() -> RendezvousServer {
    init_log();
    RendezvousServer::bind(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        ServerConfig::default(),
    )
    .unwrap()
}

fn stateful_config(id: &str, server: SocketAddrV4) -> SessionConfig {
    let mut c = SessionConfig::default();
    c.peer_id = id.to_owned();
    c.signaling_mode = SignalingMode::Stateful;
    c.server_host = server.ip().to_string();
    c.server_port = server.port();
    c.disable_lan_shortcut = true;
    c
}

/// Ticks the server and every session until `pred` holds or the
/// timeout passes. Returns whether the predicate was reached.
fn drive_until(
    server: &mut RendezvousServer,
    sessions: &[&Session],
    timeout: Duration,
    mut pred: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        server.tick(Instant::now()).unwrap();
        for s in sessions {
            s.tick();
        }
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn connect_pair(
    server: &mut RendezvousServer,
    alice: &Session,
    bob: &Session,
    timeout: Duration,
) -> bool {
    drive_until(server, &[alice, bob], timeout, || {
        alice.is_ready() && bob.is_ready()
    })
}

#[test]
fn test_punch_and_exchange_on_localhost() {
    let mut server = rendezvous();
    let server_addr = server.local_addr().unwrap();

    // Alice waits passively; Bob offers toward her.
    let alice = Session::create(stateful_config("alice", server_addr)).unwrap();
    alice.connect(None).unwrap();
    let bob = Session::create(stateful_config("bob", server_addr)).unwrap();
    bob.connect(Some("alice")).unwrap();

    assert!(
        connect_pair(&mut server, &alice, &bob, Duration::from_secs(2)),
        "not ready in time: alice={} bob={}",
        alice.state(),
        bob.state()
    );
    assert_eq!(alice.state(), SessionState::Connected);
    assert_eq!(bob.state(), SessionState::Connected);
    assert_eq!(bob.path(), PathKind::Punch);
    assert_ne!(alice.session_id(), 0);

    assert_eq!(bob.send(b"PING").unwrap(), 4);

    let mut got = Vec::new();
    let ok = drive_until(&mut server, &[&alice, &bob], Duration::from_secs(2), || {
        let mut buf = [0u8; 64];
        let n = alice.recv(&mut buf).unwrap();
        got.extend_from_slice(&buf[..n]);
        got == b"PING"
    });
    assert!(ok, "got {got:?}");
}

#[test]
fn test_tcp_simultaneous_open_runs_alongside_udp_punch() {
    let mut server = rendezvous();
    let server_addr = server.local_addr().unwrap();

    let mut alice_cfg = stateful_config("alice", server_addr);
    alice_cfg.enable_tcp = true;
    alice_cfg.host_allow_list = vec![Ipv4Addr::LOCALHOST];
    let mut bob_cfg = stateful_config("bob", server_addr);
    bob_cfg.enable_tcp = true;
    bob_cfg.host_allow_list = vec![Ipv4Addr::LOCALHOST];

    let alice = Session::create(alice_cfg).unwrap();
    alice.connect(None).unwrap();
    let bob = Session::create(bob_cfg).unwrap();
    bob.connect(Some("alice")).unwrap();

    assert!(connect_pair(&mut server, &alice, &bob, Duration::from_secs(2)));

    // On loopback the crossing TCP connects land as well; the data
    // plane stays on the punched UDP path regardless.
    let ok = drive_until(&mut server, &[&alice, &bob], Duration::from_secs(5), || {
        alice.tcp_path().is_some() && bob.tcp_path().is_some()
    });
    assert!(ok, "tcp punch never crossed");
    assert_eq!(bob.path(), PathKind::Punch);
}

#[test]
fn test_offline_registration_is_cached_until_peer_arrives() {
    let mut server = rendezvous();
    let server_addr = server.local_addr().unwrap();

    // Alice names bob while he is nowhere to be seen.
    let alice = Session::create(stateful_config("alice", server_addr)).unwrap();
    alice.connect(Some("bob")).unwrap();
    drive_until(&mut server, &[&alice], Duration::from_millis(500), || false);
    assert_eq!(alice.state(), SessionState::Registering);

    // Bob shows up; the cached candidates flow both ways.
    let bob = Session::create(stateful_config("bob", server_addr)).unwrap();
    bob.connect(Some("alice")).unwrap();

    assert!(
        connect_pair(&mut server, &alice, &bob, Duration::from_secs(5)),
        "not ready: alice={} bob={}",
        alice.state(),
        bob.state()
    );
}

#[test]
fn test_bulk_transfer_stays_in_order() {
    let mut server = rendezvous();
    let server_addr = server.local_addr().unwrap();

    let alice = Session::create(stateful_config("alice", server_addr)).unwrap();
    alice.connect(None).unwrap();
    let bob = Session::create(stateful_config("bob", server_addr)).unwrap();
    bob.connect(Some("alice")).unwrap();
    assert!(connect_pair(&mut server, &alice, &bob, Duration::from_secs(2)));

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
    let mut sent = 0usize;
    let mut got = Vec::with_capacity(payload.len());

    let ok = drive_until(&mut server, &[&alice, &bob], Duration::from_secs(30), || {
        if sent < payload.len() {
            let end = payload.len().min(sent + 8 * 1024);
            sent += bob.send(&payload[sent..end]).unwrap();
        }
        let mut buf = [0u8; 4096];
        loop {
            let n = alice.recv(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        got.len() == payload.len()
    });

    assert!(ok, "only {} of {} bytes arrived", got.len(), payload.len());
    assert_eq!(got, payload);
    // The smoothed RTT on loopback settles well below half a second.
    assert!(bob.srtt_ms().unwrap_or(0) < 500);
}

#[test]
fn test_close_handshake_reaches_both_sides() {
    let mut server = rendezvous();
    let server_addr = server.local_addr().unwrap();

    let alice = Session::create(stateful_config("alice", server_addr)).unwrap();
    alice.connect(None).unwrap();
    let bob = Session::create(stateful_config("bob", server_addr)).unwrap();
    bob.connect(Some("alice")).unwrap();
    assert!(connect_pair(&mut server, &alice, &bob, Duration::from_secs(2)));

    bob.close();
    let ok = drive_until(&mut server, &[&alice, &bob], Duration::from_secs(5), || {
        bob.state() == SessionState::Closed && alice.state() == SessionState::Closed
    });
    assert!(ok, "alice={} bob={}", alice.state(), bob.state());

    assert!(bob.send(b"late").is_err());
}

#[test]
fn test_pubsub_offer_answer_reaches_connected() {
    init_log();
    let store = MemoryBlobStore::new();

    let mut publisher_cfg = SessionConfig::default();
    publisher_cfg.peer_id = "alice".to_owned();
    publisher_cfg.signaling_mode = SignalingMode::PubSub;
    publisher_cfg.auth_key = "abc123".to_owned();
    publisher_cfg.blob_store = Some(Box::new(store.clone()));
    publisher_cfg.host_allow_list = vec![Ipv4Addr::LOCALHOST];
    publisher_cfg.disable_lan_shortcut = true;

    let mut subscriber_cfg = SessionConfig::default();
    subscriber_cfg.peer_id = "bob".to_owned();
    subscriber_cfg.signaling_mode = SignalingMode::PubSub;
    subscriber_cfg.auth_key = "abc123".to_owned();
    subscriber_cfg.blob_store = Some(Box::new(store.clone()));
    subscriber_cfg.host_allow_list = vec![Ipv4Addr::LOCALHOST];
    subscriber_cfg.disable_lan_shortcut = true;

    let publisher = Session::create(publisher_cfg).unwrap();
    publisher.connect(Some("bob")).unwrap();
    let subscriber = Session::create(subscriber_cfg).unwrap();
    subscriber.connect(None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        publisher.tick();
        subscriber.tick();
        if publisher.is_ready() && subscriber.is_ready() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(
        publisher.is_ready() && subscriber.is_ready(),
        "pub={} sub={}",
        publisher.state(),
        subscriber.state()
    );

    // The subscriber answered exactly once.
    let mut probe = store.clone();
    assert!(probe.load().unwrap().answer.is_some());

    assert_eq!(publisher.send(b"over the blob").unwrap(), 13);
    let mut got = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && got != b"over the blob" {
        publisher.tick();
        subscriber.tick();
        let mut buf = [0u8; 64];
        let n = subscriber.recv(&mut buf).unwrap();
        got.extend_from_slice(&buf[..n]);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(got, b"over the blob");
}
