use std::io::Write as _;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;

use proto::{
    encode_frame, Body, CandidateKind, CandidateRecord, Packet, PeerId, Register, RegisterStatus,
    StreamDecoder, FLAG_RELAY_AVAILABLE,
};

use super::*;

fn bind_server() -> RendezvousServer {
    RendezvousServer::bind(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        ServerConfig::default(),
    )
    .unwrap()
}

fn client_socket() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    sock
}

fn local_v4(sock: &UdpSocket) -> SocketAddrV4 {
    match sock.local_addr().unwrap() {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(_) => unreachable!(),
    }
}

fn register(local: &str, remote: &str, candidates: Vec<CandidateRecord>) -> Packet {
    Packet::new(Body::Register(Register {
        local_id: PeerId::new(local).unwrap(),
        remote_id: PeerId::new(remote).unwrap(),
        tie_breaker: 7,
        candidates,
    }))
}

fn rec(last: u8, port: u16) -> CandidateRecord {
    let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, last), port);
    CandidateRecord {
        kind: CandidateKind::Host,
        addr,
        base_addr: addr,
        priority: 1,
    }
}

/// Ticks the server until `sock` yields a packet or the rounds run out.
fn recv_packet(server: &mut RendezvousServer, sock: &UdpSocket) -> Option<Packet> {
    let mut buf = [0u8; 2048];
    for _ in 0..20 {
        server.tick(Instant::now()).unwrap();
        match sock.recv_from(&mut buf) {
            Ok((n, _)) => return Packet::decode(&buf[..n]).ok(),
            Err(_) => continue,
        }
    }
    None
}

#[test]
fn test_register_ack_reports_mapping_and_relay() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let alice = client_socket();
    alice
        .send_to(&register("alice", "bob", vec![]).encode(), server_addr)
        .unwrap();

    let ack = recv_packet(&mut server, &alice).expect("no REGISTER_ACK");
    assert!(ack.has_flag(FLAG_RELAY_AVAILABLE));
    match ack.body {
        Body::RegisterAck(ack) => {
            assert_eq!(ack.status, RegisterStatus::PeerOffline);
            assert_eq!(ack.max_candidates, 8);
            assert_ne!(ack.session_id, 0);
            assert_eq!(ack.mapped, local_v4(&alice));
            assert_ne!(ack.probe_port, 0);
        }
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn test_pairing_delivers_cached_candidates_to_both() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let alice = client_socket();
    let bob = client_socket();

    // Alice registers first, with two candidates, and goes offline-ish.
    alice
        .send_to(
            &register("alice", "bob", vec![rec(1, 1111), rec(2, 2222)]).encode(),
            server_addr,
        )
        .unwrap();
    let _ = recv_packet(&mut server, &alice);

    // Bob arrives second; both must now see PEER_INFO(seq=1).
    bob.send_to(&register("bob", "alice", vec![rec(3, 3333)]).encode(), server_addr)
        .unwrap();

    let mut bob_got_info = None;
    let mut bob_status = None;
    for _ in 0..10 {
        match recv_packet(&mut server, &bob) {
            Some(Packet {
                body: Body::RegisterAck(ack),
                ..
            }) => bob_status = Some(ack.status),
            Some(pkt @ Packet {
                body: Body::PeerInfo(_),
                ..
            }) => {
                bob_got_info = Some(pkt);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(bob_status, Some(RegisterStatus::PeerOnline));
    let bob_info = bob_got_info.expect("bob got no PEER_INFO");
    assert_eq!(bob_info.seq, 1);
    match bob_info.body {
        Body::PeerInfo(info) => {
            assert_eq!(info.sender_id.as_str(), "alice");
            assert_eq!(info.candidates.len(), 2);
            assert_eq!(info.base_index, 0);
        }
        _ => unreachable!(),
    }

    let alice_info = recv_packet(&mut server, &alice).expect("alice got no PEER_INFO");
    assert_eq!(alice_info.seq, 1);
    match alice_info.body {
        Body::PeerInfo(info) => {
            assert_eq!(info.sender_id.as_str(), "bob");
            assert_eq!(info.candidates.len(), 1);
        }
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn test_peer_info_forwarded_between_linked_pair() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let alice = client_socket();
    let bob = client_socket();
    alice
        .send_to(&register("alice", "bob", vec![]).encode(), server_addr)
        .unwrap();
    let _ = recv_packet(&mut server, &alice);
    bob.send_to(&register("bob", "alice", vec![]).encode(), server_addr)
        .unwrap();
    let _ = recv_packet(&mut server, &bob);

    let info = Packet::with_seq(
        Body::PeerInfo(proto::PeerInfo {
            sender_id: PeerId::new("alice").unwrap(),
            target_id: PeerId::new("bob").unwrap(),
            timestamp_ms: 1,
            flags: 0,
            base_index: 0,
            candidates: vec![rec(9, 9999)],
        }),
        2,
    );
    alice.send_to(&info.encode(), server_addr).unwrap();

    let mut forwarded = None;
    for _ in 0..10 {
        if let Some(pkt) = recv_packet(&mut server, &bob) {
            if matches!(pkt.body, Body::PeerInfo(_)) && pkt.seq == 2 {
                forwarded = Some(pkt);
                break;
            }
        }
    }
    assert_eq!(forwarded, Some(info));
}

#[test]
fn test_offline_peer_info_is_cached_and_acked_by_server() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let alice = client_socket();
    alice
        .send_to(&register("alice", "bob", vec![]).encode(), server_addr)
        .unwrap();
    let _ = recv_packet(&mut server, &alice);

    let info = Packet::with_seq(
        Body::PeerInfo(proto::PeerInfo {
            sender_id: PeerId::new("alice").unwrap(),
            target_id: PeerId::new("bob").unwrap(),
            timestamp_ms: 1,
            flags: 0,
            base_index: 0,
            candidates: vec![rec(5, 5555)],
        }),
        2,
    );
    alice.send_to(&info.encode(), server_addr).unwrap();

    let mut acked = false;
    for _ in 0..10 {
        if let Some(pkt) = recv_packet(&mut server, &alice) {
            if matches!(pkt.body, Body::PeerInfoAck { .. }) && pkt.seq == 2 {
                acked = true;
                break;
            }
        }
    }
    assert!(acked, "server did not ack in the absent peer's stead");

    let idx = server
        .table()
        .find_pair(&PeerId::new("alice").unwrap(), &PeerId::new("bob").unwrap())
        .unwrap();
    assert_eq!(server.table().get(idx).unwrap().cache.len(), 1);
}

#[test]
fn test_relay_forwards_to_partner_endpoint() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let alice = client_socket();
    let bob = client_socket();
    alice
        .send_to(&register("alice", "bob", vec![]).encode(), server_addr)
        .unwrap();
    let ack = recv_packet(&mut server, &alice).unwrap();
    let alice_sid = match ack.body {
        Body::RegisterAck(a) => a.session_id,
        _ => unreachable!(),
    };
    bob.send_to(&register("bob", "alice", vec![]).encode(), server_addr)
        .unwrap();
    let _ = recv_packet(&mut server, &bob);

    let inner = Packet::with_seq(Body::Data(Bytes::from_static(b"relayed")), 4).encode();
    let relay = Packet::new(Body::RelayData {
        session_id: alice_sid,
        inner: inner.clone(),
    });
    alice.send_to(&relay.encode(), server_addr).unwrap();

    let mut got = None;
    for _ in 0..10 {
        if let Some(pkt) = recv_packet(&mut server, &bob) {
            if let Body::RelayData { inner: fwd, .. } = pkt.body {
                got = Some(fwd);
                break;
            }
        }
    }
    assert_eq!(got, Some(inner));
}

#[test]
fn test_nat_probe_echoes_observed_endpoint() {
    let mut server = bind_server();
    let probe_addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.probe_port());

    let sock = client_socket();
    sock.send_to(
        &Packet::new(Body::NatProbe { tsx_id: 99 }).encode(),
        probe_addr,
    )
    .unwrap();

    let ack = recv_packet(&mut server, &sock).expect("no NAT_PROBE_ACK");
    match ack.body {
        Body::NatProbeAck { mapped, tsx_id } => {
            assert_eq!(tsx_id, 99);
            assert_eq!(mapped, local_v4(&sock));
        }
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn test_stream_client_registers_over_rely_framing() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(server_addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    stream
        .write_all(&encode_frame(&register("carol", "dave", vec![])))
        .unwrap();

    let mut decoder = StreamDecoder::new();
    let mut buf = [0u8; 2048];
    let mut ack = None;
    for _ in 0..20 {
        server.tick(Instant::now()).unwrap();
        match std::io::Read::read(&mut stream, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                decoder.push(&buf[..n]);
                if let Ok(Some(pkt)) = decoder.next_packet() {
                    ack = Some(pkt);
                    break;
                }
            }
            Err(_) => continue,
        }
    }

    let ack = ack.expect("no REGISTER_ACK over the stream");
    match ack.body {
        Body::RegisterAck(a) => {
            assert_eq!(a.status, RegisterStatus::PeerOffline);
            assert_ne!(a.session_id, 0);
        }
        other => panic!("unexpected body {other:?}"),
    }
}

#[test]
fn test_malformed_datagrams_are_counted_not_fatal() {
    let mut server = bind_server();
    let server_addr = server.local_addr().unwrap();

    let sock = client_socket();
    sock.send_to(b"\xFF\x00garbage", server_addr).unwrap();
    sock.send_to(b"x", server_addr).unwrap();

    for _ in 0..5 {
        server.tick(Instant::now()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.dropped_malformed(), 2);
}
