use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use proto::{CandidateKind, PacketType};

use super::*;

fn server_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 8888)
}

fn pid(s: &str) -> PeerId {
    PeerId::new(s).unwrap()
}

fn rec(last: u8, port: u16) -> CandidateRecord {
    let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, last), port);
    CandidateRecord {
        kind: CandidateKind::Host,
        addr,
        base_addr: addr,
        priority: 1,
    }
}

fn drain(c: &mut StatefulClient) -> Vec<(SocketAddrV4, Packet)> {
    let mut out = Vec::new();
    while let Some(t) = c.poll_transmit() {
        out.push(t);
    }
    out
}

fn events(c: &mut StatefulClient) -> Vec<SignalEvent> {
    let mut out = Vec::new();
    while let Some(e) = c.poll_event() {
        out.push(e);
    }
    out
}

fn register_ack(status: RegisterStatus, probe_port: u16) -> Packet {
    let mut pkt = Packet::new(Body::RegisterAck(proto::RegisterAck {
        status,
        max_candidates: 8,
        session_id: 42,
        mapped: SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 7), 50000),
        probe_port,
    }));
    pkt.flags |= FLAG_RELAY_AVAILABLE;
    pkt
}

fn peer_info(seq: u16, base_index: u8, candidates: Vec<CandidateRecord>, fin: bool) -> Packet {
    let mut pkt = Packet::with_seq(
        Body::PeerInfo(PeerInfo {
            sender_id: pid("bob"),
            target_id: pid("alice"),
            timestamp_ms: 0,
            flags: 0,
            base_index,
            candidates,
        }),
        seq,
    );
    if fin {
        pkt.flags |= FLAG_FIN;
    }
    pkt
}

fn registered_client(now: Instant) -> StatefulClient {
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![rec(1, 4000)], now);
    drain(&mut c);
    c.handle_packet(&register_ack(RegisterStatus::PeerOffline, 0), server_addr(), now);
    drain(&mut c);
    events(&mut c);
    c
}

#[test]
fn test_register_sends_and_retries() {
    let t0 = Instant::now();
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![rec(1, 4000)], t0);

    let sent = drain(&mut c);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, server_addr());
    assert_eq!(sent[0].1.packet_type(), PacketType::Register);

    // Nothing before the retry interval, one resend after it.
    c.tick(t0 + Duration::from_millis(1999));
    assert!(drain(&mut c).is_empty());
    c.tick(t0 + Duration::from_millis(2000));
    let again = drain(&mut c);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].1.packet_type(), PacketType::Register);
}

#[test]
fn test_register_retries_exhaust_to_fatal() {
    let t0 = Instant::now();
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![], t0);

    let mut now = t0;
    for _ in 0..MAX_RETRY_ATTEMPTS + 1 {
        now += RETRY_INTERVAL;
        c.tick(now);
    }
    assert_eq!(c.state(), SignalState::Closed);
    assert!(events(&mut c)
        .iter()
        .any(|e| matches!(e, SignalEvent::Fatal { .. })));
}

#[test]
fn test_register_ack_settles_state() {
    let t0 = Instant::now();
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![rec(1, 4000)], t0);
    drain(&mut c);

    c.handle_packet(&register_ack(RegisterStatus::PeerOffline, 0), server_addr(), t0);
    assert_eq!(c.state(), SignalState::Registered);
    assert_eq!(c.session_id(), 42);
    assert!(c.relay_available());
    assert!(c.mapped().is_some());

    let evs = events(&mut c);
    assert!(matches!(
        evs[0],
        SignalEvent::Registered {
            session_id: 42,
            peer_online: false,
            relay_available: true,
            ..
        }
    ));

    // A duplicate ack (server answering a retry) changes nothing.
    c.handle_packet(&register_ack(RegisterStatus::PeerOnline, 0), server_addr(), t0);
    assert_eq!(c.state(), SignalState::Registered);
    assert!(events(&mut c).is_empty());
}

#[test]
fn test_register_ack_with_probe_port_triggers_nat_probe() {
    let t0 = Instant::now();
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![], t0);
    drain(&mut c);

    c.handle_packet(&register_ack(RegisterStatus::PeerOffline, 3479), server_addr(), t0);
    let sent = drain(&mut c);
    let probe_dst = SocketAddrV4::new(*server_addr().ip(), 3479);
    let probes: Vec<_> = sent
        .iter()
        .filter(|(a, p)| *a == probe_dst && p.packet_type() == PacketType::NatProbe)
        .collect();
    assert_eq!(probes.len(), 1);

    // Same observed mapping on the probe port: cone-like NAT.
    c.handle_packet(
        &Packet::new(Body::NatProbeAck {
            mapped: c.mapped().unwrap(),
            tsx_id: match probes[0].1.body {
                Body::NatProbe { tsx_id } => tsx_id,
                _ => unreachable!(),
            },
        }),
        probe_dst,
        t0,
    );
    assert_eq!(c.nat_class(), NatClass::Cone);
}

#[test]
fn test_nat_probe_mismatch_is_symmetric() {
    let t0 = Instant::now();
    let mut c = StatefulClient::new(server_addr(), pid("alice"));
    c.register(pid("bob"), vec![], t0);
    drain(&mut c);
    c.handle_packet(&register_ack(RegisterStatus::PeerOffline, 3479), server_addr(), t0);
    let sent = drain(&mut c);
    let tsx_id = sent
        .iter()
        .find_map(|(_, p)| match p.body {
            Body::NatProbe { tsx_id } => Some(tsx_id),
            _ => None,
        })
        .unwrap();

    c.handle_packet(
        &Packet::new(Body::NatProbeAck {
            mapped: SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 7), 50001),
            tsx_id,
        }),
        server_addr(),
        t0,
    );
    assert_eq!(c.nat_class(), NatClass::Symmetric);
}

#[test]
fn test_server_delivery_acked_and_surfaced_once() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    let info = peer_info(1, 0, vec![rec(9, 9000)], true);
    c.handle_packet(&info, server_addr(), t0);

    let sent = drain(&mut c);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.packet_type(), PacketType::PeerInfoAck);
    assert_eq!(sent[0].1.seq, 1);

    let evs = events(&mut c);
    assert!(evs.contains(&SignalEvent::PeerOnline));
    assert!(evs.iter().any(|e| matches!(
        e,
        SignalEvent::RemoteCandidates { candidates, fin: true, base_index: 0, .. }
            if candidates.len() == 1
    )));
    assert_eq!(c.state(), SignalState::Ready);
    assert_eq!(c.peer_id().as_str(), "bob");

    // The duplicate is re-acked but not re-delivered.
    c.handle_packet(&info, server_addr(), t0);
    assert_eq!(drain(&mut c).len(), 1);
    assert!(events(&mut c).is_empty());
}

#[test]
fn test_out_of_order_slices_converge() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    // Slice 3 lands before slice 2.
    c.handle_packet(&peer_info(3, 8, vec![rec(3, 3000)], true), server_addr(), t0);
    c.handle_packet(&peer_info(2, 0, vec![rec(2, 2000)], false), server_addr(), t0);

    let evs = events(&mut c);
    let bases: Vec<u8> = evs
        .iter()
        .filter_map(|e| match e {
            SignalEvent::RemoteCandidates { base_index, .. } => Some(*base_index),
            _ => None,
        })
        .collect();
    assert_eq!(bases, vec![8, 0]);
}

#[test]
fn test_slice_sequence_above_window_rejected() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    c.handle_packet(
        &peer_info(MAX_SLICE_SEQ + 1, 0, vec![rec(1, 1000)], false),
        server_addr(),
        t0,
    );
    assert!(drain(&mut c).is_empty());
    assert!(events(&mut c).is_empty());
    assert_eq!(c.protocol_errors(), 1);
}

#[test]
fn test_notification_ring_staleness() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    let notif = |seq: u8| peer_info(0, seq, vec![rec(seq, 6000)], false);

    c.handle_packet(&notif(5), server_addr(), t0);
    let evs = events(&mut c);
    assert!(evs.iter().any(|e| matches!(
        e,
        SignalEvent::AddressChange { notif_seq: 5, .. }
    )));

    // Older notification arriving late: acked, ignored.
    c.handle_packet(&notif(4), server_addr(), t0);
    let sent = drain(&mut c);
    assert!(sent
        .iter()
        .any(|(_, p)| p.packet_type() == PacketType::PeerInfoAck && p.seq == 0));
    assert!(events(&mut c).is_empty());

    // Newer one within the window: accepted.
    c.handle_packet(&notif(6), server_addr(), t0);
    assert!(events(&mut c).iter().any(|e| matches!(
        e,
        SignalEvent::AddressChange { notif_seq: 6, .. }
    )));
}

#[test]
fn test_notification_with_fin_is_protocol_error() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    c.handle_packet(&peer_info(0, 5, vec![rec(5, 6000)], true), server_addr(), t0);
    assert!(events(&mut c).is_empty());
    assert_eq!(c.protocol_errors(), 1);
}

#[test]
fn test_send_candidates_slices_and_retries_until_ack() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    let batch: Vec<CandidateRecord> = (0..10).map(|i| rec(i as u8 + 1, 7000 + i)).collect();
    c.send_candidates(&batch, t0).unwrap();

    let sent = drain(&mut c);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1.seq, 2);
    assert!(!sent[0].1.has_flag(FLAG_FIN));
    assert_eq!(sent[1].1.seq, 3);
    assert!(sent[1].1.has_flag(FLAG_FIN));
    match (&sent[0].1.body, &sent[1].1.body) {
        (Body::PeerInfo(a), Body::PeerInfo(b)) => {
            assert_eq!(a.candidates.len(), 8);
            assert_eq!(a.base_index, 0);
            assert_eq!(b.candidates.len(), 2);
            assert_eq!(b.base_index, 8);
        }
        other => panic!("unexpected bodies {other:?}"),
    }

    // Ack slice 2 only: slice 3 is retried alone.
    c.handle_packet(
        &Packet::with_seq(
            Body::PeerInfoAck {
                sender_id: pid("bob"),
                target_id: pid("alice"),
            },
            2,
        ),
        server_addr(),
        t0,
    );
    c.tick(t0 + RETRY_INTERVAL);
    let resent: Vec<u16> = drain(&mut c)
        .iter()
        .filter(|(_, p)| p.packet_type() == PacketType::PeerInfo)
        .map(|(_, p)| p.seq)
        .collect();
    assert_eq!(resent, vec![3]);
}

#[test]
fn test_send_candidates_window_bound() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    // 16 slices of one candidate each exhaust seq 2..=17.
    for i in 0..16u16 {
        c.send_candidates(&[rec(i as u8 + 1, 100 + i)], t0).unwrap();
    }
    assert!(matches!(
        c.send_candidates(&[rec(99, 9900)], t0),
        Err(Error::ErrBatchTooLarge)
    ));
}

#[test]
fn test_peer_off_resets_to_registered() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);
    c.handle_packet(&peer_info(1, 0, vec![rec(9, 9000)], true), server_addr(), t0);
    drain(&mut c);
    events(&mut c);
    assert_eq!(c.state(), SignalState::Ready);

    c.handle_packet(&Packet::new(Body::PeerOff { session_id: 7 }), server_addr(), t0);
    assert_eq!(c.state(), SignalState::Registered);
    assert!(events(&mut c).contains(&SignalEvent::PeerOffline));

    // The slice dedupe mask was cleared: the re-delivered server info
    // surfaces again.
    c.handle_packet(&peer_info(1, 0, vec![rec(9, 9000)], true), server_addr(), t0);
    assert!(events(&mut c)
        .iter()
        .any(|e| matches!(e, SignalEvent::RemoteCandidates { .. })));
}

#[test]
fn test_alive_heartbeat_cadence() {
    let t0 = Instant::now();
    let mut c = registered_client(t0);

    c.tick(t0);
    let first: Vec<_> = drain(&mut c)
        .into_iter()
        .filter(|(_, p)| p.packet_type() == PacketType::Alive)
        .collect();
    assert_eq!(first.len(), 1);

    c.tick(t0 + ALIVE_INTERVAL - Duration::from_millis(1));
    assert!(drain(&mut c)
        .iter()
        .all(|(_, p)| p.packet_type() != PacketType::Alive));

    c.tick(t0 + ALIVE_INTERVAL);
    assert!(drain(&mut c)
        .iter()
        .any(|(_, p)| p.packet_type() == PacketType::Alive));
}
