use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use super::*;
use crate::candidate::CandidateKind;

fn sample_candidate() -> CandidateRecord {
    CandidateRecord {
        kind: CandidateKind::Host,
        addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 5), 40000),
        base_addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 5), 40000),
        priority: (126 << 24) | (65535 << 8) | 255,
    }
}

fn round_trip(pkt: Packet) -> Result<()> {
    let raw = pkt.encode();
    let decoded = Packet::decode(&raw)?;
    assert_eq!(decoded, pkt);
    Ok(())
}

#[test]
fn test_header_layout() {
    let pkt = Packet {
        flags: FLAG_FIN,
        seq: 0x0203,
        body: Body::Punch,
    };
    let raw = pkt.encode();
    assert_eq!(raw.len(), HEADER_SIZE);
    assert_eq!(raw[0], PacketType::Punch as u8);
    assert_eq!(raw[1], FLAG_FIN);
    assert_eq!(&raw[2..4], &[0x02, 0x03]);
}

#[test]
fn test_data_round_trip() -> Result<()> {
    round_trip(Packet::with_seq(
        Body::Data(Bytes::from_static(b"hello, hole")),
        17,
    ))
}

#[test]
fn test_data_oversize_rejected() {
    let mut raw = Vec::new();
    raw.extend_from_slice(&[PacketType::Data as u8, 0, 0, 1]);
    raw.extend_from_slice(&vec![0xAB; MAX_DATA_PAYLOAD + 1]);
    assert_eq!(Packet::decode(&raw), Err(Error::ErrPayloadTooLarge));
}

#[test]
fn test_ack_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::Ack {
        ack_seq: 0xFFFE,
        sack_bits: 0b1011,
    }))
}

#[test]
fn test_empty_bodies_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::Punch))?;
    round_trip(Packet::new(Body::PunchAck))?;
    round_trip(Packet::new(Body::RouteProbe))?;
    round_trip(Packet::new(Body::Fin))
}

#[test]
fn test_register_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::Register(Register {
        local_id: PeerId::new("alice")?,
        remote_id: PeerId::new("bob")?,
        tie_breaker: 0xDEAD_BEEF_CAFE_F00D,
        candidates: vec![sample_candidate()],
    })))
}

#[test]
fn test_register_ack_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::RegisterAck(RegisterAck {
        status: RegisterStatus::PeerOnline,
        max_candidates: 8,
        session_id: 42,
        mapped: SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 61234),
        probe_port: 8889,
    })))
}

#[test]
fn test_register_ack_unknown_status_rejected() {
    let pkt = Packet::new(Body::RegisterAck(RegisterAck {
        status: RegisterStatus::PeerOffline,
        max_candidates: 8,
        session_id: 1,
        mapped: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1),
        probe_port: 0,
    }));
    let mut raw = pkt.encode().to_vec();
    raw[HEADER_SIZE] = 7;
    assert_eq!(Packet::decode(&raw), Err(Error::ErrUnknownRegisterStatus(7)));
}

#[test]
fn test_peer_info_round_trip() -> Result<()> {
    round_trip(Packet::with_seq(
        Body::PeerInfo(crate::peer_info::PeerInfo {
            sender_id: PeerId::new("alice")?,
            target_id: PeerId::new("bob")?,
            timestamp_ms: 1_700_000_000_123,
            flags: FLAG_FIN,
            base_index: 2,
            candidates: vec![sample_candidate(), sample_candidate()],
        }),
        3,
    ))
}

#[test]
fn test_peer_info_ack_round_trip() -> Result<()> {
    round_trip(Packet::with_seq(
        Body::PeerInfoAck {
            sender_id: PeerId::new("bob")?,
            target_id: PeerId::new("alice")?,
        },
        1,
    ))
}

#[test]
fn test_nat_probe_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::NatProbe { tsx_id: 0x01020304 }))?;
    round_trip(Packet::new(Body::NatProbeAck {
        mapped: SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 2), 3479),
        tsx_id: 0x01020304,
    }))
}

#[test]
fn test_relay_data_wraps_inner_packet() -> Result<()> {
    let inner = Packet::with_seq(Body::Data(Bytes::from_static(b"via relay")), 9).encode();
    let pkt = Packet::new(Body::RelayData {
        session_id: 77,
        inner: inner.clone(),
    });
    let decoded = Packet::decode(&pkt.encode())?;
    match decoded.body {
        Body::RelayData { session_id, inner: got } => {
            assert_eq!(session_id, 77);
            let unwrapped = Packet::decode(&got)?;
            assert_eq!(unwrapped.seq, 9);
            assert_eq!(unwrapped.body, Body::Data(Bytes::from_static(b"via relay")));
            assert_eq!(got, inner);
        }
        other => panic!("unexpected body {other:?}"),
    }
    Ok(())
}

#[test]
fn test_alive_and_peer_off_round_trip() -> Result<()> {
    round_trip(Packet::new(Body::Alive { session_id: 5 }))?;
    round_trip(Packet::new(Body::AliveAck { session_id: 5 }))?;
    round_trip(Packet::new(Body::PeerOff { session_id: 5 }))
}

#[test]
fn test_short_datagram_rejected() {
    assert_eq!(Packet::decode(&[]), Err(Error::ErrPacketTooShort));
    assert_eq!(
        Packet::decode(&[PacketType::Data as u8, 0, 0]),
        Err(Error::ErrPacketTooShort)
    );
}

#[test]
fn test_unknown_type_rejected() {
    assert_eq!(
        Packet::decode(&[0x7F, 0, 0, 0]),
        Err(Error::ErrUnknownPacketType(0x7F))
    );
    assert_eq!(
        Packet::decode(&[0xBF, 0, 0, 0]),
        Err(Error::ErrUnknownPacketType(0xBF))
    );
}

#[test]
fn test_truncated_body_rejected() {
    let pkt = Packet::new(Body::Ack {
        ack_seq: 1,
        sack_bits: 2,
    });
    let raw = pkt.encode();
    assert_eq!(Packet::decode(&raw[..raw.len() - 1]), Err(Error::ErrTruncated));
}

#[test]
fn test_type_ranges() {
    assert!(PacketType::Data.is_data_plane());
    assert!(PacketType::Fin.is_data_plane());
    assert!(PacketType::Register.is_signaling());
    assert!(PacketType::PeerOff.is_signaling());
    assert!(PacketType::RelayData.is_relay());
    assert!(!PacketType::RelayData.is_signaling());
}
