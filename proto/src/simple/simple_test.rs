use std::net::{Ipv4Addr, SocketAddrV4};

use super::*;

#[test]
fn test_hello_round_trip() {
    let addr = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 7), 50123);
    let frame = SimpleFrame::with_addr(SimpleType::Hello, PeerId::new("alice").unwrap(), &addr);
    let decoded = SimpleFrame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded, frame);
    assert_eq!(decoded.addr().unwrap(), Some(addr));
}

#[test]
fn test_request_carries_no_data() {
    let frame = SimpleFrame::new(SimpleType::PeerInfoReq, PeerId::new("bob").unwrap());
    let raw = frame.encode();
    assert_eq!(raw.len(), SIMPLE_HEADER_SIZE);
    let decoded = SimpleFrame::decode(&raw).unwrap();
    assert_eq!(decoded.addr().unwrap(), None);
}

#[test]
fn test_bad_version_rejected() {
    let frame = SimpleFrame::new(SimpleType::Hello, PeerId::new("x").unwrap());
    let mut raw = frame.encode().to_vec();
    raw[1] = 9;
    assert_eq!(SimpleFrame::decode(&raw), Err(Error::ErrBadSimpleVersion(9)));
}

#[test]
fn test_unknown_type_rejected() {
    let frame = SimpleFrame::new(SimpleType::Hello, PeerId::new("x").unwrap());
    let mut raw = frame.encode().to_vec();
    raw[0] = 0;
    assert_eq!(SimpleFrame::decode(&raw), Err(Error::ErrUnknownSimpleType(0)));
}

#[test]
fn test_garbage_addr_payload_rejected() {
    let mut frame = SimpleFrame::new(SimpleType::PeerInfo, PeerId::new("x").unwrap());
    frame.data = b"not-an-address".to_vec();
    let decoded = SimpleFrame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded.addr(), Err(Error::ErrMalformedAddress));
}
