use std::net::{Ipv4Addr, SocketAddrV4};

use super::*;

#[test]
fn test_addr_round_trip() -> Result<()> {
    let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 7, 21), 40321);
    let raw = encode_addr(&addr);
    assert_eq!(raw.len(), PACKED_ADDR_SIZE);
    assert_eq!(decode_addr(&raw)?, addr);
    Ok(())
}

#[test]
fn test_addr_layout() {
    let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 0x1234);
    let raw = encode_addr(&addr);
    assert_eq!(raw[0], FAMILY_IPV4);
    assert_eq!(raw[1], 0);
    assert_eq!(&raw[2..4], &[0x12, 0x34]);
    assert_eq!(&raw[4..8], &[10, 0, 0, 1]);
    assert_eq!(&raw[8..12], &[0, 0, 0, 0]);
}

#[test]
fn test_addr_rejects_unknown_family() {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000);
    let mut raw = encode_addr(&addr);
    raw[0] = 2;
    assert_eq!(decode_addr(&raw), Err(Error::ErrAddressFamily));
}

#[test]
fn test_addr_rejects_truncation() {
    let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000);
    let raw = encode_addr(&addr);
    assert_eq!(decode_addr(&raw[..7]), Err(Error::ErrTruncated));
}
