#[cfg(test)]
mod addr_test;

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, BytesMut};

use crate::coding::Reader;
use crate::error::{Error, Result};

/// Size of a packed socket address on the wire.
pub const PACKED_ADDR_SIZE: usize = 12;

/// Address family value for IPv4, the only family the engine speaks.
pub const FAMILY_IPV4: u8 = 1;

// Packed layout: family:u8 | zero:u8 | port:u16 | ipv4:u32 | 4 zero bytes.
// The padding keeps the record at a clean 12 bytes so that candidate
// records pack to exactly 32.

pub(crate) fn put_addr(buf: &mut BytesMut, addr: &SocketAddrV4) {
    buf.put_u8(FAMILY_IPV4);
    buf.put_u8(0);
    buf.put_u16(addr.port());
    buf.put_slice(&addr.ip().octets());
    buf.put_slice(&[0u8; 4]);
}

pub(crate) fn get_addr(r: &mut Reader<'_>) -> Result<SocketAddrV4> {
    let family = r.u8()?;
    if family != FAMILY_IPV4 {
        return Err(Error::ErrAddressFamily);
    }
    let _zero = r.u8()?;
    let port = r.u16()?;
    let ip = r.u32()?;
    let _pad = r.take(4)?;
    Ok(SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

/// Packs `addr` into its fixed 12-byte wire form.
pub fn encode_addr(addr: &SocketAddrV4) -> [u8; PACKED_ADDR_SIZE] {
    let mut buf = BytesMut::with_capacity(PACKED_ADDR_SIZE);
    put_addr(&mut buf, addr);
    let mut out = [0u8; PACKED_ADDR_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decodes a packed 12-byte address.
pub fn decode_addr(raw: &[u8]) -> Result<SocketAddrV4> {
    let mut r = Reader::new(raw);
    get_addr(&mut r)
}
