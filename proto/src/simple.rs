#[cfg(test)]
mod simple_test;

use std::fmt;
use std::net::SocketAddrV4;

use bytes::{BufMut, Bytes, BytesMut};

use crate::coding::Reader;
use crate::error::{Error, Result};
use crate::peer_id::PeerId;

/// Protocol version carried in every SIMPLE frame.
pub const SIMPLE_VERSION: u8 = 1;

/// Size of the SIMPLE frame header: type(1) + version(1) + length(2) +
/// peer_id(32).
pub const SIMPLE_HEADER_SIZE: usize = 36;

/// Message types of the stateless UDP registry protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimpleType {
    /// Client announces its own endpoint under `peer_id`.
    Hello = 1,
    /// Client asks for the endpoint cached under `peer_id`.
    PeerInfoReq = 2,
    /// Registry answer; `data` holds `"a.b.c.d:port"` ASCII, empty when
    /// the peer is unknown.
    PeerInfo = 3,
}

impl TryFrom<u8> for SimpleType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Hello),
            2 => Ok(Self::PeerInfoReq),
            3 => Ok(Self::PeerInfo),
            other => Err(Error::ErrUnknownSimpleType(other)),
        }
    }
}

impl fmt::Display for SimpleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Hello => "HELLO",
            Self::PeerInfoReq => "PEER_INFO_REQ",
            Self::PeerInfo => "PEER_INFO",
        };
        write!(f, "{s}")
    }
}

/// One datagram of the stateless registry protocol. HELLO and PEER_INFO
/// reuse the same struct; only `typ` and the presence of `data` differ.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleFrame {
    pub typ: SimpleType,
    pub peer_id: PeerId,
    pub data: Vec<u8>,
}

impl SimpleFrame {
    pub fn new(typ: SimpleType, peer_id: PeerId) -> Self {
        SimpleFrame {
            typ,
            peer_id,
            data: Vec::new(),
        }
    }

    pub fn with_addr(typ: SimpleType, peer_id: PeerId, addr: &SocketAddrV4) -> Self {
        SimpleFrame {
            typ,
            peer_id,
            data: addr.to_string().into_bytes(),
        }
    }

    /// Parses the `"a.b.c.d:port"` payload; `Ok(None)` for an empty one.
    pub fn addr(&self) -> Result<Option<SocketAddrV4>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let s = std::str::from_utf8(&self.data).map_err(|_| Error::ErrMalformedAddress)?;
        let addr = s.parse().map_err(|_| Error::ErrMalformedAddress)?;
        Ok(Some(addr))
    }

    pub fn encode(&self) -> Bytes {
        debug_assert!(self.data.len() <= u16::MAX as usize);
        let mut buf = BytesMut::with_capacity(SIMPLE_HEADER_SIZE + self.data.len());
        buf.put_u8(self.typ as u8);
        buf.put_u8(SIMPLE_VERSION);
        buf.put_u16(self.data.len() as u16);
        self.peer_id.put(&mut buf);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw);
        let typ = SimpleType::try_from(r.u8()?)?;
        let version = r.u8()?;
        if version != SIMPLE_VERSION {
            return Err(Error::ErrBadSimpleVersion(version));
        }
        let len = r.u16()? as usize;
        let peer_id = PeerId::get(&mut r)?;
        let data = r.take(len)?.to_vec();
        Ok(SimpleFrame { typ, peer_id, data })
    }
}
