
use std::fmt;
use std::net::SocketAddrV4;

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::addr::{get_addr, put_addr, PACKED_ADDR_SIZE};
use crate::coding::Reader;
use crate::error::{Error, Result};

/// Size of one candidate record on the wire:
/// kind(4) + address(12) + base_address(12) + priority(4).
pub const CANDIDATE_RECORD_SIZE: usize = 32;

/// The four ICE candidate kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CandidateKind {
    #[serde(rename = "host")]
    Host = 1,
    #[serde(rename = "srflx")]
    ServerReflexive = 2,
    #[serde(rename = "prflx")]
    PeerReflexive = 3,
    #[serde(rename = "relay")]
    Relay = 4,
}

impl CandidateKind {
    /// Returns the RFC 8445 type preference for this kind.
    ///
    /// 126 for host, 110 for peer-reflexive, 100 for server-reflexive
    /// and 0 for relayed candidates. Higher wins.
    #[must_use]
    pub const fn preference(self) -> u16 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::PeerReflexive => "prflx",
            Self::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<u32> for CandidateKind {
    type Error = Error;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            1 => Ok(Self::Host),
            2 => Ok(Self::ServerReflexive),
            3 => Ok(Self::PeerReflexive),
            4 => Ok(Self::Relay),
            other => Err(Error::ErrUnknownCandidateKind(other)),
        }
    }
}

/// The wire-serializable view of a candidate.
///
/// Runtime candidate state (punch timers, pair membership) lives in the
/// ICE engine; this record is only what crosses the network, so
/// serialization can never trample timers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub kind: CandidateKind,
    /// Externally reachable endpoint.
    pub addr: SocketAddrV4,
    /// Local endpoint the candidate was derived from; equal to `addr`
    /// for host candidates.
    pub base_addr: SocketAddrV4,
    pub priority: u32,
}

impl fmt::Display for CandidateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} prio {}", self.kind, self.addr, self.priority)
    }
}

impl CandidateRecord {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.kind as u32);
        put_addr(buf, &self.addr);
        put_addr(buf, &self.base_addr);
        buf.put_u32(self.priority);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let kind = CandidateKind::try_from(r.u32()?)?;
        let addr = get_addr(r)?;
        let base_addr = get_addr(r)?;
        let priority = r.u32()?;
        Ok(CandidateRecord {
            kind,
            addr,
            base_addr,
            priority,
        })
    }

    /// Decodes a single record from a standalone 32-byte slice.
    pub fn decode_slice(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::new(raw);
        Self::decode(&mut r)
    }
}

const _: () = assert!(CANDIDATE_RECORD_SIZE == 4 + 2 * PACKED_ADDR_SIZE + 4);

/// Encodes a candidate list payload: `base_index:u8 | count:u8 | records`.
pub fn encode_candidate_list(base_index: u8, records: &[CandidateRecord], buf: &mut BytesMut) {
    debug_assert!(records.len() <= u8::MAX as usize);
    buf.put_u8(base_index);
    buf.put_u8(records.len() as u8);
    for rec in records {
        rec.encode_into(buf);
    }
}

/// Decodes a candidate list payload, returning `(base_index, records)`.
pub fn decode_candidate_list(raw: &[u8]) -> Result<(u8, Vec<CandidateRecord>)> {
    let mut r = Reader::new(raw);
    let (base_index, records) = get_candidate_list(&mut r)?;
    Ok((base_index, records))
}

pub(crate) fn get_candidate_list(r: &mut Reader<'_>) -> Result<(u8, Vec<CandidateRecord>)> {
    let base_index = r.u8()?;
    let count = r.u8()? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(CandidateRecord::decode(r)?);
    }
    Ok((base_index, records))
}
