
use bytes::{BufMut, BytesMut};

use crate::candidate::CandidateRecord;
use crate::coding::Reader;
use crate::error::Result;
use crate::peer_id::PeerId;

/// Size of the PEER_INFO sub-header:
/// sender(32) + target(32) + timestamp(8) + flags(1) + count(1) +
/// base_index(1) + reserved(1).
pub const PEER_INFO_SUB_HEADER_SIZE: usize = 76;

/// The candidate-exchange message, relayed through the rendezvous server
/// or sent directly between peers once the hole is open.
///
/// One packet type serves three roles, disambiguated by the header
/// sequence and `base_index`: the server's initial cached delivery
/// (seq == 1, base == 0), peer candidate slices (seq >= 2) and
/// single-candidate address-change notifications (seq == 0,
/// base_index in 1..=255, where `base_index` is the cyclic notification
/// counter).
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub sender_id: PeerId,
    pub target_id: PeerId,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Mirror of the datagram header flags (FIN marks the last slice
    /// of a batch).
    pub flags: u8,
    pub base_index: u8,
    pub candidates: Vec<CandidateRecord>,
}

impl PeerInfo {
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        debug_assert!(self.candidates.len() <= u8::MAX as usize);
        self.sender_id.put(buf);
        self.target_id.put(buf);
        buf.put_u64(self.timestamp_ms);
        buf.put_u8(self.flags);
        buf.put_u8(self.candidates.len() as u8);
        buf.put_u8(self.base_index);
        buf.put_u8(0);
        for rec in &self.candidates {
            rec.encode_into(buf);
        }
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let sender_id = PeerId::get(r)?;
        let target_id = PeerId::get(r)?;
        let timestamp_ms = r.u64()?;
        let flags = r.u8()?;
        let count = r.u8()? as usize;
        let base_index = r.u8()?;
        let _reserved = r.u8()?;
        let mut candidates = Vec::with_capacity(count);
        for _ in 0..count {
            candidates.push(CandidateRecord::decode(r)?);
        }
        Ok(PeerInfo {
            sender_id,
            target_id,
            timestamp_ms,
            flags,
            base_index,
            candidates,
        })
    }
}
