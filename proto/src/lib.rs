//! Wire codec for the natlink protocol family.
//!
//! natlink-proto contains the deterministic encode/decode logic for every
//! datagram and stream frame the engine exchanges: the 4-byte framed UDP
//! header and its typed bodies, packed IPv4 addresses, 32-byte candidate
//! records, the PEER_INFO sub-header, the "RELY" stream framing used for
//! reliable-stream access to a rendezvous server, and the SIMPLE/UDP
//! registry framing. It performs no I/O and never blocks; malformed input
//! is the single failure mode surfaced to callers.

#![warn(rust_2018_idioms)]

pub mod addr;
pub mod candidate;
mod coding;
pub mod error;
pub mod packet;
pub mod peer_id;
pub mod peer_info;
pub mod simple;
pub mod stream;

pub use crate::addr::{decode_addr, encode_addr, PACKED_ADDR_SIZE};
pub use crate::candidate::{
    decode_candidate_list, encode_candidate_list, CandidateKind, CandidateRecord,
    CANDIDATE_RECORD_SIZE,
};
pub use crate::error::{Error, Result};
pub use crate::packet::{
    Body, Packet, PacketType, Register, RegisterAck, RegisterStatus, FLAG_FIN,
    FLAG_RELAY_AVAILABLE, FLAG_RESPONSE, HEADER_SIZE, MAX_DATA_PAYLOAD,
};
pub use crate::peer_id::{PeerId, PEER_ID_LEN};
pub use crate::peer_info::{PeerInfo, PEER_INFO_SUB_HEADER_SIZE};
pub use crate::simple::{SimpleFrame, SimpleType, SIMPLE_HEADER_SIZE, SIMPLE_VERSION};
pub use crate::stream::{encode_frame, StreamDecoder, FRAME_HEADER_SIZE, STREAM_MAGIC};
