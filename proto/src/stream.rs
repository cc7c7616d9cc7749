
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::packet::{Packet, HEADER_SIZE};

/// Magic prefix of every stream frame.
pub const STREAM_MAGIC: [u8; 4] = *b"RELY";

/// Size of the stream frame header: magic(4) + type(1) + length(4).
pub const FRAME_HEADER_SIZE: usize = 9;

/// Upper bound for a frame body; anything larger is treated as a
/// desynchronized stream.
pub const MAX_FRAME_BODY: usize = 64 * 1024;

/// Encodes a packet as a stream frame for reliable-stream access to the
/// rendezvous server: `"RELY" | type:u8 | length:u32 | flags:u8 |
/// seq:u16 | body`. The framed content is identical to the datagram
/// form, with the type byte hoisted into the frame header.
pub fn encode_frame(pkt: &Packet) -> Bytes {
    let dgram = pkt.encode();
    let body_len = dgram.len() - 1; // flags + seq + body
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body_len);
    buf.put_slice(&STREAM_MAGIC);
    buf.put_u8(dgram[0]);
    buf.put_u32(body_len as u32);
    buf.put_slice(&dgram[1..]);
    buf.freeze()
}

/// Incremental decoder for a stream of "RELY" frames.
///
/// Feed raw bytes with `push` as they arrive from the stream, then drain
/// complete packets with `next_packet`. Any framing error poisons the
/// stream; the caller is expected to drop the connection.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete packet, `Ok(None)` when more bytes are
    /// needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        if self.buf[..4] != STREAM_MAGIC {
            return Err(Error::ErrBadStreamMagic);
        }
        let typ = self.buf[4];
        let body_len =
            u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]) as usize;
        if body_len > MAX_FRAME_BODY {
            return Err(Error::ErrFrameTooLarge);
        }
        if body_len < HEADER_SIZE - 1 {
            return Err(Error::ErrTruncated);
        }
        if self.buf.len() < FRAME_HEADER_SIZE + body_len {
            return Ok(None);
        }

        let frame = self.buf.split_to(FRAME_HEADER_SIZE + body_len);
        let mut dgram = Vec::with_capacity(1 + body_len);
        dgram.push(typ);
        dgram.extend_from_slice(&frame[FRAME_HEADER_SIZE..]);
        Packet::decode(&dgram).map(Some)
    }
}
