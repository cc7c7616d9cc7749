use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::coding::Reader;
use crate::error::{Error, Result};

/// Width of the peer identity field on the wire.
pub const PEER_ID_LEN: usize = 32;

/// A short opaque rendezvous key, at most 32 bytes, zero-padded on the
/// wire. The empty id is valid and means "unassigned" (passive sessions
/// start without a remote id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.len() > PEER_ID_LEN {
            return Err(Error::ErrPeerIdTooLong);
        }
        Ok(PeerId(id))
    }

    pub fn empty() -> Self {
        PeerId(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn put(&self, buf: &mut BytesMut) {
        let raw = self.0.as_bytes();
        buf.put_slice(raw);
        buf.put_bytes(0, PEER_ID_LEN - raw.len());
    }

    pub(crate) fn get(r: &mut Reader<'_>) -> Result<Self> {
        let raw = r.take(PEER_ID_LEN)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(PEER_ID_LEN);
        let id = std::str::from_utf8(&raw[..end]).map_err(|_| Error::ErrMalformedPeerId)?;
        Ok(PeerId(id.to_owned()))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for PeerId {
    type Error = Error;

    fn try_from(id: &str) -> Result<Self> {
        PeerId::new(id)
    }
}
