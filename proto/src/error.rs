use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a datagram or stream frame can fail to decode.
///
/// Callers are expected to drop the offending input and count it; no
/// variant is recoverable by retrying the same bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates a datagram shorter than the fixed 4-byte header.
    #[error("datagram shorter than the fixed header")]
    ErrPacketTooShort,

    /// Indicates a type byte outside every assigned range.
    #[error("unknown packet type 0x{0:02x}")]
    ErrUnknownPacketType(u8),

    /// Indicates a body that ended before its fixed fields did.
    #[error("packet body truncated")]
    ErrTruncated,

    /// Indicates a DATA payload above the 1200-byte bound.
    #[error("payload exceeds the 1200-byte datagram limit")]
    ErrPayloadTooLarge,

    /// Indicates a packed address with a family other than IPv4.
    #[error("unsupported address family")]
    ErrAddressFamily,

    /// Indicates a peer id longer than the 32-byte wire field.
    #[error("peer id longer than 32 bytes")]
    ErrPeerIdTooLong,

    /// Indicates a peer id field that is not valid UTF-8.
    #[error("peer id is not valid utf-8")]
    ErrMalformedPeerId,

    /// Indicates a candidate record with an unassigned kind value.
    #[error("unknown candidate kind {0}")]
    ErrUnknownCandidateKind(u32),

    /// Indicates a REGISTER_ACK with an unassigned status value.
    #[error("unknown register status {0}")]
    ErrUnknownRegisterStatus(u8),

    /// Indicates a stream frame that does not start with "RELY".
    #[error("bad stream frame magic")]
    ErrBadStreamMagic,

    /// Indicates a stream frame body above the 64 KiB bound.
    #[error("stream frame too large")]
    ErrFrameTooLarge,

    /// Indicates a SIMPLE frame with an unassigned type value.
    #[error("unknown simple signaling type {0}")]
    ErrUnknownSimpleType(u8),

    /// Indicates a SIMPLE frame with an unsupported version byte.
    #[error("unsupported simple signaling version {0}")]
    ErrBadSimpleVersion(u8),

    /// Indicates an address payload that could not be parsed.
    #[error("malformed address payload")]
    ErrMalformedAddress,
}
