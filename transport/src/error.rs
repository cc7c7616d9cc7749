use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates a submit above the single-datagram payload bound.
    #[error("payload exceeds the 1200-byte datagram limit")]
    ErrPayloadTooLarge,

    /// Indicates the retransmission limit was reached on some packet;
    /// the transport is dead and every later call fails fast.
    #[error("connection lost: retransmission limit reached")]
    ErrConnectionLost,
}
