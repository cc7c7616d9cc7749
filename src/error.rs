use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Indicates an empty or oversized peer id in the config.
    #[error("invalid peer id: must be 1..=32 bytes")]
    ErrInvalidPeerId,

    /// Indicates a missing rendezvous server for the selected mode.
    #[error("server host and port required for this signaling mode")]
    ErrMissingServer,

    /// Indicates PUB/SUB mode without a shared secret.
    #[error("auth_key required for pub/sub signaling")]
    ErrMissingAuthKey,

    /// Indicates PUB/SUB mode without a blob store backend.
    #[error("blob store required for pub/sub signaling")]
    ErrMissingBlobStore,

    /// Indicates an update interval outside 1..=1000 ms.
    #[error("invalid update interval")]
    ErrInvalidUpdateInterval,

    /// Indicates the server host did not resolve to an IPv4 address.
    #[error("failed to resolve server address")]
    ErrServerAddr,

    /// Indicates `send` or `recv` on a closed or failed session.
    #[error("session is closed")]
    ErrClosed,

    /// Indicates the reliable transport gave up on a packet.
    #[error("connection lost")]
    ErrConnectionLost,

    /// Indicates no candidate pair answered and no relay exists.
    #[error("punch failed")]
    ErrPunchFailed,

    /// Indicates signaling retries were exhausted.
    #[error("signaling unreachable")]
    ErrSignalingUnreachable,

    #[error("{0}")]
    Transport(#[from] transport::Error),

    #[error("{0}")]
    Ice(#[from] ice::Error),

    #[error("{0}")]
    Signal(#[from] signal::Error),

    #[error("{0}")]
    Proto(#[from] proto::Error),

    #[error("{0}")]
    Io(#[source] IoError),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
