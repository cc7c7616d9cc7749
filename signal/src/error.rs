use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Indicates an operation that needs a completed registration.
    #[error("not registered with the rendezvous server")]
    ErrNotRegistered,

    /// Indicates a candidate batch beyond the 16-slice send window.
    #[error("candidate batch exceeds the slice window")]
    ErrBatchTooLarge,

    /// Indicates a sealed payload that failed to decrypt or verify.
    #[error("crypto failure on sealed payload")]
    ErrCrypto,

    /// Indicates a blob that is not valid base64 or too short.
    #[error("malformed sealed blob")]
    ErrMalformedBlob,

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
