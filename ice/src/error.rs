use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates the overall punch deadline passed without any reply
    /// and no relay is available to fall back to.
    #[error("punch failed: no candidate pair answered")]
    ErrPunchTimeout,

    /// Indicates a punch was started with an empty remote set.
    #[error("no remote candidates to punch")]
    ErrNoRemoteCandidates,

    /// Indicates no usable local interface address could be found.
    #[error("no local host address available")]
    ErrNoHostAddress,

    #[error("{0}")]
    Io(#[source] IoError),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
